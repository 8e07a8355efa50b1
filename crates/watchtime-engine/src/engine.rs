//! Quota engine: business rules over an injected store.
//!
//! Every mutating operation runs as one store transaction: load the record
//! (or defaults), apply the midnight reset if a day boundary has passed, run
//! the operation, check invariants, and commit only if something changed. A
//! rejected operation keeps the record as it was after the midnight reset.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use watchtime_models::{
    format_hours_minutes, LimitReduction, QuotaPolicy, QuotaRecord, QuotaSnapshot, Rejection,
    WalletApplication,
};

use crate::clock::Clock;
use crate::error::{QuotaError, QuotaResult, StoreResult};
use crate::metrics::{record_operation, record_read_fallback};
use crate::store::QuotaStore;
use crate::transitions;

/// Watch-time quota engine for one user.
#[derive(Clone)]
pub struct QuotaEngine {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    policy: QuotaPolicy,
    user_id: String,
}

impl QuotaEngine {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
        policy: QuotaPolicy,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current record as of now, with the midnight reset applied in view.
    async fn load_current(&self) -> StoreResult<QuotaRecord> {
        let now = self.clock.now();
        let mut record = match self.store.get(&self.user_id).await? {
            Some(stored) => repair_stored(stored, &self.policy, &self.user_id),
            None => QuotaRecord::new(&self.policy),
        };
        transitions::roll_over_if_needed(&mut record, &self.policy, self.clock.as_ref(), now);
        Ok(record)
    }

    /// Current record, or the default record if the store cannot be read.
    async fn read_or_default(&self) -> QuotaRecord {
        match self.load_current().await {
            Ok(record) => record,
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Quota read failed, using defaults");
                record_read_fallback();
                QuotaRecord::new(&self.policy)
            }
        }
    }

    /// Display snapshot, propagating store errors.
    pub async fn try_snapshot(&self) -> QuotaResult<QuotaSnapshot> {
        Ok(self.load_current().await?.snapshot(&self.policy))
    }

    /// Display snapshot. Falls back to defaults if the store is unreachable.
    pub async fn snapshot(&self) -> QuotaSnapshot {
        self.read_or_default().await.snapshot(&self.policy)
    }

    pub async fn effective_limit_minutes(&self) -> u32 {
        self.read_or_default()
            .await
            .effective_limit_minutes(&self.policy)
    }

    pub async fn remaining_minutes(&self) -> u32 {
        self.read_or_default().await.remaining_minutes(&self.policy)
    }

    pub async fn is_limit_exceeded(&self) -> bool {
        self.read_or_default().await.is_limit_exceeded(&self.policy)
    }

    pub async fn wallet_minutes(&self) -> u32 {
        self.read_or_default().await.wallet_minutes
    }

    pub async fn applied_bonus_minutes(&self) -> u32 {
        self.read_or_default().await.applied_bonus_minutes
    }

    pub async fn base_limit_minutes(&self) -> u32 {
        self.read_or_default().await.base_limit_minutes
    }

    pub async fn used_millis(&self) -> u64 {
        self.read_or_default().await.used_millis
    }

    pub async fn used_minutes(&self) -> u32 {
        self.read_or_default().await.used_minutes()
    }

    /// `"Used today: HH:MM / HH:MM"`.
    pub async fn display_string(&self) -> String {
        self.snapshot().await.display_string()
    }

    /// Whether enough time has been used to offer the unlock sequence.
    pub async fn has_reached_unlock_trigger(&self) -> bool {
        self.read_or_default().await.used_minutes() >= self.policy.unlock_trigger_minutes
    }

    /// Multi-line description of the current state for debugging.
    pub async fn state_report(&self) -> String {
        let record = self.read_or_default().await;
        let policy = &self.policy;
        let fmt_instant = |instant: Option<DateTime<Utc>>| {
            instant
                .map(|i| i.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        };

        let mut lines = vec![
            format!("Watch time for {}", self.user_id),
            format!("  backend:         {}", self.store.backend_name()),
            format!("  base limit:      {} min", record.base_limit_minutes),
            format!("  applied bonus:   {} min", record.applied_bonus_minutes),
            format!(
                "  effective limit: {} min (max {})",
                record.effective_limit_minutes(policy),
                policy.max_daily_minutes
            ),
            format!(
                "  used:            {} ({} ms)",
                format_hours_minutes(record.used_minutes()),
                record.used_millis
            ),
            format!("  remaining:       {} min", record.remaining_minutes(policy)),
            format!(
                "  wallet:          {} / {} min",
                record.wallet_minutes, policy.max_wallet_minutes
            ),
            format!(
                "  unlock ads:      {}/{}",
                record.unlock_ad_count, policy.unlock_ads_required
            ),
        ];
        if record.unlock_started_at.is_some() {
            lines.push(format!(
                "  unlock started:  {}",
                fmt_instant(record.unlock_started_at)
            ));
        }
        lines.push(format!("  last reset:      {}", fmt_instant(record.last_reset_at)));
        lines.join("\n")
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Set the parent-configured base limit, clamped into `[1, max_daily]`.
    ///
    /// Applied minutes that no longer fit under the ceiling go back to the
    /// wallet (up to its cap), and used time is clamped to the new limit.
    pub async fn set_base_limit(&self, minutes: i64) -> QuotaResult<QuotaSnapshot> {
        let policy = &self.policy;
        let base = policy.clamp_base(minutes);

        let (returned, snapshot) = self
            .transact("set_base_limit", |record, _| {
                record.base_limit_minutes = base;
                let excess = (base + record.applied_bonus_minutes)
                    .saturating_sub(policy.max_daily_minutes);
                record.applied_bonus_minutes -= excess;
                let returned = excess.min(policy.max_wallet_minutes - record.wallet_minutes);
                record.wallet_minutes += returned;
                record.clamp_used_to_limit(policy);
                Ok(returned)
            })
            .await?;

        if returned > 0 {
            info!(user_id = %self.user_id, returned, "Base limit change returned applied minutes to wallet");
        }
        Ok(snapshot)
    }

    /// Credit the wallet for one qualifying rewarded ad.
    ///
    /// Rejected with [`Rejection::WalletFull`] if the credit would push the
    /// wallet over its cap.
    pub async fn credit_wallet_for_ad_watch(&self) -> QuotaResult<QuotaSnapshot> {
        let policy = &self.policy;

        let ((), snapshot) = self
            .transact("credit_wallet", |record, _| {
                let credited = record.wallet_minutes + policy.wallet_earn_per_ad;
                if credited > policy.max_wallet_minutes {
                    return Err(Rejection::WalletFull {
                        wallet: record.wallet_minutes,
                        max: policy.max_wallet_minutes,
                    });
                }
                record.wallet_minutes = credited;
                Ok(())
            })
            .await?;

        info!(
            user_id = %self.user_id,
            earned = policy.wallet_earn_per_ad,
            wallet = snapshot.wallet_minutes,
            "Credited wallet for ad watch"
        );
        Ok(snapshot)
    }

    /// Move wallet minutes into today's limit.
    ///
    /// Applies `min(minutes, room under the daily ceiling)`. A partial
    /// application is a success; the amount applied is in the result.
    pub async fn apply_wallet_to_limit(&self, minutes: i64) -> QuotaResult<WalletApplication> {
        let policy = &self.policy;

        let (application, snapshot) = self
            .transact("apply_wallet", |record, _| {
                if minutes <= 0 {
                    return Err(Rejection::InvalidAmount { requested: minutes });
                }
                let requested = u32::try_from(minutes).unwrap_or(u32::MAX);
                if requested > record.wallet_minutes {
                    return Err(Rejection::InsufficientWallet {
                        requested,
                        available: record.wallet_minutes,
                    });
                }
                let room = record.bonus_room_minutes(policy);
                if room == 0 {
                    return Err(Rejection::AtDailyMaximum {
                        max: policy.max_daily_minutes,
                    });
                }

                let applied = requested.min(room);
                record.wallet_minutes -= applied;
                record.applied_bonus_minutes += applied;
                Ok((requested, applied))
            })
            .await?;

        let (requested, applied) = application;
        info!(user_id = %self.user_id, requested, applied, "Applied wallet minutes to limit");
        Ok(WalletApplication {
            requested_minutes: requested,
            applied_minutes: applied,
            snapshot,
        })
    }

    /// Lower today's effective limit, returning the released applied minutes
    /// to the wallet (up to its cap).
    ///
    /// The target must satisfy `base <= target < current effective limit`.
    pub async fn reduce_applied_limit(&self, new_effective_limit: i64) -> QuotaResult<LimitReduction> {
        let policy = &self.policy;

        let ((released, returned), snapshot) = self
            .transact("reduce_limit", |record, _| {
                if record.applied_bonus_minutes == 0 {
                    return Err(Rejection::NothingToReduce);
                }
                let base = record.base_limit_minutes;
                let current = record.effective_limit_minutes(policy);
                if new_effective_limit < base as i64 || new_effective_limit >= current as i64 {
                    return Err(Rejection::InvalidLimitTarget {
                        requested: new_effective_limit,
                        base,
                        current,
                    });
                }

                let keep = (new_effective_limit - base as i64) as u32;
                let released = record.applied_bonus_minutes.saturating_sub(keep);
                if released == 0 {
                    return Err(Rejection::NothingToReduce);
                }

                record.applied_bonus_minutes -= released;
                let returned = released.min(policy.max_wallet_minutes - record.wallet_minutes);
                record.wallet_minutes += returned;
                record.clamp_used_to_limit(policy);
                Ok((released, returned))
            })
            .await?;

        info!(
            user_id = %self.user_id,
            released,
            returned,
            "Reduced applied limit"
        );
        Ok(LimitReduction {
            released_minutes: released,
            returned_to_wallet: returned,
            snapshot,
        })
    }

    /// Add playback time, clamped to the effective limit. Non-positive deltas
    /// are ignored.
    pub async fn record_playback_delta(&self, millis: i64) -> QuotaResult<QuotaSnapshot> {
        let policy = &self.policy;

        let ((), snapshot) = self
            .transact("record_playback", |record, _| {
                if millis > 0 {
                    let limit = record.effective_limit_millis(policy);
                    record.used_millis = record.used_millis.saturating_add(millis as u64).min(limit);
                }
                Ok(())
            })
            .await?;

        Ok(snapshot)
    }

    /// Apply the midnight reset now, regardless of the date.
    pub async fn force_reset(&self) -> QuotaResult<QuotaSnapshot> {
        let policy = &self.policy;

        let ((), snapshot) = self
            .transact("force_reset", |record, now| {
                transitions::apply_midnight_reset(record, policy, now);
                Ok(())
            })
            .await?;

        info!(user_id = %self.user_id, "Forced quota reset");
        Ok(snapshot)
    }

    // =========================================================================
    // Transaction helper
    // =========================================================================

    /// Run `op` against the user's record inside one store update.
    ///
    /// Returns the operation's value and the snapshot of the resulting record.
    pub(crate) async fn transact<T, F>(
        &self,
        operation: &'static str,
        mut op: F,
    ) -> QuotaResult<(T, QuotaSnapshot)>
    where
        F: FnMut(&mut QuotaRecord, DateTime<Utc>) -> Result<T, Rejection> + Send,
        T: Send,
    {
        let now = self.clock.now();
        let policy = &self.policy;
        let clock = self.clock.as_ref();
        let user_id = self.user_id.as_str();
        let mut outcome: Option<QuotaResult<(T, QuotaSnapshot)>> = None;

        let mut mutation = |current: Option<&QuotaRecord>| -> Option<QuotaRecord> {
            let mut record = match current {
                Some(stored) => repair_stored(stored.clone(), policy, user_id),
                None => QuotaRecord::new(policy),
            };
            if transitions::roll_over_if_needed(&mut record, policy, clock, now) {
                info!(user_id = %user_id, "Applied midnight reset");
            }
            let rolled_over = record.clone();

            match op(&mut record, now) {
                Ok(value) => {
                    let checked = record.check_invariants(policy);
                    debug_assert!(checked.is_ok(), "{} broke a quota invariant: {:?}", operation, checked);
                    if let Err(violation) = checked {
                        error!(
                            user_id = %user_id,
                            operation,
                            violation = %violation,
                            "Quota invariant violated, aborting mutation"
                        );
                        outcome = Some(Err(QuotaError::InvariantViolated(violation)));
                        return None;
                    }
                    outcome = Some(Ok((value, record.snapshot(policy))));
                }
                Err(rejection) => {
                    record = rolled_over;
                    outcome = Some(Err(QuotaError::Rejected(rejection)));
                }
            }

            if current == Some(&record) {
                None
            } else {
                Some(record)
            }
        };

        let committed = self.store.update(&self.user_id, &mut mutation).await;

        let result = match committed {
            Err(e) => {
                warn!(user_id = %self.user_id, operation, error = %e, "Quota update failed");
                Err(QuotaError::Store(e))
            }
            Ok(written) => {
                let result = outcome.unwrap_or_else(|| {
                    Err(QuotaError::InvariantViolated(format!(
                        "store completed {} without running the mutation",
                        operation
                    )))
                });
                match &result {
                    Ok(_) if written => {
                        debug!(user_id = %self.user_id, operation, "Quota update committed");
                        record_operation(operation, "committed");
                    }
                    Ok(_) => record_operation(operation, "unchanged"),
                    Err(QuotaError::Rejected(rejection)) => {
                        warn!(
                            user_id = %self.user_id,
                            operation,
                            reason = rejection.code(),
                            "Quota operation rejected: {}",
                            rejection
                        );
                    }
                    Err(_) => {}
                }
                result
            }
        };

        if let Err(e) = &result {
            record_operation(operation, e.outcome_label());
        }
        result
    }
}

/// Bring a stored record written under a different policy back into range.
fn repair_stored(stored: QuotaRecord, policy: &QuotaPolicy, user_id: &str) -> QuotaRecord {
    match stored.check_invariants(policy) {
        Ok(()) => stored,
        Err(violation) => {
            warn!(user_id = %user_id, violation = %violation, "Stored quota record out of range, clamping");
            stored.sanitized(policy)
        }
    }
}
