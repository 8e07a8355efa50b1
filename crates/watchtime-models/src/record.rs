//! Per-user quota record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::policy::{QuotaPolicy, MILLIS_PER_MINUTE};
use crate::snapshot::QuotaSnapshot;

/// Durable watch-time state for one user.
///
/// The engine is the only writer. Every committed mutation must leave the
/// record satisfying [`QuotaRecord::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuotaRecord {
    /// Parent-configured daily allowance in minutes.
    pub base_limit_minutes: u32,

    /// Wallet minutes committed to today's limit.
    pub applied_bonus_minutes: u32,

    /// Earned but uncommitted minutes.
    pub wallet_minutes: u32,

    /// Playback time consumed today.
    pub used_millis: u64,

    /// Instant of the last midnight reset (`None` if never reset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reset_at: Option<DateTime<Utc>>,

    /// Consecutive qualifying ads watched toward a bonus reset.
    pub unlock_ad_count: u32,

    /// Start of the current unlock attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_started_at: Option<DateTime<Utc>>,
}

impl QuotaRecord {
    /// Fresh record for a user seen for the first time.
    pub fn new(policy: &QuotaPolicy) -> Self {
        Self {
            base_limit_minutes: policy.default_base_minutes,
            applied_bonus_minutes: 0,
            wallet_minutes: 0,
            used_millis: 0,
            last_reset_at: None,
            unlock_ad_count: 0,
            unlock_started_at: None,
        }
    }

    /// `min(base + applied, max_daily_minutes)`.
    pub fn effective_limit_minutes(&self, policy: &QuotaPolicy) -> u32 {
        self.base_limit_minutes
            .saturating_add(self.applied_bonus_minutes)
            .min(policy.max_daily_minutes)
    }

    pub fn effective_limit_millis(&self, policy: &QuotaPolicy) -> u64 {
        self.effective_limit_minutes(policy) as u64 * MILLIS_PER_MINUTE
    }

    /// Whole minutes used today (floored).
    pub fn used_minutes(&self) -> u32 {
        (self.used_millis / MILLIS_PER_MINUTE) as u32
    }

    pub fn remaining_minutes(&self, policy: &QuotaPolicy) -> u32 {
        self.effective_limit_minutes(policy)
            .saturating_sub(self.used_minutes())
    }

    pub fn is_limit_exceeded(&self, policy: &QuotaPolicy) -> bool {
        self.used_millis >= self.effective_limit_millis(policy)
    }

    /// Minutes that can still be added to `applied` before hitting the ceiling.
    pub fn bonus_room_minutes(&self, policy: &QuotaPolicy) -> u32 {
        policy
            .max_daily_minutes
            .saturating_sub(self.base_limit_minutes.saturating_add(self.applied_bonus_minutes))
    }

    /// Pull `used_millis` back under the effective limit after the limit shrank.
    pub fn clamp_used_to_limit(&mut self, policy: &QuotaPolicy) {
        self.used_millis = self.used_millis.min(self.effective_limit_millis(policy));
    }

    /// Verify the record invariants, describing the first violation found.
    pub fn check_invariants(&self, policy: &QuotaPolicy) -> Result<(), String> {
        if self.base_limit_minutes == 0 || self.base_limit_minutes > policy.max_daily_minutes {
            return Err(format!(
                "base limit {} outside 1..={}",
                self.base_limit_minutes, policy.max_daily_minutes
            ));
        }
        let committed = self.base_limit_minutes as u64 + self.applied_bonus_minutes as u64;
        if committed > policy.max_daily_minutes as u64 {
            return Err(format!(
                "base {} + applied {} exceeds daily maximum {}",
                self.base_limit_minutes, self.applied_bonus_minutes, policy.max_daily_minutes
            ));
        }
        if self.wallet_minutes > policy.max_wallet_minutes {
            return Err(format!(
                "wallet {} exceeds maximum {}",
                self.wallet_minutes, policy.max_wallet_minutes
            ));
        }
        if self.used_millis > self.effective_limit_millis(policy) {
            return Err(format!(
                "used {}ms exceeds effective limit {}ms",
                self.used_millis,
                self.effective_limit_millis(policy)
            ));
        }
        if self.unlock_ad_count > policy.unlock_ads_required {
            return Err(format!(
                "unlock ad count {} exceeds required {}",
                self.unlock_ad_count, policy.unlock_ads_required
            ));
        }
        Ok(())
    }

    /// Force every field into its valid range.
    ///
    /// The engine applies this to any loaded record that fails
    /// [`Self::check_invariants`], and migration applies it to the local
    /// record, so out-of-range stored values are repaired rather than refused.
    pub fn sanitized(&self, policy: &QuotaPolicy) -> Self {
        let base_limit_minutes = self.base_limit_minutes.clamp(1, policy.max_daily_minutes);
        let mut record = Self {
            base_limit_minutes,
            applied_bonus_minutes: self
                .applied_bonus_minutes
                .min(policy.max_daily_minutes - base_limit_minutes),
            wallet_minutes: self.wallet_minutes.min(policy.max_wallet_minutes),
            used_millis: self.used_millis,
            last_reset_at: self.last_reset_at,
            unlock_ad_count: self.unlock_ad_count.min(policy.unlock_ads_required),
            unlock_started_at: self.unlock_started_at,
        };
        record.clamp_used_to_limit(policy);
        record
    }

    /// Read-only projection for display.
    pub fn snapshot(&self, policy: &QuotaPolicy) -> QuotaSnapshot {
        QuotaSnapshot {
            base_limit_minutes: self.base_limit_minutes,
            applied_bonus_minutes: self.applied_bonus_minutes,
            wallet_minutes: self.wallet_minutes,
            used_minutes: self.used_minutes(),
            effective_limit_minutes: self.effective_limit_minutes(policy),
            remaining_minutes: self.remaining_minutes(policy),
            unlock_ad_count: self.unlock_ad_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(base: u32, applied: u32, wallet: u32, used_millis: u64) -> QuotaRecord {
        QuotaRecord {
            base_limit_minutes: base,
            applied_bonus_minutes: applied,
            wallet_minutes: wallet,
            used_millis,
            ..QuotaRecord::new(&QuotaPolicy::default())
        }
    }

    #[test]
    fn test_new_record_uses_policy_default_base() {
        let policy = QuotaPolicy {
            default_base_minutes: 45,
            ..Default::default()
        };
        let rec = QuotaRecord::new(&policy);
        assert_eq!(rec.base_limit_minutes, 45);
        assert_eq!(rec.wallet_minutes, 0);
        assert!(rec.last_reset_at.is_none());
        assert!(rec.check_invariants(&policy).is_ok());
    }

    #[test]
    fn test_effective_limit_is_capped() {
        let policy = QuotaPolicy::default();
        for base in [1u32, 30, 60, 119, 120] {
            for applied in [0u32, 1, 30, 60, 119] {
                let rec = record(base, applied, 0, 0);
                assert_eq!(
                    rec.effective_limit_minutes(&policy),
                    (base + applied).min(120)
                );
            }
        }
    }

    #[test]
    fn test_remaining_floors_used_minutes() {
        let policy = QuotaPolicy::default();
        let rec = record(60, 0, 0, 59_999);
        assert_eq!(rec.used_minutes(), 0);
        assert_eq!(rec.remaining_minutes(&policy), 60);

        let rec = record(60, 0, 0, 60 * 60_000);
        assert_eq!(rec.remaining_minutes(&policy), 0);
        assert!(rec.is_limit_exceeded(&policy));
    }

    #[test]
    fn test_bonus_room() {
        let policy = QuotaPolicy::default();
        assert_eq!(record(60, 0, 0, 0).bonus_room_minutes(&policy), 60);
        assert_eq!(record(60, 60, 0, 0).bonus_room_minutes(&policy), 0);
        assert_eq!(record(100, 10, 0, 0).bonus_room_minutes(&policy), 10);
    }

    #[test]
    fn test_invariant_violations_are_reported() {
        let policy = QuotaPolicy::default();
        assert!(record(100, 30, 0, 0).check_invariants(&policy).is_err());
        assert!(record(60, 0, 181, 0).check_invariants(&policy).is_err());
        assert!(record(60, 0, 0, 61 * 60_000).check_invariants(&policy).is_err());
        assert!(record(0, 0, 0, 0).check_invariants(&policy).is_err());
    }

    #[test]
    fn test_sanitized_brings_record_into_range() {
        let policy = QuotaPolicy::default();
        let mut rec = record(180, 90, 500, 999 * 60_000);
        rec.unlock_ad_count = 7;

        let clean = rec.sanitized(&policy);
        assert_eq!(clean.base_limit_minutes, 120);
        assert_eq!(clean.applied_bonus_minutes, 0);
        assert_eq!(clean.wallet_minutes, 180);
        assert_eq!(clean.used_millis, 120 * 60_000);
        assert_eq!(clean.unlock_ad_count, 3);
        assert!(clean.check_invariants(&policy).is_ok());
    }

    #[test]
    fn test_json_round_trip_omits_absent_instants() {
        let rec = record(60, 15, 30, 1_000);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("last_reset_at"));
        let back: QuotaRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
