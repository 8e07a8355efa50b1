//! Ad-unlock sequencer.
//!
//! Watching `unlock_ads_required` qualifying ads within the timeout window
//! completes a bonus reset: the limit is topped up from the wallet and
//! today's usage restarts. The timeout is checked when the next ad is
//! registered; there is no background timer.

use tracing::info;

use watchtime_models::{BonusReset, UnlockOutcome, UnlockState};

use crate::engine::QuotaEngine;
use crate::error::QuotaResult;
use crate::transitions;

enum Step {
    Progress(u32),
    Completed(BonusReset),
    TimedOut,
}

/// Tracks consecutive ad watches toward a bonus reset.
#[derive(Clone)]
pub struct AdUnlockSequencer {
    engine: QuotaEngine,
}

impl AdUnlockSequencer {
    pub fn new(engine: QuotaEngine) -> Self {
        Self { engine }
    }

    /// Register one completed qualifying ad.
    ///
    /// If the current attempt is older than the timeout, the counter is
    /// cleared and committed, and [`UnlockOutcome::TimedOut`] is returned
    /// without counting this ad.
    pub async fn register_ad_watch(&self) -> QuotaResult<UnlockOutcome> {
        let policy = self.engine.policy();
        let timeout_ms = policy.unlock_timeout_millis();
        let required = policy.unlock_ads_required;

        let (step, snapshot) = self
            .engine
            .transact("register_ad_watch", |record, now| {
                if record.unlock_ad_count > 0 {
                    if let Some(started) = record.unlock_started_at {
                        if (now - started).num_milliseconds() > timeout_ms {
                            record.unlock_ad_count = 0;
                            record.unlock_started_at = None;
                            return Ok(Step::TimedOut);
                        }
                    }
                }

                record.unlock_ad_count += 1;
                if record.unlock_ad_count == 1 || record.unlock_started_at.is_none() {
                    record.unlock_started_at = Some(now);
                }

                if record.unlock_ad_count >= required {
                    Ok(Step::Completed(transitions::apply_bonus_reset(record, policy)))
                } else {
                    Ok(Step::Progress(record.unlock_ad_count))
                }
            })
            .await?;

        let user_id = self.engine.user_id();
        let outcome = match step {
            Step::Progress(count) => {
                info!(user_id = %user_id, count, required, "Unlock ad registered");
                UnlockOutcome::Progress {
                    count,
                    required,
                    snapshot,
                }
            }
            Step::Completed(reset) => {
                info!(
                    user_id = %user_id,
                    drawn = reset.drawn_from_wallet,
                    shortfall = reset.shortfall_minutes,
                    "Unlock sequence complete, bonus reset applied"
                );
                UnlockOutcome::Completed { reset, snapshot }
            }
            Step::TimedOut => {
                info!(user_id = %user_id, "Unlock sequence timed out");
                UnlockOutcome::TimedOut { snapshot }
            }
        };
        Ok(outcome)
    }

    /// Abandon the current attempt. Returns `false` if none was in progress.
    pub async fn cancel(&self) -> QuotaResult<bool> {
        let (cancelled, _) = self
            .engine
            .transact("cancel_unlock", |record, _| {
                if record.unlock_ad_count == 0 {
                    return Ok(false);
                }
                record.unlock_ad_count = 0;
                record.unlock_started_at = None;
                Ok(true)
            })
            .await?;

        if cancelled {
            info!(user_id = %self.engine.user_id(), "Unlock sequence cancelled");
        }
        Ok(cancelled)
    }

    /// Ads counted toward the current attempt.
    pub async fn progress(&self) -> u32 {
        self.engine.snapshot().await.unlock_ad_count
    }

    pub async fn state(&self) -> UnlockState {
        UnlockState::from_count(self.progress().await, self.engine.policy().unlock_ads_required)
    }

    /// `"Ads watched: n/N"`.
    pub async fn progress_message(&self) -> String {
        format!(
            "Ads watched: {}/{}",
            self.progress().await,
            self.engine.policy().unlock_ads_required
        )
    }

    /// Prompt shown when the unlock sequence becomes available.
    pub fn trigger_message(&self) -> String {
        let policy = self.engine.policy();
        format!(
            "You've watched {} minutes today. Watch {} ads to reset your time.",
            policy.unlock_trigger_minutes, policy.unlock_ads_required
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};
    use watchtime_models::QuotaPolicy;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::LocalQuotaStore;

    fn sequencer() -> (AdUnlockSequencer, QuotaEngine, Arc<ManualClock>) {
        let now = DateTime::parse_from_rfc3339("2026-10-16T18:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(ManualClock::utc(now));
        let engine = QuotaEngine::new(
            Arc::new(LocalQuotaStore::in_memory()),
            clock.clone(),
            QuotaPolicy::default(),
            "kid-1",
        );
        (AdUnlockSequencer::new(engine.clone()), engine, clock)
    }

    #[tokio::test]
    async fn test_cancel_without_progress_is_noop() {
        let (sequencer, _, _) = sequencer();
        assert!(!sequencer.cancel().await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_clears_progress() {
        let (sequencer, _, _) = sequencer();
        sequencer.register_ad_watch().await.unwrap();
        assert_eq!(sequencer.state().await, UnlockState::InProgress { count: 1, required: 3 });

        assert!(sequencer.cancel().await.unwrap());
        assert_eq!(sequencer.progress().await, 0);
        assert_eq!(sequencer.state().await, UnlockState::Idle);
    }

    #[tokio::test]
    async fn test_progress_message() {
        let (sequencer, _, clock) = sequencer();
        sequencer.register_ad_watch().await.unwrap();
        clock.advance(Duration::seconds(30));
        sequencer.register_ad_watch().await.unwrap();
        assert_eq!(sequencer.progress_message().await, "Ads watched: 2/3");
    }

    #[tokio::test]
    async fn test_timeout_is_measured_from_first_ad() {
        let (sequencer, _, clock) = sequencer();
        sequencer.register_ad_watch().await.unwrap();
        clock.advance(Duration::minutes(3));
        sequencer.register_ad_watch().await.unwrap();
        clock.advance(Duration::minutes(3));

        let outcome = sequencer.register_ad_watch().await.unwrap();
        assert!(matches!(outcome, UnlockOutcome::TimedOut { .. }));
        assert_eq!(outcome.snapshot().unlock_ad_count, 0);
    }

    #[tokio::test]
    async fn test_completion_tops_up_from_wallet() {
        let (sequencer, engine, _) = sequencer();
        for _ in 0..4 {
            engine.credit_wallet_for_ad_watch().await.unwrap();
        }
        engine.record_playback_delta(60 * 60_000).await.unwrap();
        assert!(engine.is_limit_exceeded().await);

        sequencer.register_ad_watch().await.unwrap();
        sequencer.register_ad_watch().await.unwrap();
        let outcome = sequencer.register_ad_watch().await.unwrap();

        let (reset, snapshot) = match outcome {
            UnlockOutcome::Completed { reset, snapshot } => (reset, snapshot),
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(reset.drawn_from_wallet, 60);
        assert!(reset.reached_target());
        assert_eq!(snapshot.effective_limit_minutes, 120);
        assert_eq!(snapshot.used_minutes, 0);
        assert_eq!(snapshot.wallet_minutes, 0);
        assert_eq!(snapshot.unlock_ad_count, 0);
        assert!(!engine.is_limit_exceeded().await);
    }

    #[test]
    fn test_trigger_message_uses_policy() {
        let (sequencer, _, _) = sequencer();
        let message = sequencer.trigger_message();
        assert!(message.contains("120 minutes"));
        assert!(message.contains("3 ads"));
    }
}
