//! Success values returned by quota operations.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::rejection::Rejection;
use crate::snapshot::{format_hours_minutes, QuotaSnapshot};

/// Result of moving wallet minutes into today's limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WalletApplication {
    /// Minutes the caller asked for.
    pub requested_minutes: u32,
    /// Minutes actually applied; less than requested when the daily ceiling was hit.
    pub applied_minutes: u32,
    pub snapshot: QuotaSnapshot,
}

impl WalletApplication {
    pub fn is_partial(&self) -> bool {
        self.applied_minutes < self.requested_minutes
    }
}

/// Result of lowering today's effective limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LimitReduction {
    /// Minutes removed from the applied bonus.
    pub released_minutes: u32,
    /// Minutes that landed in the wallet (may be less if the wallet was near its cap).
    pub returned_to_wallet: u32,
    pub snapshot: QuotaSnapshot,
}

/// Outcome of the bonus-reset transition that ends an unlock sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BonusReset {
    /// Minutes drawn from the wallet into the applied bonus.
    pub drawn_from_wallet: u32,
    /// Minutes still missing to reach the daily ceiling.
    pub shortfall_minutes: u32,
    /// The configured daily ceiling the reset aimed for.
    pub target_limit_minutes: u32,
}

impl BonusReset {
    pub fn reached_target(&self) -> bool {
        self.shortfall_minutes == 0
    }
}

/// Where an unlock sequence stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnlockState {
    Idle,
    InProgress { count: u32, required: u32 },
}

impl UnlockState {
    pub fn from_count(count: u32, required: u32) -> Self {
        if count == 0 {
            Self::Idle
        } else {
            Self::InProgress { count, required }
        }
    }
}

/// Outcome of registering one qualifying ad toward an unlock sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnlockOutcome {
    /// More ads are needed.
    Progress {
        count: u32,
        required: u32,
        snapshot: QuotaSnapshot,
    },
    /// The sequence finished and the bonus reset was applied.
    Completed {
        reset: BonusReset,
        snapshot: QuotaSnapshot,
    },
    /// Too much time passed since the sequence started; the count restarted at zero.
    TimedOut { snapshot: QuotaSnapshot },
}

impl UnlockOutcome {
    /// Whether the ad counted (progress or completion).
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::TimedOut { .. })
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Failure reason for an ad that did not count.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::TimedOut { .. } => Some(Rejection::UnlockTimedOut),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> &QuotaSnapshot {
        match self {
            Self::Progress { snapshot, .. }
            | Self::Completed { snapshot, .. }
            | Self::TimedOut { snapshot } => snapshot,
        }
    }

    /// User-facing message for this outcome.
    pub fn message(&self) -> String {
        match self {
            Self::Progress {
                count, required, ..
            } => format!(
                "Ads watched: {}/{}. Watch {} more ad(s).",
                count,
                required,
                required.saturating_sub(*count)
            ),
            Self::Completed { reset, .. } if reset.reached_target() => format!(
                "Reset complete! Daily time set to maximum ({}).",
                format_hours_minutes(reset.target_limit_minutes)
            ),
            Self::Completed { reset, .. } => format!(
                "Reset complete! Watch time restarted; {} minute(s) short of the {} maximum.",
                reset.shortfall_minutes,
                format_hours_minutes(reset.target_limit_minutes)
            ),
            Self::TimedOut { .. } => "Reset timed out. Please start again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> QuotaSnapshot {
        QuotaSnapshot {
            base_limit_minutes: 60,
            applied_bonus_minutes: 0,
            wallet_minutes: 0,
            used_minutes: 0,
            effective_limit_minutes: 60,
            remaining_minutes: 60,
            unlock_ad_count: 1,
        }
    }

    #[test]
    fn test_progress_message() {
        let outcome = UnlockOutcome::Progress {
            count: 1,
            required: 3,
            snapshot: snapshot(),
        };
        assert!(outcome.is_success());
        assert!(!outcome.is_complete());
        assert_eq!(outcome.message(), "Ads watched: 1/3. Watch 2 more ad(s).");
    }

    #[test]
    fn test_completed_messages() {
        let full = UnlockOutcome::Completed {
            reset: BonusReset {
                drawn_from_wallet: 60,
                shortfall_minutes: 0,
                target_limit_minutes: 120,
            },
            snapshot: snapshot(),
        };
        assert!(full.message().contains("02:00"));

        let partial = UnlockOutcome::Completed {
            reset: BonusReset {
                drawn_from_wallet: 15,
                shortfall_minutes: 45,
                target_limit_minutes: 120,
            },
            snapshot: snapshot(),
        };
        assert!(partial.is_success());
        assert!(partial.message().contains("45"));
    }

    #[test]
    fn test_timed_out_is_not_success() {
        let outcome = UnlockOutcome::TimedOut {
            snapshot: snapshot(),
        };
        assert!(!outcome.is_success());
        assert_eq!(outcome.rejection(), Some(Rejection::UnlockTimedOut));
    }

    #[test]
    fn test_unlock_state_from_count() {
        assert_eq!(UnlockState::from_count(0, 3), UnlockState::Idle);
        assert_eq!(
            UnlockState::from_count(2, 3),
            UnlockState::InProgress { count: 2, required: 3 }
        );
    }

    #[test]
    fn test_partial_wallet_application() {
        let application = WalletApplication {
            requested_minutes: 60,
            applied_minutes: 45,
            snapshot: snapshot(),
        };
        assert!(application.is_partial());
    }
}
