//! Business-rule rejection reasons.
//!
//! A rejection is an expected outcome (the UI shows a message), never an
//! infrastructure failure. A rejected operation leaves the record unchanged.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a quota operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Rejection {
    #[error("Amount must be greater than zero (got {requested})")]
    InvalidAmount { requested: i64 },

    #[error("Insufficient wallet: need {requested} minutes, have {available}")]
    InsufficientWallet { requested: u32, available: u32 },

    #[error("Wallet is full: {wallet} of {max} minutes")]
    WalletFull { wallet: u32, max: u32 },

    #[error("Already at the maximum daily limit of {max} minutes")]
    AtDailyMaximum { max: u32 },

    #[error("Invalid new limit {requested}: must be at least {base} and below {current}")]
    InvalidLimitTarget {
        requested: i64,
        base: u32,
        current: u32,
    },

    #[error("No applied time to return to the wallet")]
    NothingToReduce,

    #[error("Unlock sequence timed out, please start again")]
    UnlockTimedOut,
}

impl Rejection {
    /// Stable reason code for callers that map rejections to UI copy.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::InsufficientWallet { .. } => "insufficient_wallet",
            Self::WalletFull { .. } => "wallet_full",
            Self::AtDailyMaximum { .. } => "at_daily_maximum",
            Self::InvalidLimitTarget { .. } => "invalid_limit_target",
            Self::NothingToReduce => "nothing_to_reduce",
            Self::UnlockTimedOut => "unlock_timed_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_serde_tag() {
        let cases = [
            Rejection::InvalidAmount { requested: 0 },
            Rejection::InsufficientWallet {
                requested: 30,
                available: 15,
            },
            Rejection::WalletFull { wallet: 180, max: 180 },
            Rejection::AtDailyMaximum { max: 120 },
            Rejection::InvalidLimitTarget {
                requested: 10,
                base: 60,
                current: 90,
            },
            Rejection::NothingToReduce,
            Rejection::UnlockTimedOut,
        ];

        for rejection in cases {
            let json = serde_json::to_value(&rejection).unwrap();
            assert_eq!(json["code"], rejection.code());
        }
    }

    #[test]
    fn test_message_mentions_amounts() {
        let msg = Rejection::InsufficientWallet {
            requested: 30,
            available: 15,
        }
        .to_string();
        assert!(msg.contains("30"));
        assert!(msg.contains("15"));
    }
}
