//! Quota policy configuration.
//!
//! All business constants of the watch-time economy live in one struct so the
//! values that differed between app revisions (daily ceiling, per-ad credit,
//! whether the wallet clears at midnight) are explicit configuration rather
//! than scattered literals.

use std::time::Duration;

use thiserror::Error;

/// Default parent-configured daily allowance (1 hour).
pub const DEFAULT_BASE_MINUTES: u32 = 60;

/// Default ceiling for base + applied bonus (2 hours).
pub const DEFAULT_MAX_DAILY_MINUTES: u32 = 120;

/// Default wallet capacity (3 hours).
pub const DEFAULT_MAX_WALLET_MINUTES: u32 = 180;

/// Default minutes credited per rewarded ad.
pub const DEFAULT_WALLET_EARN_PER_AD: u32 = 15;

/// Default number of consecutive ads required for a bonus reset.
pub const DEFAULT_UNLOCK_ADS_REQUIRED: u32 = 3;

/// Default maximum gap between the first ad of an unlock attempt and the next.
pub const DEFAULT_UNLOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default used-time threshold at which the unlock ceremony is offered.
pub const DEFAULT_UNLOCK_TRIGGER_MINUTES: u32 = 120;

/// Milliseconds per minute.
pub const MILLIS_PER_MINUTE: u64 = 60_000;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),
}

/// Business constants for the watch-time quota economy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Ceiling for `base + applied` in minutes.
    pub max_daily_minutes: u32,
    /// Wallet capacity in minutes.
    pub max_wallet_minutes: u32,
    /// Base limit applied on first access and after each midnight reset.
    pub default_base_minutes: u32,
    /// Minutes credited per qualifying rewarded ad.
    pub wallet_earn_per_ad: u32,
    /// Consecutive ads needed to complete an unlock sequence.
    pub unlock_ads_required: u32,
    /// Maximum age of an unlock sequence before it times out.
    pub unlock_timeout: Duration,
    /// Used minutes at which the UI should offer the unlock sequence.
    pub unlock_trigger_minutes: u32,
    /// Whether the midnight reset empties the wallet.
    pub clear_wallet_at_midnight: bool,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            max_daily_minutes: DEFAULT_MAX_DAILY_MINUTES,
            max_wallet_minutes: DEFAULT_MAX_WALLET_MINUTES,
            default_base_minutes: DEFAULT_BASE_MINUTES,
            wallet_earn_per_ad: DEFAULT_WALLET_EARN_PER_AD,
            unlock_ads_required: DEFAULT_UNLOCK_ADS_REQUIRED,
            unlock_timeout: DEFAULT_UNLOCK_TIMEOUT,
            unlock_trigger_minutes: DEFAULT_UNLOCK_TRIGGER_MINUTES,
            clear_wallet_at_midnight: true,
        }
    }
}

impl QuotaPolicy {
    /// Create policy from environment variables, falling back to defaults.
    ///
    /// Unparseable values are an error, not a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let policy = Self {
            max_daily_minutes: env_parse(
                "WATCHTIME_MAX_DAILY_MINUTES",
                defaults.max_daily_minutes,
            )?,
            max_wallet_minutes: env_parse(
                "WATCHTIME_MAX_WALLET_MINUTES",
                defaults.max_wallet_minutes,
            )?,
            default_base_minutes: env_parse(
                "WATCHTIME_DEFAULT_BASE_MINUTES",
                defaults.default_base_minutes,
            )?,
            wallet_earn_per_ad: env_parse(
                "WATCHTIME_WALLET_EARN_PER_AD",
                defaults.wallet_earn_per_ad,
            )?,
            unlock_ads_required: env_parse(
                "WATCHTIME_UNLOCK_ADS_REQUIRED",
                defaults.unlock_ads_required,
            )?,
            unlock_timeout: Duration::from_secs(env_parse(
                "WATCHTIME_UNLOCK_TIMEOUT_SECS",
                defaults.unlock_timeout.as_secs(),
            )?),
            unlock_trigger_minutes: env_parse(
                "WATCHTIME_UNLOCK_TRIGGER_MINUTES",
                defaults.unlock_trigger_minutes,
            )?,
            clear_wallet_at_midnight: env_bool(
                "WATCHTIME_CLEAR_WALLET_AT_MIDNIGHT",
                defaults.clear_wallet_at_midnight,
            )?,
        };

        policy.validate()?;
        Ok(policy)
    }

    /// Check that the constants are mutually consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_daily_minutes == 0 {
            return Err(ConfigError::InvalidPolicy(
                "max_daily_minutes must be at least 1".to_string(),
            ));
        }
        if self.default_base_minutes == 0 || self.default_base_minutes > self.max_daily_minutes {
            return Err(ConfigError::InvalidPolicy(format!(
                "default_base_minutes must be in 1..={} (got {})",
                self.max_daily_minutes, self.default_base_minutes
            )));
        }
        if self.wallet_earn_per_ad == 0 || self.wallet_earn_per_ad > self.max_wallet_minutes {
            return Err(ConfigError::InvalidPolicy(format!(
                "wallet_earn_per_ad must be in 1..={} (got {})",
                self.max_wallet_minutes, self.wallet_earn_per_ad
            )));
        }
        if self.unlock_ads_required == 0 {
            return Err(ConfigError::InvalidPolicy(
                "unlock_ads_required must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp a requested base limit into `[1, max_daily_minutes]`.
    pub fn clamp_base(&self, minutes: i64) -> u32 {
        minutes.clamp(1, self.max_daily_minutes as i64) as u32
    }

    /// Unlock timeout in milliseconds.
    pub fn unlock_timeout_millis(&self) -> i64 {
        self.unlock_timeout.as_millis() as i64
    }
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        _ => Ok(default),
    }
}

/// Read a boolean switch (`1/0`, `true/false`, `yes/no`, `on/off`).
/// Unset or blank gives `default`; anything else is `InvalidValue`.
pub fn env_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
        _ => Ok(default),
    }
}
