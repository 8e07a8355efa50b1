//! Engine configuration.

use std::path::PathBuf;

use watchtime_models::{env_bool, ConfigError, QuotaPolicy};

/// Everything needed to build stores and engines for a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub policy: QuotaPolicy,
    /// Directory for the local store. `None` keeps records in memory.
    pub data_dir: Option<PathBuf>,
    /// Whether to connect to Firestore for migrated users.
    pub remote_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: QuotaPolicy::default(),
            data_dir: None,
            remote_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Load from `WATCHTIME_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let policy = QuotaPolicy::from_env()?;

        let data_dir = std::env::var("WATCHTIME_DATA_DIR")
            .ok()
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);

        let remote_enabled = env_bool("WATCHTIME_REMOTE_ENABLED", false)?;

        Ok(Self {
            policy,
            data_dir,
            remote_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "WATCHTIME_DATA_DIR",
            "WATCHTIME_REMOTE_ENABLED",
            "WATCHTIME_MAX_DAILY_MINUTES",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_overrides() {
        clear_env();
        std::env::set_var("WATCHTIME_DATA_DIR", "/var/lib/watchtime");
        std::env::set_var("WATCHTIME_REMOTE_ENABLED", "TRUE");
        std::env::set_var("WATCHTIME_MAX_DAILY_MINUTES", "90");

        let config = EngineConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/watchtime")));
        assert!(config.remote_enabled);
        assert_eq!(config.policy.max_daily_minutes, 90);
    }

    #[test]
    #[serial]
    fn test_invalid_remote_flag_is_rejected() {
        clear_env();
        std::env::set_var("WATCHTIME_REMOTE_ENABLED", "maybe");
        let err = EngineConfig::from_env().unwrap_err();
        clear_env();

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "WATCHTIME_REMOTE_ENABLED",
                ..
            }
        ));
    }

    #[test]
    #[serial]
    fn test_remote_flag_accepts_switch_words() {
        clear_env();
        std::env::set_var("WATCHTIME_REMOTE_ENABLED", " on ");
        assert!(EngineConfig::from_env().unwrap().remote_enabled);

        std::env::set_var("WATCHTIME_REMOTE_ENABLED", "");
        assert!(!EngineConfig::from_env().unwrap().remote_enabled);
        clear_env();
    }
}
