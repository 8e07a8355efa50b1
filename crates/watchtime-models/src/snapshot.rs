//! Read-only quota projection for display.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Display projection of a [`QuotaRecord`](crate::QuotaRecord).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuotaSnapshot {
    pub base_limit_minutes: u32,
    pub applied_bonus_minutes: u32,
    pub wallet_minutes: u32,
    pub used_minutes: u32,
    pub effective_limit_minutes: u32,
    pub remaining_minutes: u32,
    pub unlock_ad_count: u32,
}

impl QuotaSnapshot {
    /// Format as `"Used today: HH:MM / HH:MM"`.
    pub fn display_string(&self) -> String {
        format!(
            "Used today: {} / {}",
            format_hours_minutes(self.used_minutes),
            format_hours_minutes(self.effective_limit_minutes)
        )
    }
}

/// Format a minute count as zero-padded `HH:MM`.
pub fn format_hours_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hours_minutes() {
        assert_eq!(format_hours_minutes(0), "00:00");
        assert_eq!(format_hours_minutes(75), "01:15");
        assert_eq!(format_hours_minutes(120), "02:00");
    }

    #[test]
    fn test_display_string() {
        let snapshot = QuotaSnapshot {
            base_limit_minutes: 60,
            applied_bonus_minutes: 15,
            wallet_minutes: 0,
            used_minutes: 42,
            effective_limit_minutes: 75,
            remaining_minutes: 33,
            unlock_ad_count: 0,
        };
        assert_eq!(snapshot.display_string(), "Used today: 00:42 / 01:15");
    }
}
