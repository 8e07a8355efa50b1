//! State transitions shared by several engine operations.

use chrono::{DateTime, Utc};

use watchtime_models::{BonusReset, QuotaPolicy, QuotaRecord};

use crate::clock::Clock;

/// Whether the record belongs to an earlier local day than `now`.
///
/// A record that has never been reset always needs one. A `last_reset_at`
/// in the future (clock moved backwards) does not trigger a reset.
pub(crate) fn needs_midnight_reset(record: &QuotaRecord, clock: &dyn Clock, now: DateTime<Utc>) -> bool {
    let Some(last_reset) = record.last_reset_at else {
        return true;
    };

    let today = clock.day_start(now);
    now >= today && today > clock.day_start(last_reset)
}

/// Zero every daily-scoped field and stamp the reset instant.
pub(crate) fn apply_midnight_reset(record: &mut QuotaRecord, policy: &QuotaPolicy, now: DateTime<Utc>) {
    record.used_millis = 0;
    record.applied_bonus_minutes = 0;
    if policy.clear_wallet_at_midnight {
        record.wallet_minutes = 0;
    }
    record.base_limit_minutes = policy.default_base_minutes;
    record.unlock_ad_count = 0;
    record.unlock_started_at = None;
    record.last_reset_at = Some(now);
}

/// Run the midnight reset if a day boundary has passed. Returns whether it ran.
pub(crate) fn roll_over_if_needed(
    record: &mut QuotaRecord,
    policy: &QuotaPolicy,
    clock: &dyn Clock,
    now: DateTime<Utc>,
) -> bool {
    if needs_midnight_reset(record, clock, now) {
        apply_midnight_reset(record, policy, now);
        true
    } else {
        false
    }
}

/// Finish an unlock sequence: top the limit up from the wallet toward the
/// daily ceiling and restart today's usage.
///
/// A short wallet gives a partial top-up; usage and the ad counter are
/// cleared either way.
pub(crate) fn apply_bonus_reset(record: &mut QuotaRecord, policy: &QuotaPolicy) -> BonusReset {
    let needed = record.bonus_room_minutes(policy);
    let drawn = needed.min(record.wallet_minutes);

    record.wallet_minutes -= drawn;
    record.applied_bonus_minutes += drawn;
    record.used_millis = 0;
    record.unlock_ad_count = 0;
    record.unlock_started_at = None;

    BonusReset {
        drawn_from_wallet: drawn,
        shortfall_minutes: needed - drawn,
        target_limit_minutes: policy.max_daily_minutes,
    }
}
