//! Time source and calendar-day boundaries.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveTime, Offset, TimeZone, Utc};

/// Supplies the current instant and the local calendar-day floor.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Start of the local calendar day containing `instant`.
    fn day_start(&self, instant: DateTime<Utc>) -> DateTime<Utc>;
}

/// Device clock in the system's local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn day_start(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        local_day_start(&Local, instant)
    }
}

/// Settable clock with a fixed UTC offset.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Manual clock whose local day is the UTC day.
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, Utc.fix())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn day_start(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        local_day_start(&self.offset, instant)
    }
}

/// Local midnight of the day containing `instant`.
///
/// In zones where a DST jump skips midnight, the first valid local instant
/// of the day is used instead.
fn local_day_start<Tz: TimeZone>(tz: &Tz, instant: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = instant
        .with_timezone(tz)
        .date_naive()
        .and_time(NaiveTime::MIN);

    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_utc_day_start() {
        let clock = ManualClock::utc(at("2026-10-16T15:30:00Z"));
        assert_eq!(clock.day_start(clock.now()), at("2026-10-16T00:00:00Z"));
    }

    #[test]
    fn test_offset_day_start_uses_local_calendar() {
        // 01:30 UTC is still the previous evening at UTC-5.
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let clock = ManualClock::new(at("2026-10-16T01:30:00Z"), offset);
        assert_eq!(clock.day_start(clock.now()), at("2026-10-15T05:00:00Z"));
    }

    #[test]
    fn test_advance_and_set() {
        let clock = ManualClock::utc(at("2026-10-16T23:59:00Z"));
        clock.advance(Duration::minutes(2));
        assert_eq!(clock.now(), at("2026-10-17T00:01:00Z"));

        clock.set(at("2026-01-01T00:00:00Z"));
        assert_eq!(clock.now(), at("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn test_system_clock_day_start_not_after_now() {
        let clock = SystemClock;
        let now = clock.now();
        let start = clock.day_start(now);
        assert!(start <= now);
        assert!(now - start < Duration::hours(26));
    }
}
