//! Playback session timer.

use chrono::{DateTime, Utc};
use watchtime_models::QuotaSnapshot;

use crate::engine::QuotaEngine;
use crate::error::QuotaResult;

/// Start instant of a playback session, handed back to [`SessionTimer::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken(DateTime<Utc>);

impl SessionToken {
    pub fn started_at(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Turns playback start/stop events into usage deltas.
#[derive(Clone)]
pub struct SessionTimer {
    engine: QuotaEngine,
}

impl SessionTimer {
    pub fn new(engine: QuotaEngine) -> Self {
        Self { engine }
    }

    pub fn start(&self) -> SessionToken {
        SessionToken(self.engine.clock().now())
    }

    /// Record the time elapsed since `token`.
    ///
    /// Returns `None` without touching the store if no time has elapsed
    /// (including a clock that moved backwards).
    pub async fn stop(&self, token: SessionToken) -> QuotaResult<Option<QuotaSnapshot>> {
        let elapsed = (self.engine.clock().now() - token.0).num_milliseconds();
        if elapsed <= 0 {
            return Ok(None);
        }
        self.engine.record_playback_delta(elapsed).await.map(Some)
    }

    /// Report playback time during a session without stopping it.
    pub async fn add_incremental(&self, millis: i64) -> QuotaResult<QuotaSnapshot> {
        self.engine.record_playback_delta(millis).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use watchtime_models::QuotaPolicy;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::LocalQuotaStore;

    fn timer() -> (SessionTimer, Arc<ManualClock>) {
        let now = DateTime::parse_from_rfc3339("2026-10-16T16:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(ManualClock::utc(now));
        let engine = QuotaEngine::new(
            Arc::new(LocalQuotaStore::in_memory()),
            clock.clone(),
            QuotaPolicy::default(),
            "kid-1",
        );
        (SessionTimer::new(engine), clock)
    }

    #[tokio::test]
    async fn test_stop_records_elapsed_time() {
        let (timer, clock) = timer();
        let token = timer.start();
        clock.advance(Duration::minutes(12));

        let snapshot = timer.stop(token).await.unwrap().unwrap();
        assert_eq!(snapshot.used_minutes, 12);
        assert_eq!(snapshot.remaining_minutes, 48);
    }

    #[tokio::test]
    async fn test_stop_ignores_non_positive_elapsed() {
        let (timer, clock) = timer();
        let token = timer.start();
        assert!(timer.stop(token).await.unwrap().is_none());

        clock.advance(Duration::minutes(-5));
        assert!(timer.stop(token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incremental_ticks_accumulate() {
        let (timer, _) = timer();
        for _ in 0..6 {
            timer.add_incremental(10_000).await.unwrap();
        }
        let snapshot = timer.add_incremental(0).await.unwrap();
        assert_eq!(snapshot.used_minutes, 1);
    }
}
