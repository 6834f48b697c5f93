//! Read-only state derivation. Everything here is computed from the event
//! log on demand; there is no separately-mutated relay flag that could drift
//! from what the log says.

use serde::Serialize;

use crate::db::{DailySummary, Db, LogEntry, SensorEvent};
use crate::error::ApiError;

/// Inclusive bounds for the analytics day range.
pub const DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=30;

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub relay_state: bool,
    pub humidity: Option<i64>,
    pub last_reading_ts: Option<i64>,
    pub last_changed_ts: Option<i64>,
    pub today: TodayStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct TodayStats {
    pub toggle_count: i64,
    pub avg_humidity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TodayReport {
    pub day: String,
    pub toggle_count: i64,
    pub avg_humidity: f64,
    pub reading_count: usize,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Answers "what is true right now" against the event log. All operations
/// are side-effect-free and safe to call concurrently with the write path.
#[derive(Clone)]
pub struct Aggregator {
    db: Db,
}

impl Aggregator {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Relay state of the most recent event; false on an empty log.
    pub async fn current_relay_state(&self) -> Result<bool, ApiError> {
        Ok(self.db.current_relay_state().await?)
    }

    /// Humidity of the most recent event, or none if the log is empty.
    pub async fn latest_humidity(&self) -> Result<Option<i64>, ApiError> {
        Ok(self.db.latest_event().await?.map(|e| e.humidity))
    }

    /// Count of transitions to on within the current calendar day.
    pub async fn today_toggle_count(&self) -> Result<i64, ApiError> {
        Ok(self.db.toggle_count_on_day(&Db::today_yyyy_mm_dd()).await?)
    }

    /// Mean humidity over the day's events; 0.0 when there are none.
    pub async fn daily_average_humidity(&self, day: &str) -> Result<f64, ApiError> {
        Ok(self.db.avg_humidity_on_day(day).await?.unwrap_or(0.0))
    }

    /// The most recent events, newest first.
    pub async fn history(&self, limit: i64) -> Result<Vec<SensorEvent>, ApiError> {
        Ok(self.db.latest_events(limit).await?)
    }

    /// The most recent system-log entries, newest first, optionally filtered
    /// by category tag.
    pub async fn recent_logs(
        &self,
        limit: i64,
        category: Option<&str>,
    ) -> Result<Vec<LogEntry>, ApiError> {
        Ok(self.db.latest_logs(limit, category).await?)
    }

    /// Per-day summaries for the last `days` calendar days, most recent
    /// first. `days` must fall in [1, 30].
    pub async fn analytics(&self, days: i64) -> Result<Vec<DailySummary>, ApiError> {
        if !DAYS_RANGE.contains(&days) {
            return Err(ApiError::validation(
                "days",
                format!(
                    "{days} out of range [{}, {}]",
                    DAYS_RANGE.start(),
                    DAYS_RANGE.end()
                ),
            ));
        }
        Ok(self.db.daily_summaries(days).await?)
    }

    /// The full current-state snapshot served by /status.
    pub async fn status(&self) -> Result<Status, ApiError> {
        let latest = self.db.latest_event().await?;
        let today = Db::today_yyyy_mm_dd();

        Ok(Status {
            relay_state: latest.as_ref().map(|e| e.relay_state).unwrap_or(false),
            humidity: latest.as_ref().map(|e| e.humidity),
            last_reading_ts: latest.map(|e| e.ts),
            last_changed_ts: self.db.last_state_change().await?,
            today: TodayStats {
                toggle_count: self.today_toggle_count().await?,
                avg_humidity: self.daily_average_humidity(&today).await?,
            },
        })
    }

    /// Today's stats in isolation, with the number of readings recorded.
    pub async fn today_stats(&self) -> Result<TodayReport, ApiError> {
        let day = Db::today_yyyy_mm_dd();
        Ok(TodayReport {
            toggle_count: self.db.toggle_count_on_day(&day).await?,
            avg_humidity: self.daily_average_humidity(&day).await?,
            reading_count: self.db.events_on_day(&day).await?.len(),
            day,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now_unix;

    async fn test_aggregator() -> Aggregator {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        Aggregator::new(db)
    }

    // -- Empty-log defaults -------------------------------------------------

    #[tokio::test]
    async fn empty_log_defaults() {
        let agg = test_aggregator().await;

        assert!(!agg.current_relay_state().await.unwrap());
        assert_eq!(agg.latest_humidity().await.unwrap(), None);
        assert_eq!(agg.today_toggle_count().await.unwrap(), 0);

        let today = Db::today_yyyy_mm_dd();
        assert_eq!(agg.daily_average_humidity(&today).await.unwrap(), 0.0);

        let status = agg.status().await.unwrap();
        assert!(!status.relay_state);
        assert_eq!(status.humidity, None);
        assert_eq!(status.last_changed_ts, None);
    }

    // -- Idempotent derivation ----------------------------------------------

    #[tokio::test]
    async fn repeated_reads_agree() {
        let agg = test_aggregator().await;
        agg.db.insert_event(now_unix(), 42, true).await.unwrap();

        let first = agg.current_relay_state().await.unwrap();
        let second = agg.current_relay_state().await.unwrap();
        assert_eq!(first, second);
        assert!(first);
    }

    // -- Toggle counting ----------------------------------------------------

    #[tokio::test]
    async fn toggle_count_is_transition_based() {
        let agg = test_aggregator().await;
        let now = now_unix();
        let states = [false, false, true, true, false, true];
        for (i, &on) in states.iter().enumerate() {
            let ts = now - (states.len() - 1 - i) as i64;
            agg.db.insert_event(ts, 50, on).await.unwrap();
        }

        assert_eq!(agg.today_toggle_count().await.unwrap(), 2);
    }

    // -- Status snapshot ----------------------------------------------------

    #[tokio::test]
    async fn status_reflects_latest_event() {
        let agg = test_aggregator().await;
        let now = now_unix();
        agg.db.insert_event(now - 2, 60, false).await.unwrap();
        agg.db.insert_event(now - 1, 35, true).await.unwrap();
        agg.db.insert_event(now, 37, true).await.unwrap();

        let status = agg.status().await.unwrap();
        assert!(status.relay_state);
        assert_eq!(status.humidity, Some(37));
        assert_eq!(status.last_reading_ts, Some(now));
        // The most recent distinct-state event, not the most recent row.
        assert_eq!(status.last_changed_ts, Some(now - 1));
        assert_eq!(status.today.toggle_count, 1);
        assert!((status.today.avg_humidity - 44.0).abs() < 1e-9);
    }

    // -- Analytics bounds ---------------------------------------------------

    #[tokio::test]
    async fn analytics_rejects_out_of_range_days() {
        let agg = test_aggregator().await;

        let err = agg.analytics(0).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation { field: "days", .. }));

        let err = agg.analytics(31).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation { field: "days", .. }));
    }

    #[tokio::test]
    async fn analytics_summarises_recent_days() {
        let agg = test_aggregator().await;
        let now = now_unix();
        agg.db.insert_event(now - 2, 20, false).await.unwrap();
        agg.db.insert_event(now - 1, 30, true).await.unwrap();
        agg.db.insert_event(now, 40, false).await.unwrap();

        let days = agg.analytics(7).await.unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].min_humidity, 20);
        assert_eq!(days[0].max_humidity, 40);
        assert_eq!(days[0].activation_count, 1);
        assert!((days[0].avg_humidity - 30.0).abs() < 1e-9);
    }
}
