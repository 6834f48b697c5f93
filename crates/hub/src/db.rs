use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::{Duration, OffsetDateTime};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// One recorded observation or relay change. Rows are append-only; `id` is
/// assigned by the store and is the event log's total order.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SensorEvent {
    pub id: i64,
    pub humidity: i64,
    pub relay_state: bool,
    pub ts: i64,
}

/// One operational/audit entry. The `category` tag is for filtering and
/// display only, never for control decisions.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LogEntry {
    pub id: i64,
    pub message: String,
    pub category: String,
    pub ts: i64,
}

/// Per-day humidity summary plus the number of relay activations
/// (transitions to on, not raw on-rows).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DailySummary {
    pub day: String, // YYYY-MM-DD
    pub avg_humidity: f64,
    pub max_humidity: i64,
    pub min_humidity: i64,
    pub activation_count: i64,
}

pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl Db {
    /// db_url examples:
    /// - "sqlite:plantwater.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // A sqlite ":memory:" database exists per connection; a larger pool
        // would hand out fresh empty databases.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    pub fn today_yyyy_mm_dd() -> String {
        let now = OffsetDateTime::now_utc();
        format!("{:04}-{:02}-{:02}", now.year(), now.month() as u8, now.day())
    }

    // ----------------------------
    // Appends
    // ----------------------------

    pub async fn insert_event(&self, ts: i64, humidity: i64, relay_state: bool) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_events (humidity, relay_state, ts)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(humidity)
        .bind(relay_state)
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("insert_event failed")?;

        Ok(result.last_insert_rowid())
    }

    pub async fn insert_log(&self, ts: i64, message: &str, category: &str) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO system_log (message, category, ts)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(message)
        .bind(category)
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("insert_log failed")?;

        Ok(result.last_insert_rowid())
    }

    // ----------------------------
    // Event queries
    // ----------------------------

    pub async fn latest_events(&self, limit: i64) -> Result<Vec<SensorEvent>> {
        sqlx::query_as::<_, SensorEvent>(
            r#"
            SELECT id, humidity, relay_state, ts
            FROM sensor_events
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("latest_events failed")
    }

    pub async fn latest_event(&self) -> Result<Option<SensorEvent>> {
        sqlx::query_as::<_, SensorEvent>(
            r#"
            SELECT id, humidity, relay_state, ts
            FROM sensor_events
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("latest_event failed")
    }

    pub async fn events_on_day(&self, day: &str) -> Result<Vec<SensorEvent>> {
        sqlx::query_as::<_, SensorEvent>(
            r#"
            SELECT id, humidity, relay_state, ts
            FROM sensor_events
            WHERE date(ts, 'unixepoch') = ?
            ORDER BY id ASC
            "#,
        )
        .bind(day)
        .fetch_all(&self.pool)
        .await
        .context("events_on_day failed")
    }

    /// Relay state of the newest event; false while the log is empty.
    pub async fn current_relay_state(&self) -> Result<bool> {
        let state = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT relay_state
            FROM sensor_events
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("current_relay_state failed")?;

        Ok(state.unwrap_or(false))
    }

    /// Timestamp of the most recent event whose relay state differs from its
    /// predecessor's (or that has no predecessor).
    pub async fn last_state_change(&self) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            WITH ordered AS (
                SELECT id, relay_state, ts,
                       LAG(relay_state) OVER (ORDER BY id) AS prev_state
                FROM sensor_events
            )
            SELECT ts
            FROM ordered
            WHERE prev_state IS NULL OR relay_state != prev_state
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("last_state_change failed")
    }

    // ----------------------------
    // Aggregation
    // ----------------------------

    /// Number of transitions to on among the day's events. A transition is an
    /// event whose relay state is true while the immediately preceding event
    /// (by id, across day boundaries) was false or absent. Repeated on-rows
    /// while the relay stays on do not count.
    pub async fn toggle_count_on_day(&self, day: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            WITH ordered AS (
                SELECT relay_state, ts,
                       LAG(relay_state) OVER (ORDER BY id) AS prev_state
                FROM sensor_events
            )
            SELECT COUNT(*)
            FROM ordered
            WHERE date(ts, 'unixepoch') = ?
              AND relay_state = 1
              AND (prev_state IS NULL OR prev_state = 0)
            "#,
        )
        .bind(day)
        .fetch_one(&self.pool)
        .await
        .context("toggle_count_on_day failed")
    }

    pub async fn avg_humidity_on_day(&self, day: &str) -> Result<Option<f64>> {
        sqlx::query_scalar::<_, Option<f64>>(
            r#"
            SELECT AVG(humidity)
            FROM sensor_events
            WHERE date(ts, 'unixepoch') = ?
            "#,
        )
        .bind(day)
        .fetch_one(&self.pool)
        .await
        .context("avg_humidity_on_day failed")
    }

    /// Per-day summaries for the last `range_days` calendar days (today
    /// included), most recent day first. Days without events produce no row.
    pub async fn daily_summaries(&self, range_days: i64) -> Result<Vec<DailySummary>> {
        let start = OffsetDateTime::now_utc().date() - Duration::days(range_days - 1);
        let cutoff = start.midnight().assume_utc().unix_timestamp();

        // The window runs over the whole log so the first event after the
        // cutoff still sees its true predecessor.
        sqlx::query_as::<_, DailySummary>(
            r#"
            WITH ordered AS (
                SELECT humidity, relay_state, ts,
                       LAG(relay_state) OVER (ORDER BY id) AS prev_state
                FROM sensor_events
            )
            SELECT date(ts, 'unixepoch') AS day,
                   AVG(humidity)         AS avg_humidity,
                   MAX(humidity)         AS max_humidity,
                   MIN(humidity)         AS min_humidity,
                   SUM(CASE WHEN relay_state = 1
                             AND (prev_state IS NULL OR prev_state = 0)
                            THEN 1 ELSE 0 END) AS activation_count
            FROM ordered
            WHERE ts >= ?
            GROUP BY day
            ORDER BY day DESC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("daily_summaries failed")
    }

    // ----------------------------
    // System log queries
    // ----------------------------

    pub async fn latest_logs(&self, limit: i64, category: Option<&str>) -> Result<Vec<LogEntry>> {
        match category {
            Some(cat) => sqlx::query_as::<_, LogEntry>(
                r#"
                SELECT id, message, category, ts
                FROM system_log
                WHERE category = ?
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(cat)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("latest_logs failed"),
            None => sqlx::query_as::<_, LogEntry>(
                r#"
                SELECT id, message, category, ts
                FROM system_log
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("latest_logs failed"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
