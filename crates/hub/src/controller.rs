//! Auto-watering controller: decides, on each incoming humidity reading,
//! whether to start a watering episode, and arms a one-shot deferred shutoff
//! when one starts.
//!
//! ## Episode state machine
//!
//! ```text
//! Idle ──[enabled, humidity < threshold, relay off, cooldown elapsed]──▶ Watering
//!  ▲                                                                       │
//!  └───────────────[deferred shutoff fires, relay still on]────────────────┘
//! ```
//!
//! "Relay on/off" is always the derived state from the event log, never a
//! separately-mutated flag. Cooldown comes from a typed `last_auto_start`
//! timestamp held by the controller, not from scanning log messages. All
//! writes (ingestion, manual control, device sync, settings updates, and the
//! deferred shutoff) serialize through one mutex.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::db::{now_unix, Db};
use crate::error::ApiError;

pub const THRESHOLD_RANGE: RangeInclusive<i64> = 0..=100;
pub const DURATION_RANGE: RangeInclusive<i64> = 1..=60;
pub const MIN_INTERVAL_RANGE: RangeInclusive<i64> = 60..=3600;

/// Bounded retries for the deferred shutoff write, which has no caller to
/// report to.
const SHUTOFF_ATTEMPTS: u32 = 3;
const SHUTOFF_RETRY_DELAY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoWateringSettings {
    pub threshold_percent: i64,
    pub duration_sec: i64,
    pub min_interval_sec: i64,
    pub enabled: bool,
}

impl Default for AutoWateringSettings {
    fn default() -> Self {
        Self {
            threshold_percent: 40,
            duration_sec: 10,
            min_interval_sec: 300,
            enabled: true,
        }
    }
}

impl AutoWateringSettings {
    /// Range-check every field, reporting the first offending one.
    fn validate(&self) -> Result<(), ApiError> {
        check_range("threshold_percent", self.threshold_percent, THRESHOLD_RANGE)?;
        check_range("duration_sec", self.duration_sec, DURATION_RANGE)?;
        check_range("min_interval_sec", self.min_interval_sec, MIN_INTERVAL_RANGE)?;
        Ok(())
    }
}

fn check_range(
    field: &'static str,
    value: i64,
    range: RangeInclusive<i64>,
) -> Result<(), ApiError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ApiError::validation(
            field,
            format!("{value} out of range [{}, {}]", range.start(), range.end()),
        ))
    }
}

fn check_humidity(humidity: i64) -> Result<(), ApiError> {
    check_range("humidity", humidity, 0..=100)
}

/// Partial settings update: only the fields present are applied, and an
/// out-of-range value rejects the whole update.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct SettingsUpdate {
    pub threshold_percent: Option<i64>,
    pub duration_sec: Option<i64>,
    pub min_interval_sec: Option<i64>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayAction {
    On,
    Off,
    Toggle,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct Inner {
    settings: AutoWateringSettings,
    /// Start of the most recent auto-triggered episode, for cooldown checks.
    /// In-memory only; resets on restart like the rest of the settings.
    last_auto_start: Option<i64>,
}

pub struct Controller {
    db: Db,
    inner: Arc<Mutex<Inner>>,
}

impl Controller {
    pub fn new(db: Db, settings: AutoWateringSettings) -> Self {
        Self {
            db,
            inner: Arc::new(Mutex::new(Inner {
                settings,
                last_auto_start: None,
            })),
        }
    }

    /// Record a sensor reading and run the watering decision on it.
    pub async fn ingest(&self, humidity: i64, relay_state: bool) -> Result<(), ApiError> {
        check_humidity(humidity)?;

        let mut inner = self.inner.lock().await;
        let now = now_unix();
        self.db.insert_event(now, humidity, relay_state).await?;
        self.maybe_start_watering(&mut inner, humidity, now).await
    }

    /// Idle → Watering transition, if every guard passes.
    async fn maybe_start_watering(
        &self,
        inner: &mut Inner,
        humidity: i64,
        now: i64,
    ) -> Result<(), ApiError> {
        let settings = inner.settings;
        if !settings.enabled || humidity >= settings.threshold_percent {
            return Ok(());
        }
        if self.db.current_relay_state().await? {
            return Ok(());
        }
        if let Some(started) = inner.last_auto_start {
            if now - started < settings.min_interval_sec {
                return Ok(());
            }
        }

        // A failed append means no transition: last_auto_start stays
        // untouched and no shutoff is armed.
        self.db.insert_event(now, humidity, true).await?;
        inner.last_auto_start = Some(now);
        self.arm_shutoff(settings.duration_sec, humidity);

        info!(
            humidity,
            threshold = settings.threshold_percent,
            duration_sec = settings.duration_sec,
            "auto watering started"
        );

        // The on-event is already durable; losing the audit line must not
        // abort the episode or the armed shutoff.
        if let Err(e) = self
            .db
            .insert_log(
                now,
                &format!(
                    "auto watering started (humidity {humidity}% below threshold {}%)",
                    settings.threshold_percent
                ),
                "auto",
            )
            .await
        {
            warn!("auto start: log append failed: {e:#}");
        }

        Ok(())
    }

    fn arm_shutoff(&self, duration_sec: i64, trigger_humidity: i64) {
        let db = self.db.clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep(Duration::from_secs(duration_sec as u64)).await;
            complete_episode(&db, &inner, trigger_humidity).await;
        });
    }

    /// Manual override. Computes the target from derived state, records an
    /// ordinary event, and returns the new state. Does not cancel a pending
    /// auto shutoff; the shutoff's own still-on check handles that.
    pub async fn manual(&self, action: RelayAction) -> Result<bool, ApiError> {
        let _inner = self.inner.lock().await;
        let current = self.db.current_relay_state().await?;
        let target = match action {
            RelayAction::On => true,
            RelayAction::Off => false,
            RelayAction::Toggle => !current,
        };

        let now = now_unix();
        let humidity = self
            .db
            .latest_event()
            .await?
            .map(|e| e.humidity)
            .unwrap_or(0);
        self.db.insert_event(now, humidity, target).await?;
        self.db
            .insert_log(
                now,
                &format!(
                    "relay manually switched {}",
                    if target { "on" } else { "off" }
                ),
                "manual",
            )
            .await?;

        info!(target, "manual relay command");
        Ok(target)
    }

    /// Device sync: write a relay state (and optionally a humidity reading)
    /// straight into the log.
    pub async fn set_relay(&self, state: bool, humidity: Option<i64>) -> Result<(), ApiError> {
        if let Some(h) = humidity {
            check_humidity(h)?;
        }

        let _inner = self.inner.lock().await;
        let now = now_unix();
        let h = match humidity {
            Some(h) => h,
            None => self
                .db
                .latest_event()
                .await?
                .map(|e| e.humidity)
                .unwrap_or(0),
        };
        self.db.insert_event(now, h, state).await?;
        Ok(())
    }

    pub async fn settings(&self) -> AutoWateringSettings {
        self.inner.lock().await.settings
    }

    /// Apply a partial settings update. All present fields are validated
    /// before anything is committed; on any violation the settings are left
    /// exactly as they were.
    pub async fn update_settings(
        &self,
        update: SettingsUpdate,
    ) -> Result<AutoWateringSettings, ApiError> {
        let mut inner = self.inner.lock().await;

        let mut candidate = inner.settings;
        if let Some(v) = update.threshold_percent {
            candidate.threshold_percent = v;
        }
        if let Some(v) = update.duration_sec {
            candidate.duration_sec = v;
        }
        if let Some(v) = update.min_interval_sec {
            candidate.min_interval_sec = v;
        }
        if let Some(v) = update.enabled {
            candidate.enabled = v;
        }
        candidate.validate()?;

        self.db
            .insert_log(
                now_unix(),
                &format!(
                    "auto watering settings updated (threshold {}%, duration {}s, min interval {}s, {})",
                    candidate.threshold_percent,
                    candidate.duration_sec,
                    candidate.min_interval_sec,
                    if candidate.enabled { "enabled" } else { "disabled" }
                ),
                "system",
            )
            .await?;

        inner.settings = candidate;
        info!(?candidate, "auto watering settings updated");
        Ok(candidate)
    }
}

// ---------------------------------------------------------------------------
// Deferred shutoff
// ---------------------------------------------------------------------------

/// Fire-time half of an auto episode. Runs under the same write lock as
/// every other mutation, and appends the off-event only if the relay is
/// still on — a manual off in the interim makes this a no-op.
async fn complete_episode(db: &Db, inner: &Mutex<Inner>, trigger_humidity: i64) {
    let _guard = inner.lock().await;
    let now = now_unix();

    let still_on = match db.current_relay_state().await {
        Ok(v) => v,
        Err(e) => {
            error!("auto shutoff: state check failed: {e:#}");
            return;
        }
    };
    if !still_on {
        info!("auto shutoff: relay already off, nothing to do");
        return;
    }

    // The off-event carries the most recently observed humidity, falling
    // back to the reading that triggered the episode.
    let humidity = match db.latest_event().await {
        Ok(Some(e)) => e.humidity,
        _ => trigger_humidity,
    };

    for attempt in 1..=SHUTOFF_ATTEMPTS {
        match db.insert_event(now, humidity, false).await {
            Ok(_) => {
                info!(humidity, "auto watering finished");
                if let Err(e) = db.insert_log(now, "auto watering finished", "auto").await {
                    warn!("auto shutoff: log append failed: {e:#}");
                }
                return;
            }
            Err(e) => {
                warn!(attempt, "auto shutoff: off-event append failed: {e:#}");
                sleep(SHUTOFF_RETRY_DELAY).await;
            }
        }
    }

    // Give up for this episode; relay state is left as last known.
    if let Err(e) = db
        .insert_log(
            now,
            "auto shutoff failed after retries; relay state left as last known",
            "system",
        )
        .await
    {
        error!("auto shutoff: could not record failure: {e:#}");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
