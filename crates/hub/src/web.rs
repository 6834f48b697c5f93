use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::{env, ops::RangeInclusive};
use tokio::net::TcpListener;

use crate::controller::{Controller, RelayAction, SettingsUpdate};
use crate::db::{DailySummary, LogEntry, SensorEvent};
use crate::error::ApiError;
use crate::state::{Aggregator, Status, TodayReport};

const LIMIT_RANGE: RangeInclusive<i64> = 1..=1000;
const DEFAULT_LIMIT: i64 = 50;
const DEFAULT_DAYS: i64 = 7;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub aggregator: Aggregator,
}

// ---------------------------------------------------------------------------
// Request/response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitReading {
    humidity: i64,
    relay_state: bool,
}

#[derive(Debug, Deserialize)]
struct RelayCommand {
    action: Option<RelayAction>,
}

#[derive(Debug, Deserialize)]
struct SetRelayState {
    state: bool,
    humidity: Option<i64>,
}

#[derive(Debug, Serialize)]
struct RelayResponse {
    relay_state: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<i64>,
    category: Option<String>,
}

fn check_limit(limit: Option<i64>) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if LIMIT_RANGE.contains(&limit) {
        Ok(limit)
    } else {
        Err(ApiError::validation(
            "limit",
            format!(
                "{limit} out of range [{}, {}]",
                LIMIT_RANGE.start(),
                LIMIT_RANGE.end()
            ),
        ))
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sensor-data", post(submit_reading))
        .route("/status", get(status))
        .route("/stats/today", get(today_stats))
        .route("/relay", post(relay_command))
        .route("/relay/state", post(set_relay_state))
        .route("/history", get(history))
        .route("/analytics", get(analytics))
        .route("/logs", get(logs))
        .route("/auto-watering", get(get_settings).post(update_settings))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ingest a sensor reading, run the watering decision, and return the
/// resulting derived state.
async fn submit_reading(
    State(state): State<AppState>,
    Json(body): Json<SubmitReading>,
) -> Result<Json<Status>, ApiError> {
    state
        .controller
        .ingest(body.humidity, body.relay_state)
        .await?;
    Ok(Json(state.aggregator.status().await?))
}

async fn status(State(state): State<AppState>) -> Result<Json<Status>, ApiError> {
    Ok(Json(state.aggregator.status().await?))
}

async fn today_stats(State(state): State<AppState>) -> Result<Json<TodayReport>, ApiError> {
    Ok(Json(state.aggregator.today_stats().await?))
}

async fn relay_command(
    State(state): State<AppState>,
    Json(body): Json<RelayCommand>,
) -> Result<Json<RelayResponse>, ApiError> {
    let action = body.action.unwrap_or(RelayAction::Toggle);
    let relay_state = state.controller.manual(action).await?;
    Ok(Json(RelayResponse { relay_state }))
}

async fn set_relay_state(
    State(state): State<AppState>,
    Json(body): Json<SetRelayState>,
) -> Result<Json<RelayResponse>, ApiError> {
    state.controller.set_relay(body.state, body.humidity).await?;
    Ok(Json(RelayResponse {
        relay_state: body.state,
    }))
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<SensorEvent>>, ApiError> {
    let limit = check_limit(query.limit)?;
    Ok(Json(state.aggregator.history(limit).await?))
}

async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Vec<DailySummary>>, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_DAYS);
    Ok(Json(state.aggregator.analytics(days).await?))
}

async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let limit = check_limit(query.limit)?;
    Ok(Json(
        state
            .aggregator
            .recent_logs(limit, query.category.as_deref())
            .await?,
    ))
}

async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.settings().await)
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.controller.update_settings(update).await?))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "api listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
