//! The HTTP surface for C11: the same webhook ingress shape
//! `journal-consumer::api` exposes for the event fabric's
//! `HttpSidecarTransport` (§4.5 step 2), plus the two read endpoints the
//! flash/daily reports are served from.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cart_engine::cache::StateStore;
use cart_engine::store::TenantStore;
use pos_shared::event::Topic;
use pos_shared::AppError;
use serde::{Deserialize, Serialize};

use crate::ack::Acknowledger;
use crate::consumer::{consume, ConsumeOutcome};
use crate::pipeline::{aggregate, ReportWindow, SalesReport};

#[derive(Clone)]
pub struct AppState {
    pub store: TenantStore,
    pub state_store: Arc<dyn StateStore>,
    pub acknowledger: Acknowledger,
}

struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status().as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(pos_shared::ApiResponse::<()>::error("reportAggregator", &self.0))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct IncomingEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub outcome: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub tenant_id: String,
    pub store_code: String,
    pub business_date: String,
    /// Flash reports may be narrowed to one terminal; omitted for the whole
    /// store. Daily reports always cover the whole store (§4.6) regardless
    /// of whether this is set.
    pub terminal_no: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", post(receive_event))
        .route("/reports/flash", get(flash_report))
        .route("/reports/daily", get(daily_report))
        .route("/healthz", get(health))
}

async fn health() -> &'static str {
    "ok"
}

async fn receive_event(State(state): State<AppState>, Json(body): Json<IncomingEvent>) -> Result<Json<pos_shared::ApiResponse<ConsumeResponse>>, ApiError> {
    let Ok(topic) = Topic::from_str(&body.topic) else {
        tracing::warn!(topic = body.topic, "dropping delivery for unknown topic");
        return Ok(Json(pos_shared::ApiResponse::ok("consumeEvent", ConsumeResponse { outcome: "dropped" })));
    };

    let outcome = consume(&state.store, &state.state_store, topic, body.payload).await?;

    match &outcome {
        ConsumeOutcome::Processed { event_id } => state.acknowledger.spawn_ack(event_id.clone(), true),
        ConsumeOutcome::Duplicate { event_id } => state.acknowledger.spawn_ack(event_id.clone(), true),
        ConsumeOutcome::Dropped => {}
    }

    let outcome_str = match outcome {
        ConsumeOutcome::Dropped => "dropped",
        ConsumeOutcome::Duplicate { .. } => "duplicate",
        ConsumeOutcome::Processed { .. } => "processed",
    };
    Ok(Json(pos_shared::ApiResponse::ok("consumeEvent", ConsumeResponse { outcome: outcome_str })))
}

/// A flash report: any point-in-time snapshot, optionally scoped to one
/// terminal, with no requirement that anything be closed (§4.6).
async fn flash_report(State(state): State<AppState>, Query(q): Query<ReportQuery>) -> Result<Json<pos_shared::ApiResponse<SalesReport>>, ApiError> {
    let window = ReportWindow { tenant_id: q.tenant_id, store_code: q.store_code, business_date: q.business_date, terminal_no: q.terminal_no };
    let report = aggregate(&state.store, &window, false).await?;
    Ok(Json(pos_shared::ApiResponse::ok("flashReport", report)))
}

/// A daily report: whole-store, refused (§8.3 S6) unless every terminal
/// that opened a session on the business date has also closed it.
async fn daily_report(State(state): State<AppState>, Query(q): Query<ReportQuery>) -> Result<Json<pos_shared::ApiResponse<SalesReport>>, ApiError> {
    let window = ReportWindow { tenant_id: q.tenant_id, store_code: q.store_code, business_date: q.business_date, terminal_no: None };
    let report = aggregate(&state.store, &window, true).await?;
    Ok(Json(pos_shared::ApiResponse::ok("dailyReport", report)))
}
