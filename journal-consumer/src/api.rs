//! The webhook surface the event fabric's `HttpSidecarTransport` delivers
//! to (§4.5 step 2): one endpoint accepting `{"topic", "payload"}`, plus a
//! health check.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::State;
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
        (status, Json(pos_shared::ApiResponse::<()>::error("consumeEvent", &self.0))).into_response()
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

pub fn router() -> Router<AppState> {
    Router::new().route("/events", post(receive_event)).route("/healthz", get(health))
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
        // A duplicate delivery usually means the ack from the first
        // consumption never landed (the republish scheduler's reason for
        // redelivering at all) — ack again so the publisher stops retrying.
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
