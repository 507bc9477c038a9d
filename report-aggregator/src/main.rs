//! Binary entry point for the report aggregator (C11): the §4.6 idempotent
//! consumption template feeding the flash/daily sales pipeline, sharing the
//! tenant document store with cart-engine and journal-consumer via
//! `WORK_DIR` (§6.4).

mod ack;
mod api;
mod config;
mod consumer;
mod pipeline;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware as axum_middleware;
use http::{HeaderName, HeaderValue};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use cart_engine::cache::InMemoryStateStore;
use cart_engine::store::TenantStore;

use crate::ack::Acknowledger;
use crate::api::AppState;
use crate::config::Config;

#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).unwrap()))
    }
}

fn build_router(state: &AppState) -> axum::Router {
    api::router()
        .with_state(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(HeaderName::from_static("x-request-id"), XRequestId))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static("x-request-id")))
        .layer(axum_middleware::from_fn(cart_engine::logging::request_span))
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::from_env();
    cart_engine::logging::init("info", config.is_production(), Some("logs"))?;

    tracing::info!(port = config.http_port, environment = %config.environment, "report-aggregator starting");

    let store = TenantStore::connect(&config.work_dir, config.db_namespace_prefix.clone()).await?;

    let state_store = InMemoryStateStore::new();
    let sweeper_shutdown = tokio_util::sync::CancellationToken::new();
    state_store.spawn_sweeper(sweeper_shutdown.clone(), std::time::Duration::from_secs(60));
    let state_store: Arc<dyn cart_engine::cache::StateStore> = Arc::new(state_store);

    let acknowledger = Acknowledger::new(config.cart_engine_url.clone(), config.subscriber_id.clone());

    let state = AppState { store, state_store, acknowledger };
    let app = build_router(&state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    sweeper_shutdown.cancel();
    tracing::info!("report-aggregator stopped");
    Ok(())
}
