//! Binary entry point: loads configuration, wires the document store,
//! cache, master-data cache, event fabric and HTTP surface together, and
//! runs the service until a shutdown signal arrives.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware as axum_middleware;
use http::{HeaderName, HeaderValue};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use cart_engine::api::{self, AppState};
use cart_engine::cache::InMemoryStateStore;
use cart_engine::fsm::CartEngine;
use cart_engine::lock::CartLockManager;
use cart_engine::masterdata::{DocumentMasterDataSource, MasterDataCache};
use cart_engine::session::TerminalSessionController;
use cart_engine::store::TenantStore;
use cart_engine::transaction_service::TransactionService;
use cart_engine::Config;

use event_fabric::ledger::InMemoryLedgerStore;
use event_fabric::publisher::{EventFabric, HttpSidecarTransport};
use event_fabric::republish::RepublishScheduler;
use pos_shared::event::Topic;

#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).unwrap()))
    }
}

/// Subscriber fan-out per topic (§4.5): the journal consumer and report
/// aggregator both listen to the transaction log, only the journal
/// consumer cares about cash and open/close events.
fn subscribers_by_topic() -> HashMap<Topic, Vec<String>> {
    let mut map = HashMap::new();
    map.insert(Topic::TranLog, vec!["journal-consumer".to_string(), "report-aggregator".to_string()]);
    map.insert(Topic::CashLog, vec!["journal-consumer".to_string()]);
    map.insert(Topic::OpenCloseLog, vec!["journal-consumer".to_string()]);
    map
}

/// Subscriber delivery endpoints, configured by environment variable so a
/// deployment can point at wherever the consumer processes actually live.
fn sidecar_endpoints() -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Ok(url) = std::env::var("JOURNAL_CONSUMER_URL") {
        map.insert("journal-consumer".to_string(), url);
    }
    if let Ok(url) = std::env::var("REPORT_AGGREGATOR_URL") {
        map.insert("report-aggregator".to_string(), url);
    }
    map
}

fn build_router(state: &AppState) -> axum::Router {
    api::router()
        .with_state(state.clone())
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
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

    tracing::info!(port = config.http_port, environment = %config.environment, "cart-engine starting");

    let store = TenantStore::connect(&config.work_dir, config.db_namespace_prefix.clone()).await?;

    let cache: Arc<dyn cart_engine::cache::StateStore> = {
        let state_store = InMemoryStateStore::new();
        let shutdown = tokio_util::sync::CancellationToken::new();
        state_store.spawn_sweeper(shutdown, std::time::Duration::from_secs(60));
        Arc::new(state_store)
    };

    let masterdata = MasterDataCache::new(Arc::new(DocumentMasterDataSource::new(store.clone())));
    let locks = Arc::new(CartLockManager::new());

    let ledger = Arc::new(InMemoryLedgerStore::new());
    let transport = Arc::new(HttpSidecarTransport::new(sidecar_endpoints()));
    let fabric = Arc::new(EventFabric::new(ledger, transport, subscribers_by_topic()));

    let shutdown = tokio_util::sync::CancellationToken::new();
    let scheduler = RepublishScheduler::new(Arc::clone(&fabric));
    let scheduler_shutdown = shutdown.clone();
    tokio::spawn(scheduler.run(scheduler_shutdown));

    let sessions = Arc::new(TerminalSessionController::new(store.clone(), Arc::clone(&fabric), Arc::clone(&locks)));
    let transactions = Arc::new(TransactionService::new(store.clone(), Arc::clone(&fabric), Arc::clone(&sessions)));
    let cart_engine = Arc::new(CartEngine::new(store.clone(), cache, masterdata, Arc::clone(&locks), Arc::clone(&transactions)));

    let state = AppState { cart_engine, sessions, transactions, fabric: Arc::clone(&fabric) };
    let app = build_router(&state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    shutdown.cancel();
    tracing::info!("cart-engine stopped");
    Ok(())
}
