//! Structured logging setup: console output always, plus an optional
//! daily-rotating file when a log directory is configured. JSON framing in
//! production, human-readable in development — the same split the
//! teacher's `init_logger_with_file` makes.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing_subscriber::{fmt, layer::SubscriberExt, prelude::*, EnvFilter};

pub fn init(level: &str, json_format: bool, log_dir: Option<&str>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .boxed();
    let console_layer = if json_format {
        console_layer
    } else {
        fmt::layer().with_target(true).boxed()
    };

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "cart-engine");
            let file_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_writer(std::sync::Mutex::new(appender));
            registry.with(console_layer).with(file_layer).try_init()?;
        }
        None => {
            registry.with(console_layer).try_init()?;
        }
    }

    Ok(())
}

/// Per-request access log: method, matched path, status and latency,
/// warned instead of info'd on a 4xx/5xx response (mirrors the teacher's
/// `logging_middleware`, minus the authenticated-user field this service
/// has no equivalent of).
pub async fn request_span(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let latency_ms = start.elapsed().as_millis();
    let status = response.status();
    if status.is_server_error() || status.is_client_error() {
        tracing::warn!(%method, %path, status = status.as_u16(), latency_ms, "request completed with error");
    } else {
        tracing::info!(%method, %path, status = status.as_u16(), latency_ms, "request completed");
    }

    response
}
