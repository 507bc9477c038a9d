//! Runtime configuration, loaded from the environment (ambient stack,
//! mirrors `cart-engine::Config::from_env` / `journal-consumer::Config`).
//!
//! # Environment variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | HTTP_PORT | 3020 | HTTP listen port |
//! | ENVIRONMENT | development | development \| staging \| production |
//! | WORK_DIR | ./data/cart-engine | document store root, shared with cart-engine and journal-consumer (§6.4) |
//! | DB_NAMESPACE_PREFIX | pos | prefix for the per-tenant namespace (§6.4) |
//! | CART_ENGINE_URL | http://localhost:3000 | base URL for the §4.5 ack callback |
//! | SUBSCRIBER_ID | report-aggregator | this consumer's identity on the fabric |
//!
//! `WORK_DIR` deliberately points at the same on-disk store cart-engine and
//! journal-consumer use: this service owns its `report_transaction` table
//! (§6.4's "each service owns its collections") but reads journal-consumer's
//! `open_close_log` table directly to verify a daily report's terminals are
//! all closed (§8.3 S6), rather than re-subscribing to a topic it otherwise
//! has no use for.

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub environment: String,
    pub work_dir: String,
    pub db_namespace_prefix: String,
    pub cart_engine_url: String,
    pub subscriber_id: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3020),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./data/cart-engine".into()),
            db_namespace_prefix: std::env::var("DB_NAMESPACE_PREFIX").unwrap_or_else(|_| "pos".into()),
            cart_engine_url: std::env::var("CART_ENGINE_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            subscriber_id: std::env::var("SUBSCRIBER_ID").unwrap_or_else(|_| "report-aggregator".into()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
