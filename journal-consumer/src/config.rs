//! Runtime configuration, loaded from the environment (ambient stack,
//! mirrors `cart-engine::Config::from_env`).
//!
//! # Environment variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | HTTP_PORT | 3010 | HTTP listen port |
//! | ENVIRONMENT | development | development \| staging \| production |
//! | WORK_DIR | ./data/cart-engine | document store root, shared with cart-engine |
//! | DB_NAMESPACE_PREFIX | pos | prefix for the per-tenant namespace (§6.4) |
//! | CART_ENGINE_URL | http://localhost:3000 | base URL for the §4.5 ack callback |
//! | SUBSCRIBER_ID | journal-consumer | this consumer's identity on the fabric |

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
                .unwrap_or(3010),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./data/cart-engine".into()),
            db_namespace_prefix: std::env::var("DB_NAMESPACE_PREFIX").unwrap_or_else(|_| "pos".into()),
            cart_engine_url: std::env::var("CART_ENGINE_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            subscriber_id: std::env::var("SUBSCRIBER_ID").unwrap_or_else(|_| "journal-consumer".into()),
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
