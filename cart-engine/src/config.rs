//! Runtime configuration, loaded from the environment (ambient stack,
//! mirrors the teacher's `Config::from_env` shape).
//!
//! # Environment variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | HTTP_PORT | 3000 | HTTP listen port |
//! | ENVIRONMENT | development | development \| staging \| production |
//! | WORK_DIR | ./data/cart-engine | surrealdb local-engine storage root |
//! | DB_NAMESPACE_PREFIX | pos | prefix for the per-tenant namespace (§6.4) |
//! | REQUEST_TIMEOUT_MS | 30000 | outbound call timeout (§5) |
//! | SHUTDOWN_TIMEOUT_MS | 10000 | graceful-shutdown grace period |
//! | CART_LOCK_TTL_SECS | 900 | TTL sweep for idle per-cart mutexes |
//! | TENANT_TZ | UTC | IANA timezone used for business-date computation |

use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub environment: String,
    pub work_dir: String,
    pub db_namespace_prefix: String,
    pub request_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub cart_lock_ttl_secs: u64,
    pub tenant_tz: Tz,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./data/cart-engine".into()),
            db_namespace_prefix: std::env::var("DB_NAMESPACE_PREFIX").unwrap_or_else(|_| "pos".into()),
            request_timeout_ms: std::env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(30_000),
            shutdown_timeout_ms: std::env::var("SHUTDOWN_TIMEOUT_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10_000),
            cart_lock_ttl_secs: std::env::var("CART_LOCK_TTL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(900),
            tenant_tz: std::env::var("TENANT_TZ")
                .ok()
                .and_then(|tz| tz.parse().ok())
                .unwrap_or(chrono_tz::UTC),
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
