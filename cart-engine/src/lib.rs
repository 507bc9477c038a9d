//! The cart engine: C1 (tenant document store), C2 (state-store cache),
//! C5 (master-data cache), C6 (cart state machine), C7 (pricing & tax),
//! C8 (payment engine), C9 (transaction service) and C12 (terminal
//! session controller), plus the axum HTTP surface wired up in `main.rs`.

pub mod api;
pub mod cache;
pub mod config;
pub mod formatter;
pub mod fsm;
pub mod lock;
pub mod logging;
pub mod masterdata;
pub mod payment;
pub mod pricing;
pub mod session;
pub mod store;
pub mod transaction_service;

pub use config::Config;
pub use fsm::{CartEngine, CartOutcome};
pub use session::TerminalSessionController;
