//! Reliable event propagation (C3) and per-event delivery tracking (C4):
//! the pub/sub publish path, the circuit breaker guarding sidecar calls,
//! the delivery-status ledger, and the republish scheduler.

pub mod breaker;
pub mod ledger;
pub mod publisher;
pub mod republish;

pub use breaker::{BreakerError, CircuitBreaker};
pub use ledger::{InMemoryLedgerStore, LedgerStore};
pub use publisher::{EventFabric, HttpSidecarTransport, SidecarTransport};
pub use republish::RepublishScheduler;
