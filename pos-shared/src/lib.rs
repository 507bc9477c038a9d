//! Types and helpers shared by every crate in the workspace: the cart and
//! transaction aggregates, wire events, the error taxonomy, and the
//! id/money/time utilities they're built from.

pub mod cart;
pub mod error;
pub mod event;
pub mod ids;
pub mod money;
pub mod payment;
pub mod terminal;
pub mod transaction;
pub mod util;

pub use cart::{Cart, CartState, Discount, DiscountKind, LineItem, PaymentEntry, TaxAllocation, TaxKind};
pub use error::{ApiResponse, AppError, AppResult, ErrorCode, ErrorKind};
pub use event::{
    CashEvent, DeliveryStatus, OverallStatus, SessionEvent, SessionReconciliation, SubscriberEntry, SubscriberStatus, Topic,
    TransactionEvent,
};
pub use ids::{Ambient, SessionCounters, TerminalRef};
pub use payment::PaymentMethodCode;
pub use terminal::{TerminalSession, TerminalSessionState};
pub use transaction::{Transaction, TransactionType};
