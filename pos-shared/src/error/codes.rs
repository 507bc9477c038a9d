//! Numeric error codes for the cart engine and event fabric
//!
//! Every code is a six-digit number `XXYYZZ`:
//! - `XX` identifies the owning service
//! - `YY` identifies the subsystem within that service (roughly the
//!   component numbers of the system overview)
//! - `ZZ` identifies the specific condition
//!
//! Service prefixes:
//! - 10: cart-engine
//! - 20: event-fabric
//! - 30: journal-consumer
//! - 40: report-aggregator

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum ErrorCode {
    // ==================== 1001xx: cart-engine / cart FSM (C6) ====================
    InvalidCartOperation = 100101,
    CartNotFound = 100102,
    ConcurrentModification = 100103,
    CartAlreadyTerminal = 100104,

    // ==================== 1002xx: cart-engine / pricing & tax (C7) ====================
    UnknownTaxCode = 100201,
    UnknownDiscountKind = 100202,
    PricingInvariantViolated = 100203,

    // ==================== 1003xx: cart-engine / payment (C8) ====================
    UnknownPaymentMethod = 100301,
    PaymentExceedsDue = 100302,
    PaymentAmountInvalid = 100303,

    // ==================== 1004xx: cart-engine / transaction service (C9) ====================
    TransactionNotFound = 100401,
    TransactionAlreadyCancelled = 100402,

    // ==================== 1005xx: cart-engine / terminal session (C12) ====================
    TerminalAlreadyOpen = 100501,
    TerminalNotOpen = 100502,
    TerminalNotClosed = 100503,

    // ==================== 1009xx: cart-engine / generic ====================
    ValidationFailed = 100901,
    NotFound = 100902,
    Unauthorized = 100903,
    Forbidden = 100904,
    UpstreamUnavailable = 100905,
    Internal = 100906,

    // ==================== 2001xx: event-fabric / publish (C3) ====================
    PublishFailed = 200101,
    CircuitOpen = 200102,

    // ==================== 2002xx: event-fabric / delivery ledger (C4) ====================
    DeliveryRecordNotFound = 200201,
    InvalidStatusTransition = 200202,

    // ==================== 3001xx: journal-consumer (C10) ====================
    DuplicateEventDropped = 300101,
    MalformedEvent = 300102,
    DedupWriteFailed = 300103,

    // ==================== 4001xx: report-aggregator (C11) ====================
    TerminalsNotAllClosed = 400101,
    ReportWindowInvalid = 400102,
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized error code: {0}")]
pub struct InvalidErrorCode(pub u32);

impl ErrorCode {
    pub fn code(&self) -> u32 {
        *self as u32
    }
}

impl From<ErrorCode> for u32 {
    fn from(c: ErrorCode) -> u32 {
        c.code()
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use ErrorCode::*;
        let code = match value {
            100101 => InvalidCartOperation,
            100102 => CartNotFound,
            100103 => ConcurrentModification,
            100104 => CartAlreadyTerminal,
            100201 => UnknownTaxCode,
            100202 => UnknownDiscountKind,
            100203 => PricingInvariantViolated,
            100301 => UnknownPaymentMethod,
            100302 => PaymentExceedsDue,
            100303 => PaymentAmountInvalid,
            100401 => TransactionNotFound,
            100402 => TransactionAlreadyCancelled,
            100501 => TerminalAlreadyOpen,
            100502 => TerminalNotOpen,
            100503 => TerminalNotClosed,
            100901 => ValidationFailed,
            100902 => NotFound,
            100903 => Unauthorized,
            100904 => Forbidden,
            100905 => UpstreamUnavailable,
            100906 => Internal,
            200101 => PublishFailed,
            200102 => CircuitOpen,
            200201 => DeliveryRecordNotFound,
            200202 => InvalidStatusTransition,
            300101 => DuplicateEventDropped,
            300102 => MalformedEvent,
            300103 => DedupWriteFailed,
            400101 => TerminalsNotAllClosed,
            400102 => ReportWindowInvalid,
            other => return Err(InvalidErrorCode(other)),
        };
        Ok(code)
    }
}
