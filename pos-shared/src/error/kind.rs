//! The six-kind error taxonomy (§7), each bound to an HTTP status when surfaced.

use super::codes::ErrorCode;
use http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Conflict,
    Unprocessable,
    Upstream,
    Internal,
}

impl ErrorKind {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Authorization => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode {
    /// Classify this code into one of the six error kinds.
    pub fn kind(&self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            ValidationFailed
            | UnknownTaxCode
            | UnknownDiscountKind
            | UnknownPaymentMethod
            | PaymentAmountInvalid
            | MalformedEvent
            | ReportWindowInvalid => ErrorKind::Validation,

            Unauthorized | Forbidden => ErrorKind::Authorization,

            NotFound | CartNotFound | TransactionNotFound | DeliveryRecordNotFound => {
                ErrorKind::NotFound
            }

            ConcurrentModification
            | CartAlreadyTerminal
            | TransactionAlreadyCancelled
            | TerminalAlreadyOpen
            | TerminalNotOpen
            | TerminalNotClosed
            | InvalidCartOperation
            | InvalidStatusTransition
            | CircuitOpen => ErrorKind::Conflict,

            PaymentExceedsDue
            | PricingInvariantViolated
            | DuplicateEventDropped
            | TerminalsNotAllClosed => ErrorKind::Unprocessable,

            UpstreamUnavailable | PublishFailed | DedupWriteFailed => ErrorKind::Upstream,

            Internal => ErrorKind::Internal,
        }
    }
}
