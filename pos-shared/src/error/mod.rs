//! Unified error system (§7): six kinds, each bound to an HTTP status,
//! carried by a numeric `XXYYZZ` code plus an opaque system message and a
//! localisable user-facing message.

mod codes;
mod kind;
mod types;

pub use codes::{ErrorCode, InvalidErrorCode};
pub use kind::ErrorKind;
pub use types::{ApiResponse, AppError, AppResult};
