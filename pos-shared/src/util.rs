//! Time and ID helpers shared across the workspace.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// The business date (`YYYYMMDD`) for a given instant in a tenant's
/// configured timezone (§3.1). The business date does not roll over at
/// local midnight automatically — it only advances when a terminal session
/// explicitly calls `advanceBusinessDate` (C12) — this merely renders it.
pub fn business_date(now_millis: i64, tz: Tz) -> String {
    let utc = Utc.timestamp_millis_opt(now_millis).single().unwrap_or_else(Utc::now);
    utc.with_timezone(&tz).format("%Y%m%d").to_string()
}

/// A fresh random identifier for carts, events and idempotency keys.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
