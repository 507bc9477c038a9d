//! Terminal identity and the ambient fields every entity carries (§3).

use serde::{Deserialize, Serialize};

/// A terminal is globally identified by `(tenantId, storeCode, terminalNo)`,
/// canonicalised as `tenantId-storeCode-terminalNo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalRef {
    pub tenant_id: String,
    pub store_code: String,
    pub terminal_no: String,
}

impl TerminalRef {
    pub fn new(
        tenant_id: impl Into<String>,
        store_code: impl Into<String>,
        terminal_no: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            store_code: store_code.into(),
            terminal_no: terminal_no.into(),
        }
    }

    /// `tenantId-storeCode-terminalNo`
    pub fn canonical(&self) -> String {
        format!("{}-{}-{}", self.tenant_id, self.store_code, self.terminal_no)
    }
}

impl std::fmt::Display for TerminalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// The three monotonic counters anchoring every cart, event and log to a
/// terminal session (§3.1).
///
/// Invariants: `business_counter` resets to 0 on open; `business_date` is
/// immutable within an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounters {
    /// YYYYMMDD, advances on close independent of wall-clock date
    pub business_date: String,
    /// Number of open/close cycles completed; increments on open
    pub open_counter: u64,
    /// Number of operations in the current open session; increments on each
    pub business_counter: u64,
}

impl SessionCounters {
    pub fn opening(business_date: impl Into<String>, open_counter: u64) -> Self {
        Self {
            business_date: business_date.into(),
            open_counter,
            business_counter: 0,
        }
    }

    pub fn next_operation(&mut self) -> u64 {
        self.business_counter += 1;
        self.business_counter
    }
}

/// Ambient fields every entity carries: creation/update time, a shard hint
/// used to route tenant-scoped storage, and an entity tag (`version`) used
/// for optimistic concurrency (§3, §6.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ambient {
    pub created_at: i64,
    pub updated_at: i64,
    pub shard_hint: String,
    /// Entity tag: incremented on every successful write, compared on CAS updates
    pub version: i64,
}

impl Ambient {
    pub fn new(now: i64, shard_hint: impl Into<String>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            shard_hint: shard_hint.into(),
            version: 0,
        }
    }

    pub fn touch(&mut self, now: i64) {
        self.updated_at = now;
        self.version += 1;
    }
}
