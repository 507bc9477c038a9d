//! The terminal session aggregate (§3.1, §4.7, C12): tracks the
//! open/closed lifecycle a terminal cycles through and the three
//! monotonic counters every cart and event is anchored to.

use serde::{Deserialize, Serialize};

use crate::ids::{Ambient, SessionCounters, TerminalRef};

/// States of the terminal session controller (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalSessionState {
    Idle,
    Opened,
    Closed,
}

/// Per-terminal session record (§3.1). One row per `TerminalRef`, updated
/// in place across open/close cycles — the counters in `session` are what
/// every cart and event copies at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSession {
    pub terminal_ref: TerminalRef,
    pub state: TerminalSessionState,
    pub session: SessionCounters,
    /// Cash declared at open, carried through to the close reconciliation.
    pub initial_cash: f64,
    /// Only set once the session has been closed at least once.
    pub counted_cash: Option<f64>,
    pub ambient: Ambient,
}

impl TerminalSession {
    /// A brand-new terminal, never opened (§3.1: `openCounter` starts at 0).
    pub fn new(terminal_ref: TerminalRef, now: i64) -> Self {
        Self {
            terminal_ref,
            state: TerminalSessionState::Idle,
            session: SessionCounters::opening("00000000", 0),
            initial_cash: 0.0,
            counted_cash: None,
            ambient: Ambient::new(now, "terminal_session"),
        }
    }
}
