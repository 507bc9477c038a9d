//! Circuit breaker guarding sidecar calls (§4.5, §5 "process-wide per
//! target service"). One instance per downstream name; wraps any async
//! call through the generic [`CircuitBreaker::call`].
//!
//! The state machine is the same shape as the reconnect loop used
//! elsewhere in this lineage for outbound workers — a failure counter that
//! trips a cooldown, followed by a single probe — but tracked explicitly
//! as closed/open/half-open rather than folded into a retry loop, since
//! callers here need to observe "fail fast" distinctly from "retry".

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Consecutive failures before the breaker trips (§4.5 default).
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// How long the breaker stays open before allowing a probe (§4.5 default).
const DEFAULT_RESET_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Failure-isolation wrapper for one downstream dependency (§4.5). Cheap to
/// clone: internal state is shared via atomics and a small mutex guarding
/// the half-open probe slot.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: std::sync::Arc<Mutex<State>>,
    consecutive_failures: std::sync::Arc<AtomicU32>,
    opened_at_millis: std::sync::Arc<AtomicU64>,
    probe_in_flight: std::sync::Arc<Mutex<bool>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker for {0} is open")]
    Open(String),
    #[error(transparent)]
    Inner(#[from] E),
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, DEFAULT_FAILURE_THRESHOLD, Duration::from_secs(DEFAULT_RESET_TIMEOUT_SECS))
    }

    pub fn with_config(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            reset_timeout,
            state: std::sync::Arc::new(Mutex::new(State::Closed)),
            consecutive_failures: std::sync::Arc::new(AtomicU32::new(0)),
            opened_at_millis: std::sync::Arc::new(AtomicU64::new(0)),
            probe_in_flight: std::sync::Arc::new(Mutex::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), State::Open)
    }

    /// Run `f`, guarded by the breaker's current state. Returns
    /// `BreakerError::Open` without calling `f` at all if the breaker is
    /// tripped and no probe slot is available.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            return Err(BreakerError::Open(self.name.clone()));
        }

        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Decide whether to let a call through, transitioning open → half-open
    /// once the reset timeout has elapsed. Only one half-open probe may be
    /// in flight at a time.
    fn admit(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            State::Closed => true,
            State::Open => {
                let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                let elapsed = now_millis().saturating_sub(opened_at);
                if elapsed >= self.reset_timeout.as_millis() as u64 {
                    let mut probe = self.probe_in_flight.lock();
                    if *probe {
                        false
                    } else {
                        *probe = true;
                        *state = State::HalfOpen;
                        true
                    }
                } else {
                    false
                }
            }
            State::HalfOpen => {
                let mut probe = self.probe_in_flight.lock();
                if *probe {
                    false
                } else {
                    *probe = true;
                    true
                }
            }
        }
    }

    fn on_success(&self) {
        *self.state.lock() = State::Closed;
        self.consecutive_failures.store(0, Ordering::Release);
        *self.probe_in_flight.lock() = false;
    }

    fn on_failure(&self) {
        *self.probe_in_flight.lock() = false;
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let mut state = self.state.lock();
        if *state == State::HalfOpen || failures >= self.failure_threshold {
            *state = State::Open;
            self.opened_at_millis.store(now_millis(), Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn trips_after_threshold_failures() {
        let breaker = CircuitBreaker::with_config("sidecar", 3, Duration::from_secs(60));
        for _ in 0..3 {
            let res: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
            assert!(res.is_err());
        }
        assert!(breaker.is_open());

        let res: Result<(), BreakerError<&str>> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(res, Err(BreakerError::Open(_))));
    }

    #[tokio::test]
    async fn half_open_probe_recovers_to_closed() {
        let breaker = CircuitBreaker::with_config("sidecar", 1, Duration::from_millis(10));
        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(20)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let res: Result<(), BreakerError<&str>> = breaker
            .call(|| async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(res.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!breaker.is_open());
    }
}
