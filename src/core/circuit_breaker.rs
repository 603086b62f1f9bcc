//! Circuit breaker guarding calls to a downstream dependency
//!
//! The breaker wraps a unit of work and sheds load once that work keeps
//! failing. It does not retry and it does not swallow errors: it only decides
//! whether the work is invoked at all.
//!
//! # State Machine
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                               │  cooldown elapsed
//!     │ probe succeeds                ▼
//!     └────────────────────────── HalfOpen
//!                                     │ probe fails
//!                                     └──────▶ Open
//! ```
//!
//! # Thread Safety
//!
//! Every read and transition of the state goes through one mutex, so two
//! callers can never both open the breaker or both reset the counter from a
//! stale read. The mutex is never held while the unit of work runs. While
//! half-open, a single probe is admitted; concurrent callers are rejected as
//! if the breaker were still open.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;

use crate::types::AggregatorError;

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    /// Create a BreakerConfig; a zero threshold falls back to the default
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        let default = Self::default();

        let failure_threshold = if failure_threshold == 0 {
            tracing::warn!(
                failure_threshold,
                default = default.failure_threshold,
                "invalid failure threshold, using default"
            );
            default.failure_threshold
        } else {
            failure_threshold
        };

        Self {
            failure_threshold,
            cooldown,
        }
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// One probe call is allowed to decide between Closed and Open
    HalfOpen,
}

impl CircuitState {
    fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Process-local circuit breaker
///
/// State is not persisted; a restarted process starts Closed.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    ///
    /// `name` identifies the guarded call site in logs and metrics.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Run `work` through the breaker
    ///
    /// # Returns
    ///
    /// * `Err(AggregatorError::CircuitOpen)` without invoking `work` while the
    ///   breaker is open and the cooldown has not elapsed
    /// * otherwise, whatever `work` returned, unchanged
    pub async fn execute<F, Fut, T>(&self, work: F) -> Result<T, AggregatorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AggregatorError>>,
    {
        let is_probe = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: is_probe,
        };

        let result = work().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.record_success(is_probe),
            Err(error) => self.record_failure(error, is_probe),
        }

        result
    }

    /// Decide whether a call may proceed; returns whether it is the probe
    fn admit(&self) -> Result<bool, AggregatorError> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(AggregatorError::CircuitOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map(|at| at.elapsed() > self.config.cooldown)
                    .unwrap_or(true);

                if !cooled_down {
                    tracing::debug!(breaker = %self.name, "circuit open, call rejected");
                    return Err(AggregatorError::CircuitOpen);
                }

                self.transition(&mut inner, CircuitState::HalfOpen);
                tracing::info!(breaker = %self.name, "circuit half-open, probing dependency");
                inner.probe_in_flight = true;
                Ok(true)
            }
        }
    }

    /// Only the admitted probe may close the breaker; a call admitted earlier
    /// while Closed resets the count only if the breaker is still Closed
    fn record_success(&self, is_probe: bool) {
        let mut inner = self.lock();

        if is_probe {
            inner.probe_in_flight = false;

            if inner.state == CircuitState::HalfOpen {
                self.transition(&mut inner, CircuitState::Closed);
                tracing::info!(breaker = %self.name, "circuit closed, resuming normal operation");
            }
        }

        if inner.state == CircuitState::Closed {
            inner.failure_count = 0;
        }
    }

    fn record_failure(&self, error: &AggregatorError, is_probe: bool) {
        let mut inner = self.lock();
        if is_probe {
            inner.probe_in_flight = false;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());

        if inner.failure_count >= self.config.failure_threshold
            && inner.state != CircuitState::Open
        {
            self.transition(&mut inner, CircuitState::Open);
            tracing::warn!(
                breaker = %self.name,
                failure_count = inner.failure_count,
                cooldown_secs = self.config.cooldown.as_secs_f64(),
                error = %error,
                "circuit opened"
            );
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        inner.state = to;
        counter!(
            "circuit_breaker.transitions",
            "breaker" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the half-open probe slot if the probe future is dropped early
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}
