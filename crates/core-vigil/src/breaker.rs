//! Circuit breaker over session validation.
//!
//! Prevents runaway re-validation loops by failing fast once the
//! underlying check has failed repeatedly. Three states:
//! - Closed: checks proceed normally
//! - Open: checks fail immediately until the cooldown elapses
//! - HalfOpen: exactly one probe is admitted; its outcome decides
//!
//! Time comes from the injected [`Clock`], never from `Instant`, so the
//! cooldown can be advanced synthetically in tests.

use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::error::VigilError;

/// State of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Checks pass through normally
    Closed,
    /// Checks fail immediately until `opened_at_ms + cooldown` elapses
    Open { opened_at_ms: u64 },
    /// Cooldown elapsed; `probing` is true while the single admitted
    /// probe is outstanding
    HalfOpen { probing: bool },
}

/// How an admitted check should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; ordinary check
    Normal,
    /// The sole half-open probe; concurrent callers are rejected until
    /// its outcome is reported
    Probe,
}

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time the circuit stays open before admitting a probe
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
}

/// Clock-driven circuit breaker.
///
/// Callers ask for admission before running the underlying check and
/// report the outcome afterwards:
///
/// ```
/// use std::sync::Arc;
/// use sacristan_core_vigil::breaker::{BreakerConfig, CircuitBreaker};
/// use sacristan_core_vigil::clock::SystemClock;
///
/// let breaker = CircuitBreaker::new(BreakerConfig::default(), Arc::new(SystemClock));
/// if breaker.try_acquire().is_ok() {
///     // run the check ...
///     breaker.on_success();
/// }
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    /// Request admission for one underlying check.
    ///
    /// Returns `Err(CircuitOpen)` while the circuit is open or while a
    /// half-open probe is already outstanding.
    pub fn try_acquire(&self) -> Result<Admission, VigilError> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open { opened_at_ms } => {
                if now.saturating_sub(opened_at_ms) >= self.config.cooldown_ms {
                    inner.state = CircuitState::HalfOpen { probing: true };
                    Ok(Admission::Probe)
                } else {
                    Err(VigilError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen { probing: true } => Err(VigilError::CircuitOpen),
            CircuitState::HalfOpen { probing: false } => {
                inner.state = CircuitState::HalfOpen { probing: true };
                Ok(Admission::Probe)
            }
        }
    }

    /// Report a successful check.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen { .. } => {
                tracing::info!("validation circuit closed after successful probe");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
            }
            CircuitState::Open { .. } => {
                // A success can only come from an admitted check; treat
                // as recovery.
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
            }
        }
    }

    /// Report a failed check.
    pub fn on_failure(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        cooldown_ms = self.config.cooldown_ms,
                        "validation circuit opened"
                    );
                    inner.state = CircuitState::Open { opened_at_ms: now };
                    inner.consecutive_failures = 0;
                }
            }
            CircuitState::HalfOpen { .. } => {
                tracing::warn!("half-open probe failed, validation circuit reopened");
                inner.state = CircuitState::Open { opened_at_ms: now };
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    /// Return to the initial closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker() -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::default());
        let b = CircuitBreaker::new(BreakerConfig::default(), clock.clone() as Arc<dyn Clock>);
        (clock, b)
    }

    #[test]
    fn test_opens_after_exactly_five_failures() {
        let (_clock, b) = breaker();

        for _ in 0..4 {
            assert_eq!(b.try_acquire().unwrap(), Admission::Normal);
            b.on_failure();
            assert_eq!(b.state(), CircuitState::Closed);
        }

        assert_eq!(b.try_acquire().unwrap(), Admission::Normal);
        b.on_failure();
        assert!(matches!(b.state(), CircuitState::Open { .. }));
    }

    #[test]
    fn test_open_rejects_without_touching_check() {
        let (clock, b) = breaker();
        for _ in 0..5 {
            b.try_acquire().unwrap();
            b.on_failure();
        }

        // During the cooldown every admission attempt fails fast
        for _ in 0..10 {
            clock.advance_ms(1_000);
            assert_eq!(b.try_acquire(), Err(VigilError::CircuitOpen));
        }
    }

    #[test]
    fn test_single_half_open_probe() {
        let (clock, b) = breaker();
        for _ in 0..5 {
            b.try_acquire().unwrap();
            b.on_failure();
        }

        clock.advance_ms(30_000);

        // First caller gets the probe, the second is rejected
        assert_eq!(b.try_acquire().unwrap(), Admission::Probe);
        assert_eq!(b.try_acquire(), Err(VigilError::CircuitOpen));
    }

    #[test]
    fn test_probe_success_closes_and_resets() {
        let (clock, b) = breaker();
        for _ in 0..5 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        clock.advance_ms(30_000);

        b.try_acquire().unwrap();
        b.on_success();

        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
        assert_eq!(b.try_acquire().unwrap(), Admission::Normal);
    }

    #[test]
    fn test_probe_failure_reopens_with_fresh_cooldown() {
        let (clock, b) = breaker();
        for _ in 0..5 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        clock.advance_ms(30_000);

        b.try_acquire().unwrap();
        clock.advance_ms(500);
        b.on_failure();

        // Reopened; the old cooldown no longer applies
        clock.advance_ms(29_999);
        assert_eq!(b.try_acquire(), Err(VigilError::CircuitOpen));
        clock.advance_ms(1);
        assert_eq!(b.try_acquire().unwrap(), Admission::Probe);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let (_clock, b) = breaker();

        for _ in 0..4 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        b.try_acquire().unwrap();
        b.on_success();
        assert_eq!(b.failure_count(), 0);

        // Four more failures still does not open
        for _ in 0..4 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset() {
        let (_clock, b) = breaker();
        for _ in 0..5 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        assert!(matches!(b.state(), CircuitState::Open { .. }));

        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }
}
