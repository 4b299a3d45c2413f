//! Session guard: throttled, cached, circuit-protected validation.
//!
//! The UI polls session validity from many unrelated triggers (renders,
//! focus changes, navigation). The guard absorbs that burst traffic:
//! - a real check runs at most once per throttle interval (1 s);
//! - any result is reusable from the cache for 500 ms;
//! - concurrent callers coalesce onto one in-flight check
//!   (single-flight) instead of issuing duplicates;
//! - repeated check failures open a circuit breaker so a broken store
//!   is not hammered.
//!
//! Malformed records are cleared exactly once per occurrence and
//! reported through the rate-limited log, never raw.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::clock::Clock;
use crate::error::VigilError;
use crate::store::{keys, with_retries, KeyValueStore};
use crate::throttle_log::{LogLevel, RateLimitedLog};

/// Persisted descriptor of the authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub authenticated: bool,
    pub login_time_ms: u64,
    pub last_activity_ms: u64,
    #[serde(default)]
    pub validation_count: u64,
    #[serde(default)]
    pub last_validation_ms: u64,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Why a validation was denied.
///
/// The UI surfaces a single generic message for all of these; callers
/// branch on the variant for behaviour, not wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No session record exists
    NoSession,
    /// Record exists but is not marked authenticated
    NotAuthenticated,
    /// Record failed to parse; it has been cleared
    MalformedSession,
    /// Inactivity timeout exceeded; record has been cleared
    ExpiredSession,
    /// Persistent store unreachable after bounded retries
    StorageUnavailable,
    /// Circuit breaker is open; no check was attempted
    CircuitOpen,
    /// Environment fingerprint no longer matches
    FingerprintMismatch,
}

/// Outcome of a validation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub authenticated: bool,
    pub reason: Option<DenyReason>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self {
            authenticated: true,
            reason: None,
        }
    }

    fn denied(reason: DenyReason) -> Self {
        Self {
            authenticated: false,
            reason: Some(reason),
        }
    }
}

/// Hook the guard uses to confirm the environment fingerprint during a
/// real check. Implemented by the integrity monitor.
#[async_trait]
pub trait FingerprintCheck: Send + Sync {
    /// True if the current environment still matches the stored
    /// fingerprint (or no fingerprint is stored yet).
    async fn confirm(&self) -> bool;
}

/// Guard timing policy.
#[derive(Debug, Clone)]
pub struct SessionGuardConfig {
    /// Minimum interval between real checks
    pub throttle_ms: u64,
    /// How long a computed result stays reusable
    pub cache_ttl_ms: u64,
    /// Inactivity timeout after which a session is expired
    pub inactivity_timeout_ms: u64,
    /// Circuit breaker thresholds
    pub breaker: BreakerConfig,
}

impl Default for SessionGuardConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 1_000,
            cache_ttl_ms: 500,
            inactivity_timeout_ms: 8 * 60 * 60 * 1_000, // 8 hours
            breaker: BreakerConfig::default(),
        }
    }
}

#[derive(Debug)]
struct CachedResult {
    outcome: ValidationOutcome,
    computed_at_ms: u64,
}

#[derive(Debug)]
struct GuardState {
    /// When the last real check executed (0 = never)
    last_check_ms: u64,
    cache: Option<CachedResult>,
    /// Set once a malformed record has been cleared, so the next poll
    /// does not clear (and log) again
    cleared_malformed: bool,
}

/// Session validator with throttling, caching, single-flight and a
/// circuit breaker.
pub struct SessionGuard {
    config: SessionGuardConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    log: Arc<RateLimitedLog>,
    breaker: CircuitBreaker,
    fingerprint: Option<Arc<dyn FingerprintCheck>>,
    state: std::sync::Mutex<GuardState>,
    /// Serializes real checks; waiters re-read the cache on wake
    flight: tokio::sync::Mutex<()>,
    checks_performed: AtomicU64,
}

impl SessionGuard {
    pub fn new(
        config: SessionGuardConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        log: Arc<RateLimitedLog>,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker.clone(), clock.clone());
        Self {
            config,
            clock,
            store,
            log,
            breaker,
            fingerprint: None,
            state: std::sync::Mutex::new(GuardState {
                last_check_ms: 0,
                cache: None,
                cleared_malformed: false,
            }),
            flight: tokio::sync::Mutex::new(()),
            checks_performed: AtomicU64::new(0),
        }
    }

    /// Attach the fingerprint confirmation hook.
    pub fn with_fingerprint_check(mut self, check: Arc<dyn FingerprintCheck>) -> Self {
        self.fingerprint = Some(check);
        self
    }

    /// Validate the current session.
    ///
    /// Returns the cached outcome whenever the throttle or cache window
    /// is still open; otherwise runs one real check, with concurrent
    /// callers receiving that check's result.
    pub async fn validate(&self) -> ValidationOutcome {
        if let Some(outcome) = self.cached_outcome() {
            return outcome;
        }

        // Single-flight: only one real check at a time. Anyone who was
        // queued behind it re-reads the cache it just filled.
        let _flight = self.flight.lock().await;
        if let Some(outcome) = self.cached_outcome() {
            return outcome;
        }

        match self.breaker.try_acquire() {
            Ok(_) => {}
            Err(_) => {
                let outcome = ValidationOutcome::denied(DenyReason::CircuitOpen);
                // Cached so bursts during the cooldown stay local,
                // but last_check is untouched: no real check ran.
                self.cache_only(outcome);
                return outcome;
            }
        }

        let now = self.clock.now_ms();
        self.checks_performed.fetch_add(1, Ordering::SeqCst);
        let outcome = self.run_check(now).await;

        let mut state = self.state.lock().unwrap();
        state.last_check_ms = now;
        state.cache = Some(CachedResult {
            outcome,
            computed_at_ms: now,
        });
        outcome
    }

    /// The circuit breaker's current state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Number of real (non-cached) checks executed. Test hook.
    pub fn checks_performed(&self) -> u64 {
        self.checks_performed.load(Ordering::SeqCst)
    }

    /// Create and persist a fresh authenticated session record.
    pub async fn record_login(
        &self,
        session_id: &str,
        fingerprint: Option<String>,
    ) -> Result<SessionRecord, VigilError> {
        let now = self.clock.now_ms();
        let record = SessionRecord {
            session_id: session_id.to_string(),
            authenticated: true,
            login_time_ms: now,
            last_activity_ms: now,
            validation_count: 0,
            last_validation_ms: 0,
            fingerprint,
        };
        self.persist(&record).await?;
        self.invalidate_cache();
        tracing::info!(session_id, "session established");
        Ok(record)
    }

    /// Current session id, if an authenticated record exists.
    ///
    /// This is the accessor other components use instead of reading the
    /// `session.*` namespace themselves.
    pub async fn current_session_id(&self) -> Result<String, VigilError> {
        match self.load_record().await? {
            Some(record) if record.authenticated => Ok(record.session_id),
            _ => Err(VigilError::NoSession),
        }
    }

    /// Remove the session record and drop cached state.
    pub async fn logout(&self) -> Result<(), VigilError> {
        with_retries(|| self.store.remove(keys::SESSION_RECORD)).await?;
        self.invalidate_cache();
        tracing::info!("session cleared");
        Ok(())
    }

    /// Reset throttle, cache and circuit state. Used by recovery.
    pub fn reset(&self) {
        self.breaker.reset();
        let mut state = self.state.lock().unwrap();
        state.last_check_ms = 0;
        state.cache = None;
        state.cleared_malformed = false;
    }

    fn cached_outcome(&self) -> Option<ValidationOutcome> {
        let now = self.clock.now_ms();
        let state = self.state.lock().unwrap();
        let cached = state.cache.as_ref()?;

        let within_throttle =
            state.last_check_ms > 0 && now.saturating_sub(state.last_check_ms) < self.config.throttle_ms;
        let within_ttl = now.saturating_sub(cached.computed_at_ms) < self.config.cache_ttl_ms;

        if within_throttle || within_ttl {
            Some(cached.outcome)
        } else {
            None
        }
    }

    fn cache_only(&self, outcome: ValidationOutcome) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().unwrap();
        state.cache = Some(CachedResult {
            outcome,
            computed_at_ms: now,
        });
    }

    fn invalidate_cache(&self) {
        let mut state = self.state.lock().unwrap();
        state.cache = None;
        state.last_check_ms = 0;
        state.cleared_malformed = false;
    }

    async fn load_record(&self) -> Result<Option<SessionRecord>, VigilError> {
        let raw = with_retries(|| self.store.get(keys::SESSION_RECORD)).await?;
        match raw {
            None => Ok(None),
            Some(json) => match serde_json::from_str::<SessionRecord>(&json) {
                Ok(record) => Ok(Some(record)),
                Err(_) => Err(VigilError::MalformedSession),
            },
        }
    }

    async fn persist(&self, record: &SessionRecord) -> Result<(), VigilError> {
        let json = serde_json::to_string(record)
            .map_err(|e| VigilError::Internal(format!("serialize session record: {e}")))?;
        with_retries(|| self.store.set(keys::SESSION_RECORD, &json)).await
    }

    /// The real validation check. Breaker feedback: storage outages and
    /// malformed records count as check failures; definitive outcomes
    /// (valid, absent, expired) count as successes because the check
    /// itself completed.
    async fn run_check(&self, now: u64) -> ValidationOutcome {
        let record = match self.load_record().await {
            Ok(record) => record,
            Err(VigilError::MalformedSession) => {
                self.breaker.on_failure();
                let clear_needed = {
                    let mut state = self.state.lock().unwrap();
                    !std::mem::replace(&mut state.cleared_malformed, true)
                };
                if clear_needed {
                    if let Err(e) = self.store.remove(keys::SESSION_RECORD).await {
                        tracing::debug!(error = %e, "failed to clear malformed session record");
                    }
                    self.log.emit(
                        "session-malformed",
                        "session record failed to parse and was cleared",
                        LogLevel::Warn,
                    );
                }
                return ValidationOutcome::denied(DenyReason::MalformedSession);
            }
            Err(e) => {
                self.breaker.on_failure();
                self.log.emit(
                    "session-storage",
                    &format!("session storage unavailable: {e}"),
                    LogLevel::Warn,
                );
                return ValidationOutcome::denied(DenyReason::StorageUnavailable);
            }
        };

        // A parseable read means the malformed episode (if any) is over.
        self.state.lock().unwrap().cleared_malformed = false;

        let mut record = match record {
            Some(record) => record,
            None => {
                self.breaker.on_success();
                return ValidationOutcome::denied(DenyReason::NoSession);
            }
        };

        if !record.authenticated {
            self.breaker.on_success();
            return ValidationOutcome::denied(DenyReason::NotAuthenticated);
        }

        if now.saturating_sub(record.last_activity_ms) > self.config.inactivity_timeout_ms {
            if let Err(e) = self.store.remove(keys::SESSION_RECORD).await {
                tracing::debug!(error = %e, "failed to clear expired session record");
            }
            self.log.emit(
                "session-expired",
                "session exceeded the inactivity timeout and was cleared",
                LogLevel::Info,
            );
            self.breaker.on_success();
            return ValidationOutcome::denied(DenyReason::ExpiredSession);
        }

        if let Some(check) = &self.fingerprint {
            if !check.confirm().await {
                // The check clears session and credential state before
                // returning false; the guard only reports the denial.
                self.breaker.on_success();
                return ValidationOutcome::denied(DenyReason::FingerprintMismatch);
            }
        }

        record.last_activity_ms = now;
        record.last_validation_ms = now;
        record.validation_count += 1;
        if let Err(e) = self.persist(&record).await {
            self.breaker.on_failure();
            self.log.emit(
                "session-storage",
                &format!("failed to persist session activity: {e}"),
                LogLevel::Warn,
            );
            return ValidationOutcome::denied(DenyReason::StorageUnavailable);
        }

        self.breaker.on_success();
        ValidationOutcome::ok()
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("config", &self.config)
            .field("circuit", &self.breaker.state())
            .finish_non_exhaustive()
    }
}
