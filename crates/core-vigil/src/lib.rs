//! Sacristan Core Vigil: pure-logic session integrity primitives.
//!
//! # Overview
//!
//! This crate provides the session-integrity and credential-resilience
//! cluster behind the Sacristan admin console:
//!
//! - **Circuit Breaker**: stops runaway re-validation loops by failing
//!   fast after repeated check failures
//! - **Session Guard**: throttled, cached, single-flight session
//!   validation with an inactivity timeout
//! - **Credential Vault**: third-party access token encrypted at rest
//!   under a session-derived key, with format/scope validation and a
//!   staleness policy
//! - **Integrity Monitor**: anti-forgery tokens, environment
//!   fingerprinting, anomaly classification
//! - **Diagnostics Center**: bounded error ring, health snapshots,
//!   tiered Soft/Medium/Hard recovery
//! - **Rate-Limited Log**: deduplicates repeated diagnostics so a
//!   persistent fault produces one entry, not a flood
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Files or databases (storage goes through [`store::KeyValueStore`])
//! - HTTP (the identity endpoint is the
//!   [`credential_vault::IdentityClient`] seam)
//! - Real time (everything ticks off [`clock::Clock`])
//!
//! The embedding layer supplies production implementations; the test
//! suites supply `ManualClock`, `MemoryStore`, `VecSink`,
//! `StaticIdentity` and `StaticEnvironment` doubles so every throttle
//! window, cooldown and staleness check is exercised deterministically.
//!
//! # Control flow
//!
//! ```text
//! UI ──► SessionGuard.validate ──► cache / throttle / circuit breaker
//!            │                         │
//!            │ confirm fingerprint     │ real check (single-flight)
//!            ▼                         ▼
//!     IntegrityMonitor            KeyValueStore
//!            │
//!            │ PossibleHijack ⇒ force_reauthentication
//!            ▼
//!     DiagnosticsCenter ◄── error events from every component
//!            │
//!            ▼ recover(mode): Soft / Medium / Hard
//!     RecoveryHooks callbacks into each peer
//! ```

pub mod breaker;
pub mod clock;
pub mod credential_vault;
pub mod diagnostics;
pub mod error;
pub mod integrity;
pub mod session_guard;
pub mod store;
pub mod throttle_log;

// Re-export main types for convenience
pub use breaker::{Admission, BreakerConfig, CircuitBreaker, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential_vault::{
    CredentialMeta, CredentialVault, IdentityClient, IdentityProfile, RateLimitSnapshot,
    RefreshOutcome, StaticIdentity, VaultConfig,
};
pub use diagnostics::{
    recovery_step, ComponentHealth, ComponentStatus, DiagnosticsCenter, ErrorEvent,
    HealthSnapshot, OverallStatus, RecoveryHooks, RecoveryMode, RecoveryReport, StepResult,
};
pub use error::{ErrorCategory, VigilError};
pub use integrity::{
    Anomaly, EnvSignals, EnvironmentSource, FingerprintStatus, IntegrityConfig,
    IntegrityMonitor, SessionEvent, StaticEnvironment,
};
pub use session_guard::{
    DenyReason, FingerprintCheck, SessionGuard, SessionGuardConfig, SessionRecord,
    ValidationOutcome,
};
pub use store::{KeyValueStore, MemoryStore};
pub use throttle_log::{LogLevel, LogSink, RateLimitedLog, ThrottleConfig, TracingSink, VecSink};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use sacristan_core_vigil::prelude::*;
/// ```
pub mod prelude {
    pub use super::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
    pub use super::clock::{Clock, SystemClock};
    pub use super::credential_vault::{CredentialVault, IdentityClient, VaultConfig};
    pub use super::diagnostics::{
        ComponentHealth, ComponentStatus, DiagnosticsCenter, RecoveryHooks, RecoveryMode,
    };
    pub use super::error::VigilError;
    pub use super::integrity::{IntegrityConfig, IntegrityMonitor, SessionEvent};
    pub use super::session_guard::{SessionGuard, SessionGuardConfig};
    pub use super::store::KeyValueStore;
    pub use super::throttle_log::{RateLimitedLog, ThrottleConfig, TracingSink};
}
