//! Error taxonomy for the session-integrity core.
//!
//! Every fault a component can surface is a typed variant here. The
//! distinction that matters to callers is transience: transient faults
//! (storage, network) may be retried with bounded backoff, credential
//! faults are fatal to the credential and never retried automatically,
//! and `PossibleHijack` is fatal to the session itself.

use thiserror::Error;

/// Errors surfaced by the vigil components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VigilError {
    /// Session record failed to parse or is missing required fields
    #[error("malformed session record")]
    MalformedSession,

    /// Session exceeded the inactivity timeout
    #[error("session expired")]
    ExpiredSession,

    /// Validation circuit is open; no check was attempted
    #[error("validation circuit is open")]
    CircuitOpen,

    /// Persistent store unavailable (transient, bounded retry)
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// Network transport failure (transient for revalidation)
    #[error("network error: {0}")]
    Network(String),

    /// Credential failed local format validation
    #[error("credential format invalid: {0}")]
    InvalidFormat(String),

    /// Identity endpoint did not grant every required scope
    #[error("credential missing required scopes: {0:?}")]
    MissingScopes(Vec<String>),

    /// Identity endpoint rejected the credential (non-2xx, definitive)
    #[error("credential rejected by identity endpoint (status {status})")]
    CredentialRejected { status: u16 },

    /// Ciphertext failed authenticated decryption; either corrupted or
    /// encrypted under a different session identity
    #[error("credential is corrupt or bound to another session")]
    CorruptOrForeignCredential,

    /// Credential exceeded the maximum at-rest age
    #[error("credential expired")]
    CredentialExpired,

    /// No credential is currently stored
    #[error("no credential stored")]
    NoCredential,

    /// No active session exists for the requested operation
    #[error("no active session")]
    NoSession,

    /// Environment fingerprint mismatch; session must not continue
    #[error("possible session hijack: {0}")]
    PossibleHijack(String),

    /// Anomalous but non-fatal behaviour (e.g. interaction bursts)
    #[error("suspicious activity: {0}")]
    SuspiciousActivity(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl VigilError {
    /// Whether this error is transient and safe to retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, VigilError::Storage(_) | VigilError::Network(_))
    }

    /// Whether this error is fatal to the stored credential.
    ///
    /// Fatal credential errors are never retried automatically; the
    /// credential must be cleared and re-entered by the operator.
    pub fn is_credential_fatal(&self) -> bool {
        matches!(
            self,
            VigilError::InvalidFormat(_)
                | VigilError::MissingScopes(_)
                | VigilError::CredentialRejected { .. }
                | VigilError::CorruptOrForeignCredential
                | VigilError::CredentialExpired
        )
    }

    /// Whether this error is fatal to the current session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, VigilError::PossibleHijack(_))
    }

    /// Diagnostics bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            VigilError::MalformedSession
            | VigilError::ExpiredSession
            | VigilError::CircuitOpen
            | VigilError::NoSession => ErrorCategory::Session,
            VigilError::InvalidFormat(_)
            | VigilError::MissingScopes(_)
            | VigilError::CredentialRejected { .. }
            | VigilError::CorruptOrForeignCredential
            | VigilError::CredentialExpired
            | VigilError::NoCredential => ErrorCategory::Credential,
            VigilError::PossibleHijack(_) | VigilError::SuspiciousActivity(_) => {
                ErrorCategory::Integrity
            }
            VigilError::Storage(_) => ErrorCategory::Storage,
            VigilError::Network(_) => ErrorCategory::Network,
            VigilError::Internal(_) => ErrorCategory::Other,
        }
    }
}

/// Coarse error buckets used by the diagnostics ring buffer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Session,
    Credential,
    Integrity,
    Storage,
    Network,
    Recovery,
    Other,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Session => "session",
            ErrorCategory::Credential => "credential",
            ErrorCategory::Integrity => "integrity",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Network => "network",
            ErrorCategory::Recovery => "recovery",
            ErrorCategory::Other => "other",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        assert!(VigilError::Storage("down".into()).is_transient());
        assert!(VigilError::Network("timeout".into()).is_transient());
        assert!(!VigilError::ExpiredSession.is_transient());
        assert!(!VigilError::CorruptOrForeignCredential.is_transient());
    }

    #[test]
    fn test_credential_fatal_classification() {
        assert!(VigilError::InvalidFormat("short".into()).is_credential_fatal());
        assert!(VigilError::MissingScopes(vec!["repo".into()]).is_credential_fatal());
        assert!(VigilError::CredentialExpired.is_credential_fatal());
        assert!(VigilError::CorruptOrForeignCredential.is_credential_fatal());
        // Transient network failure during revalidation is NOT fatal
        assert!(!VigilError::Network("timeout".into()).is_credential_fatal());
    }

    #[test]
    fn test_session_fatal() {
        assert!(VigilError::PossibleHijack("fingerprint mismatch".into()).is_session_fatal());
        assert!(!VigilError::SuspiciousActivity("burst".into()).is_session_fatal());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            VigilError::CircuitOpen.category(),
            ErrorCategory::Session
        );
        assert_eq!(
            VigilError::NoCredential.category(),
            ErrorCategory::Credential
        );
        assert_eq!(
            VigilError::PossibleHijack("x".into()).category(),
            ErrorCategory::Integrity
        );
    }
}
