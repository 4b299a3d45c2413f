//! Key-value store abstraction.
//!
//! All persistent state flows through [`KeyValueStore`]. Each component
//! owns one key namespace (`session.*`, `credential.*`, `security.*`) and
//! never touches another component's keys directly; cross-component reads
//! go through explicit accessor calls on the owning component.
//!
//! [`MemoryStore`] is the in-process double used by the test suites. It
//! carries a fail-switch so storage outages can be simulated
//! deterministically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::VigilError;

/// Namespaced keys for persisted state.
pub mod keys {
    /// Serialized [`crate::session_guard::SessionRecord`]
    pub const SESSION_RECORD: &str = "session.record";
    /// Base64 credential ciphertext
    pub const CREDENTIAL_CIPHERTEXT: &str = "credential.ciphertext";
    /// Serialized credential metadata (scopes, timestamps, KDF parameters)
    pub const CREDENTIAL_META: &str = "credential.meta";
    /// Anti-forgery token for the current page lifetime
    pub const CSRF_TOKEN: &str = "security.csrf_token";
    /// Previously accepted environment fingerprint
    pub const FINGERPRINT: &str = "security.fingerprint";
    /// Timestamped configuration backup metadata
    pub const CONFIG_BACKUPS: &str = "config.backups";
}

/// Asynchronous key-value store.
///
/// Unavailability is signalled as [`VigilError::Storage`]; callers retry
/// transient failures through [`with_retries`], bounded at 3 attempts.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, VigilError>;

    /// Write a value, overwriting any existing one.
    async fn set(&self, key: &str, value: &str) -> Result<(), VigilError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), VigilError>;
}

/// Maximum attempts for a storage operation, including the first.
pub const STORAGE_RETRY_ATTEMPTS: u32 = 3;

/// Execute a storage operation, retrying transient failures.
///
/// Retries are bounded at [`STORAGE_RETRY_ATTEMPTS`] with short
/// exponential backoff. Non-transient errors propagate immediately.
pub async fn with_retries<T, F, Fut>(mut op: F) -> Result<T, VigilError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, VigilError>>,
{
    let mut backoff = Duration::from_millis(25);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < STORAGE_RETRY_ATTEMPTS => {
                tracing::debug!(
                    attempt,
                    error = %e,
                    "transient storage failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// In-memory store for tests and ephemeral embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: tokio::sync::Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the fail-switch. While failing, every operation returns
    /// [`VigilError::Storage`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    fn check_available(&self) -> Result<(), VigilError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(VigilError::Storage("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, VigilError> {
        self.check_available()?;
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), VigilError> {
        self.check_available()?;
        self.inner
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), VigilError> {
        self.check_available()?;
        self.inner.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        // Removing an absent key is fine
        store.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_fail_switch() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(matches!(
            store.get("k").await,
            Err(VigilError::Storage(_))
        ));
        store.set_failing(false);
        assert!(store.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_retries_bounded_at_three() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VigilError::Storage("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(VigilError::Storage(_))));
        assert_eq!(calls.load(Ordering::SeqCst), STORAGE_RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_retries_stop_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VigilError::MalformedSession) }
        })
        .await;

        assert!(matches!(result, Err(VigilError::MalformedSession)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_succeed_after_transient() {
        let calls = AtomicU32::new(0);
        let result = with_retries(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(VigilError::Storage("blip".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
