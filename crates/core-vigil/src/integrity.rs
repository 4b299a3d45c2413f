//! Integrity monitor: anti-forgery token, environment fingerprint,
//! anomaly classification.
//!
//! The fingerprint is a BLAKE3 hash over a fixed tuple of environment
//! signals. It is recomputed on a schedule and compared with the stored
//! value; a mismatch is never silently accepted; it is classified
//! `PossibleHijack` and forces reauthentication. Softer anomalies
//! (interaction bursts) are reported but non-fatal.
//!
//! The monitor is caller-driven: the embedding layer feeds it
//! visibility/interaction events and ticks the fingerprint check; the
//! monitor holds the state machine and produces classifications.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::clock::Clock;
use crate::credential_vault::fill_random;
use crate::error::VigilError;
use crate::session_guard::FingerprintCheck;
use crate::store::{keys, with_retries, KeyValueStore};
use crate::throttle_log::{LogLevel, RateLimitedLog};

/// The fixed tuple of environment signals hashed into the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSignals {
    /// Client identifier (user-agent equivalent)
    pub client_id: String,
    pub locale: String,
    /// Screen geometry, e.g. "1920x1080"
    pub screen: String,
    /// Minutes east of UTC
    pub timezone_offset_min: i32,
    pub platform: String,
    pub cookies_enabled: bool,
}

/// Source of environment signals.
pub trait EnvironmentSource: Send + Sync {
    fn signals(&self) -> EnvSignals;
}

/// Mutable fixed-signal source for tests.
#[derive(Debug)]
pub struct StaticEnvironment {
    signals: std::sync::Mutex<EnvSignals>,
}

impl StaticEnvironment {
    pub fn new(signals: EnvSignals) -> Self {
        Self {
            signals: std::sync::Mutex::new(signals),
        }
    }

    /// Replace the signals, simulating an environment change.
    pub fn set(&self, signals: EnvSignals) {
        *self.signals.lock().unwrap() = signals;
    }
}

impl EnvironmentSource for StaticEnvironment {
    fn signals(&self) -> EnvSignals {
        self.signals.lock().unwrap().clone()
    }
}

/// Page/interaction events fed by the embedding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Page lost foreground visibility
    Hidden,
    /// Page regained foreground visibility
    Visible,
    /// A user interaction (click-equivalent)
    Interaction,
}

/// Classified anomaly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Environment fingerprint changed: fatal to the session
    PossibleHijack { expected: String, actual: String },
    /// Abnormally dense interaction burst: reported, non-fatal
    SuspiciousActivity { events: u32, window_ms: u64 },
}

/// Outcome of a fingerprint check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintStatus {
    pub ok: bool,
    pub anomaly: Option<Anomaly>,
}

/// Monitor thresholds.
#[derive(Debug, Clone)]
pub struct IntegrityConfig {
    /// Fingerprint recheck interval (guidance for the watchdog)
    pub recheck_interval_ms: u64,
    /// Interactions within the burst window that trip the detector
    pub burst_threshold: u32,
    pub burst_window_ms: u64,
    /// Repeated `force_reauthentication` calls inside this window are
    /// treated as one
    pub reauth_debounce_ms: u64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            recheck_interval_ms: 60_000,
            burst_threshold: 30,
            burst_window_ms: 10_000,
            reauth_debounce_ms: 2_000,
        }
    }
}

#[derive(Debug)]
struct MonitorState {
    csrf_token: Option<String>,
    hidden: bool,
    interactions: VecDeque<u64>,
    last_reauth_ms: u64,
    reauth_required: bool,
}

/// Anti-forgery token issuer and environment tamper detector.
pub struct IntegrityMonitor {
    config: IntegrityConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    env: Arc<dyn EnvironmentSource>,
    log: Arc<RateLimitedLog>,
    state: std::sync::Mutex<MonitorState>,
}

impl IntegrityMonitor {
    pub fn new(
        config: IntegrityConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        env: Arc<dyn EnvironmentSource>,
        log: Arc<RateLimitedLog>,
    ) -> Self {
        Self {
            config,
            clock,
            store,
            env,
            log,
            state: std::sync::Mutex::new(MonitorState {
                csrf_token: None,
                hidden: false,
                interactions: VecDeque::new(),
                last_reauth_ms: 0,
                reauth_required: false,
            }),
        }
    }

    /// Recheck interval in milliseconds, for the embedding watchdog.
    pub fn recheck_interval_ms(&self) -> u64 {
        self.config.recheck_interval_ms
    }

    /// Issue (or re-issue) the anti-forgery token for this page
    /// lifetime.
    pub async fn issue_anti_forgery_token(&self) -> Result<String, VigilError> {
        let mut bytes = [0u8; 32];
        fill_random(&mut bytes, &*self.clock);
        let token = hex::encode(bytes);

        with_retries(|| self.store.set(keys::CSRF_TOKEN, &token)).await?;
        self.state.lock().unwrap().csrf_token = Some(token.clone());
        Ok(token)
    }

    /// Check a presented anti-forgery token against the issued one.
    pub async fn validate_anti_forgery_token(&self, presented: &str) -> bool {
        let issued = {
            let state = self.state.lock().unwrap();
            state.csrf_token.clone()
        };
        let issued = match issued {
            Some(token) => Some(token),
            // Fall back to the persisted copy (fresh process, same page)
            None => self.store.get(keys::CSRF_TOKEN).await.ok().flatten(),
        };
        match issued {
            Some(token) => constant_time_eq(token.as_bytes(), presented.as_bytes()),
            None => false,
        }
    }

    /// Compute the fingerprint of the current environment.
    pub fn current_fingerprint(&self) -> String {
        fingerprint_of(&self.env.signals())
    }

    /// Compare the current environment against the stored fingerprint.
    ///
    /// The first check stores the fingerprint; a later mismatch is
    /// classified `PossibleHijack` and the stored value is left intact
    /// so the mismatch does not self-heal.
    pub async fn check_fingerprint(&self) -> Result<FingerprintStatus, VigilError> {
        let actual = self.current_fingerprint();
        let stored = with_retries(|| self.store.get(keys::FINGERPRINT)).await?;

        match stored {
            None => {
                with_retries(|| self.store.set(keys::FINGERPRINT, &actual)).await?;
                Ok(FingerprintStatus {
                    ok: true,
                    anomaly: None,
                })
            }
            Some(expected) if expected == actual => Ok(FingerprintStatus {
                ok: true,
                anomaly: None,
            }),
            Some(expected) => {
                self.log.emit(
                    "fingerprint-mismatch",
                    "environment fingerprint mismatch detected",
                    LogLevel::Error,
                );
                Ok(FingerprintStatus {
                    ok: false,
                    anomaly: Some(Anomaly::PossibleHijack { expected, actual }),
                })
            }
        }
    }

    /// Feed a page event. Returns an anomaly when one is detected.
    ///
    /// `Visible` after `Hidden` rotates the anti-forgery token; dense
    /// interaction bursts are classified `SuspiciousActivity`.
    pub async fn observe(&self, event: SessionEvent) -> Result<Option<Anomaly>, VigilError> {
        let now = self.clock.now_ms();
        match event {
            SessionEvent::Hidden => {
                self.state.lock().unwrap().hidden = true;
                Ok(None)
            }
            SessionEvent::Visible => {
                let was_hidden = {
                    let mut state = self.state.lock().unwrap();
                    std::mem::replace(&mut state.hidden, false)
                };
                if was_hidden {
                    self.issue_anti_forgery_token().await?;
                    tracing::debug!("anti-forgery token rotated after page resume");
                }
                Ok(None)
            }
            SessionEvent::Interaction => {
                let burst = {
                    let mut state = self.state.lock().unwrap();
                    state.interactions.push_back(now);
                    let cutoff = now.saturating_sub(self.config.burst_window_ms);
                    while state
                        .interactions
                        .front()
                        .is_some_and(|&t| t < cutoff)
                    {
                        state.interactions.pop_front();
                    }
                    state.interactions.len() as u32
                };
                if burst > self.config.burst_threshold {
                    self.log.emit(
                        "interaction-burst",
                        "abnormally dense interaction burst",
                        LogLevel::Warn,
                    );
                    Ok(Some(Anomaly::SuspiciousActivity {
                        events: burst,
                        window_ms: self.config.burst_window_ms,
                    }))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Clear session, credential and security state and flag the UI to
    /// restart the login flow. Idempotent within the debounce window.
    pub async fn force_reauthentication(&self, reason: &str) -> Result<bool, VigilError> {
        let now = self.clock.now_ms();
        {
            let mut state = self.state.lock().unwrap();
            if now.saturating_sub(state.last_reauth_ms) < self.config.reauth_debounce_ms
                && state.reauth_required
            {
                return Ok(false);
            }
            state.last_reauth_ms = now;
            state.reauth_required = true;
            state.csrf_token = None;
        }

        tracing::warn!(reason, "forcing reauthentication");
        for key in [
            keys::SESSION_RECORD,
            keys::CREDENTIAL_CIPHERTEXT,
            keys::CREDENTIAL_META,
            keys::CSRF_TOKEN,
            keys::FINGERPRINT,
        ] {
            if let Err(e) = self.store.remove(key).await {
                // Best effort
                tracing::debug!(key, error = %e, "failed to clear key during forced reauth");
            }
        }
        Ok(true)
    }

    /// Whether a forced reauthentication is pending UI acknowledgement.
    pub fn reauth_required(&self) -> bool {
        self.state.lock().unwrap().reauth_required
    }

    /// UI acknowledged the reauth flag and restarted the login flow.
    pub fn acknowledge_reauth(&self) {
        self.state.lock().unwrap().reauth_required = false;
    }

    /// Reset in-memory state. Used by recovery.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.csrf_token = None;
        state.hidden = false;
        state.interactions.clear();
        state.last_reauth_ms = 0;
        state.reauth_required = false;
    }
}

impl std::fmt::Debug for IntegrityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FingerprintCheck for IntegrityMonitor {
    async fn confirm(&self) -> bool {
        match self.check_fingerprint().await {
            Ok(status) if status.ok => true,
            Ok(_) => {
                // A mismatch is fatal to the session: session and
                // credential state are cleared before the denial is
                // reported, never deferred to the next recheck tick.
                if let Err(e) = self
                    .force_reauthentication("environment fingerprint mismatch")
                    .await
                {
                    tracing::warn!(error = %e, "forced reauthentication failed");
                }
                false
            }
            // Storage trouble is the guard's problem, not a mismatch
            Err(_) => true,
        }
    }
}

/// Deterministic hash over the signal tuple. Field order is fixed; the
/// unit separator keeps adjacent fields from gluing together.
fn fingerprint_of(signals: &EnvSignals) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [
        signals.client_id.as_str(),
        signals.locale.as_str(),
        signals.screen.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.update(&signals.timezone_offset_min.to_le_bytes());
    hasher.update(&[0x1f]);
    hasher.update(signals.platform.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(&[signals.cookies_enabled as u8]);
    hasher.finalize().to_hex().to_string()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::throttle_log::{ThrottleConfig, VecSink};

    fn signals() -> EnvSignals {
        EnvSignals {
            client_id: "console/1.0".to_string(),
            locale: "en-GB".to_string(),
            screen: "1920x1080".to_string(),
            timezone_offset_min: 60,
            platform: "linux".to_string(),
            cookies_enabled: true,
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        env: Arc<StaticEnvironment>,
        monitor: IntegrityMonitor,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let env = Arc::new(StaticEnvironment::new(signals()));
        let sink = Arc::new(VecSink::new());
        let log = Arc::new(RateLimitedLog::new(
            ThrottleConfig::default(),
            clock.clone() as Arc<dyn Clock>,
            sink as Arc<dyn crate::throttle_log::LogSink>,
        ));
        let monitor = IntegrityMonitor::new(
            IntegrityConfig::default(),
            clock.clone() as Arc<dyn Clock>,
            store.clone() as Arc<dyn KeyValueStore>,
            env.clone() as Arc<dyn EnvironmentSource>,
            log,
        );
        Fixture {
            clock,
            store,
            env,
            monitor,
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint_of(&signals());
        let b = fingerprint_of(&signals());
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_sensitive_to_each_component() {
        let base = fingerprint_of(&signals());

        let variants = [
            EnvSignals {
                client_id: "console/2.0".into(),
                ..signals()
            },
            EnvSignals {
                locale: "fr-FR".into(),
                ..signals()
            },
            EnvSignals {
                screen: "2560x1440".into(),
                ..signals()
            },
            EnvSignals {
                timezone_offset_min: -300,
                ..signals()
            },
            EnvSignals {
                platform: "macos".into(),
                ..signals()
            },
            EnvSignals {
                cookies_enabled: false,
                ..signals()
            },
        ];
        for variant in variants {
            assert_ne!(base, fingerprint_of(&variant), "variant: {variant:?}");
        }
    }

    #[tokio::test]
    async fn test_first_check_stores_fingerprint() {
        let f = fixture();
        let status = f.monitor.check_fingerprint().await.unwrap();
        assert!(status.ok);
        assert!(f
            .store
            .get(keys::FINGERPRINT)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_mismatch_classified_as_hijack() {
        let f = fixture();
        f.monitor.check_fingerprint().await.unwrap();

        f.env.set(EnvSignals {
            platform: "windows".into(),
            ..signals()
        });
        let status = f.monitor.check_fingerprint().await.unwrap();
        assert!(!status.ok);
        assert!(matches!(
            status.anomaly,
            Some(Anomaly::PossibleHijack { .. })
        ));

        // Mismatch does not self-heal: stored value is unchanged
        let again = f.monitor.check_fingerprint().await.unwrap();
        assert!(!again.ok);
    }

    #[tokio::test]
    async fn test_confirm_mismatch_forces_reauth() {
        let f = fixture();
        f.store.set(keys::SESSION_RECORD, "{}").await.unwrap();
        f.store
            .set(keys::CREDENTIAL_CIPHERTEXT, "ct")
            .await
            .unwrap();
        f.monitor.check_fingerprint().await.unwrap();
        assert!(f.monitor.confirm().await);

        f.env.set(EnvSignals {
            platform: "windows".into(),
            ..signals()
        });
        assert!(!f.monitor.confirm().await);
        assert!(f.monitor.reauth_required());
        assert_eq!(f.store.get(keys::SESSION_RECORD).await.unwrap(), None);
        assert_eq!(
            f.store.get(keys::CREDENTIAL_CIPHERTEXT).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_anti_forgery_token_roundtrip() {
        let f = fixture();
        let token = f.monitor.issue_anti_forgery_token().await.unwrap();
        assert_eq!(token.len(), 64); // 32 bytes hex
        assert!(f.monitor.validate_anti_forgery_token(&token).await);
        assert!(!f.monitor.validate_anti_forgery_token("forged").await);
    }

    #[tokio::test]
    async fn test_token_rotated_on_resume() {
        let f = fixture();
        let before = f.monitor.issue_anti_forgery_token().await.unwrap();

        f.monitor.observe(SessionEvent::Hidden).await.unwrap();
        f.monitor.observe(SessionEvent::Visible).await.unwrap();

        assert!(!f.monitor.validate_anti_forgery_token(&before).await);
        // Visible without a preceding Hidden does not rotate
        let current = f.store.get(keys::CSRF_TOKEN).await.unwrap().unwrap();
        f.monitor.observe(SessionEvent::Visible).await.unwrap();
        assert!(f.monitor.validate_anti_forgery_token(&current).await);
    }

    #[tokio::test]
    async fn test_interaction_burst_detected() {
        let f = fixture();

        // 30 interactions spread over the window: at the threshold, no anomaly
        for _ in 0..30 {
            let anomaly = f.monitor.observe(SessionEvent::Interaction).await.unwrap();
            assert_eq!(anomaly, None);
            f.clock.advance_ms(10);
        }
        // The 31st within the window trips the detector
        let anomaly = f.monitor.observe(SessionEvent::Interaction).await.unwrap();
        assert!(matches!(
            anomaly,
            Some(Anomaly::SuspiciousActivity { events: 31, .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_interactions_never_burst() {
        let f = fixture();
        for _ in 0..100 {
            let anomaly = f.monitor.observe(SessionEvent::Interaction).await.unwrap();
            assert_eq!(anomaly, None);
            f.clock.advance_ms(1_000);
        }
    }

    #[tokio::test]
    async fn test_force_reauth_clears_state_and_debounces() {
        let f = fixture();
        f.store.set(keys::SESSION_RECORD, "{}").await.unwrap();
        f.store
            .set(keys::CREDENTIAL_CIPHERTEXT, "ct")
            .await
            .unwrap();
        f.monitor.issue_anti_forgery_token().await.unwrap();

        assert!(f
            .monitor
            .force_reauthentication("fingerprint mismatch")
            .await
            .unwrap());
        assert!(f.monitor.reauth_required());
        assert_eq!(f.store.get(keys::SESSION_RECORD).await.unwrap(), None);
        assert_eq!(
            f.store.get(keys::CREDENTIAL_CIPHERTEXT).await.unwrap(),
            None
        );

        // Second call in quick succession is a no-op
        assert!(!f
            .monitor
            .force_reauthentication("fingerprint mismatch")
            .await
            .unwrap());

        f.monitor.acknowledge_reauth();
        assert!(!f.monitor.reauth_required());
    }
}
