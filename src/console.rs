/*!
 * Console wiring
 *
 * # Overview
 *
 * Builds the five core components against concrete infrastructure (file
 * store, GitHub identity endpoint, host environment probe, system clock)
 * and exposes the operations the CLI drives. Also owns the background
 * watchdog that rechecks the environment fingerprint and revalidates the
 * stored credential on an interval.
 */

use std::sync::Arc;
use std::time::Duration;

use sacristan_core_vigil::breaker::{BreakerConfig, CircuitState};
use sacristan_core_vigil::clock::{Clock, SystemClock};
use sacristan_core_vigil::credential_vault::{
    CredentialMeta, CredentialVault, IdentityClient, IdentityProfile, RefreshOutcome, VaultConfig,
};
use sacristan_core_vigil::diagnostics::{
    recovery_step, ComponentHealth, ComponentStatus, DiagnosticsCenter, HealthSnapshot,
    RecoveryHooks, RecoveryMode, RecoveryReport, ERROR_RATE_CRITICAL_PER_MIN,
};
use sacristan_core_vigil::integrity::{
    Anomaly, EnvironmentSource, FingerprintStatus, IntegrityConfig, IntegrityMonitor,
};
use sacristan_core_vigil::session_guard::{
    DenyReason, SessionGuard, SessionGuardConfig, ValidationOutcome,
};
use sacristan_core_vigil::store::{keys, KeyValueStore};
use sacristan_core_vigil::throttle_log::{RateLimitedLog, ThrottleConfig, TracingSink};
use sacristan_core_vigil::VigilError;
use sacristan_core_vigil::credential_vault::Zeroizing;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ConfigBackup, ConsoleConfig};
use crate::env_probe::HostEnvironment;
use crate::error::Result;
use crate::github::GithubIdentity;
use crate::store::FileStore;

/// Top-level handle over the session-integrity components
pub struct Console {
    /// Active configuration; recovery's reset-config step rewrites it
    config: Arc<std::sync::RwLock<ConsoleConfig>>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    log: Arc<RateLimitedLog>,
    guard: Arc<SessionGuard>,
    vault: Arc<CredentialVault>,
    monitor: Arc<IntegrityMonitor>,
    diagnostics: Arc<DiagnosticsCenter>,
    shutdown: watch::Sender<bool>,
}

impl Console {
    /// Wire the components against injected infrastructure.
    ///
    /// Production goes through [`Console::open`]; tests hand in in-memory
    /// doubles here.
    pub fn wire(
        config: ConsoleConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        identity: Arc<dyn IdentityClient>,
        env: Arc<dyn EnvironmentSource>,
    ) -> Self {
        let log = Arc::new(RateLimitedLog::new(
            ThrottleConfig::default(),
            clock.clone(),
            Arc::new(TracingSink),
        ));

        let monitor = Arc::new(IntegrityMonitor::new(
            IntegrityConfig {
                recheck_interval_ms: config.fingerprint_recheck_ms,
                ..Default::default()
            },
            clock.clone(),
            store.clone(),
            env,
            log.clone(),
        ));

        let guard = Arc::new(
            SessionGuard::new(
                SessionGuardConfig {
                    throttle_ms: config.session_throttle_ms,
                    cache_ttl_ms: config.session_cache_ttl_ms,
                    inactivity_timeout_ms: config.inactivity_timeout_ms,
                    breaker: BreakerConfig {
                        failure_threshold: config.breaker_failure_threshold,
                        cooldown_ms: config.breaker_cooldown_ms,
                    },
                },
                clock.clone(),
                store.clone(),
                log.clone(),
            )
            .with_fingerprint_check(monitor.clone()),
        );

        let vault = Arc::new(CredentialVault::new(
            VaultConfig {
                max_age_ms: config.max_credential_age_ms,
                refresh_interval_ms: config.credential_refresh_interval_ms,
                ..Default::default()
            },
            clock.clone(),
            store.clone(),
            identity,
        ));

        let diagnostics = Arc::new(DiagnosticsCenter::new(clock.clone()));
        let (shutdown, _) = watch::channel(false);

        Console {
            config: Arc::new(std::sync::RwLock::new(config)),
            clock,
            store,
            log,
            guard,
            vault,
            monitor,
            diagnostics,
            shutdown,
        }
    }

    /// Open the console against production infrastructure.
    pub fn open(config: ConsoleConfig) -> Result<Self> {
        config.validate()?;
        let state_dir = config.resolve_state_dir()?;
        let store = Arc::new(FileStore::open(&state_dir)?);
        let identity = Arc::new(GithubIdentity::new(config.api_base.clone())?);
        Ok(Console::wire(
            config,
            Arc::new(SystemClock),
            store,
            identity,
            Arc::new(HostEnvironment::new()),
        ))
    }

    pub fn diagnostics(&self) -> &DiagnosticsCenter {
        &self.diagnostics
    }

    pub fn monitor(&self) -> &IntegrityMonitor {
        &self.monitor
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    /// The configuration currently in force.
    pub fn active_config(&self) -> ConsoleConfig {
        self.config.read().unwrap().clone()
    }

    /// Validate the current session, feeding denials into diagnostics.
    ///
    /// Only denials from a fresh check are recorded; cached outcomes
    /// replayed within the throttle window do not inflate the error
    /// rate.
    pub async fn validate_session(&self) -> ValidationOutcome {
        let checks_before = self.guard.checks_performed();
        let outcome = self.guard.validate().await;
        if let Some(reason) = outcome.reason {
            debug!(?reason, "session validation denied");
            if self.guard.checks_performed() > checks_before {
                match reason {
                    DenyReason::StorageUnavailable => self.diagnostics.record(
                        &VigilError::Storage("session store unreachable".into()),
                        "session-validate",
                    ),
                    DenyReason::MalformedSession => self
                        .diagnostics
                        .record(&VigilError::MalformedSession, "session-validate"),
                    DenyReason::FingerprintMismatch => self.diagnostics.record(
                        &VigilError::PossibleHijack("environment fingerprint changed".into()),
                        "session-validate",
                    ),
                    _ => {}
                }
            }
        }
        outcome
    }

    /// Establish a new authenticated session bound to the current
    /// environment fingerprint.
    pub async fn login(&self, session_id: &str) -> Result<()> {
        let fingerprint = self.monitor.current_fingerprint();
        self.guard
            .record_login(session_id, Some(fingerprint))
            .await?;
        self.monitor.issue_anti_forgery_token().await?;
        self.monitor.acknowledge_reauth();
        Ok(())
    }

    /// Tear down the session and its anti-forgery token.
    pub async fn logout(&self) -> Result<()> {
        self.guard.logout().await?;
        if let Err(e) = self.store.remove(keys::CSRF_TOKEN).await {
            self.diagnostics.record(&e, "logout");
        }
        info!("session closed");
        Ok(())
    }

    /// Vet and store an access token for the active session.
    pub async fn store_credential(&self, token: &str) -> Result<IdentityProfile> {
        let session_id = self.guard.current_session_id().await?;
        match self.vault.store(token, &session_id).await {
            Ok(profile) => {
                info!(login = %profile.login, "credential stored");
                Ok(profile)
            }
            Err(e) => {
                self.diagnostics.record(&e, "credential-store");
                Err(e.into())
            }
        }
    }

    /// Decrypt the stored credential for the active session.
    pub async fn reveal_credential(&self) -> Result<Zeroizing<String>> {
        let session_id = self.guard.current_session_id().await?;
        match self.vault.retrieve(&session_id).await {
            Ok(token) => Ok(token),
            Err(e) => {
                self.diagnostics.record(&e, "credential-retrieve");
                Err(e.into())
            }
        }
    }

    /// Stored credential metadata, if any.
    pub async fn credential_status(&self) -> Result<Option<CredentialMeta>> {
        Ok(self.vault.last_meta().await?)
    }

    /// Remove the stored credential.
    pub async fn clear_credential(&self) -> Result<()> {
        self.vault.clear().await?;
        Ok(())
    }

    /// Revalidate the stored credential against the identity endpoint.
    pub async fn refresh_credential(&self) -> Result<RefreshOutcome> {
        let session_id = self.guard.current_session_id().await?;
        match self.vault.refresh_validation(&session_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.diagnostics.record(&e, "credential-refresh");
                Err(e.into())
            }
        }
    }

    /// Compare the live environment fingerprint with the accepted one.
    pub async fn check_fingerprint(&self) -> Result<FingerprintStatus> {
        let status = self.monitor.check_fingerprint().await?;
        if let Some(Anomaly::PossibleHijack { .. }) = &status.anomaly {
            self.diagnostics.record(
                &VigilError::PossibleHijack("environment fingerprint changed".into()),
                "fingerprint-check",
            );
            self.monitor
                .force_reauthentication("environment fingerprint changed")
                .await?;
        }
        Ok(status)
    }

    /// Assemble the component health snapshot.
    pub async fn health(&self) -> HealthSnapshot {
        let mut components = Vec::with_capacity(4);

        components.push(ComponentHealth::new(
            "session-guard",
            match self.guard.circuit_state() {
                CircuitState::Closed => ComponentStatus::Healthy,
                CircuitState::HalfOpen { .. } => ComponentStatus::Warning,
                CircuitState::Open { .. } => ComponentStatus::Error,
            },
        ));

        let vault_status = match self.vault.last_meta().await {
            Err(_) => ComponentStatus::Error,
            Ok(None) => ComponentStatus::Healthy,
            Ok(Some(meta)) => {
                let now = self.clock.now_ms();
                let refresh_interval_ms =
                    self.config.read().unwrap().credential_refresh_interval_ms;
                if now.saturating_sub(meta.last_validated_ms) > refresh_interval_ms {
                    ComponentStatus::Warning
                } else {
                    ComponentStatus::Healthy
                }
            }
        };
        components.push(ComponentHealth::new("credential-vault", vault_status));

        components.push(ComponentHealth::new(
            "integrity-monitor",
            if self.monitor.reauth_required() {
                ComponentStatus::Error
            } else {
                ComponentStatus::Healthy
            },
        ));

        components.push(ComponentHealth::new(
            "storage",
            match self.store.get(keys::SESSION_RECORD).await {
                Ok(_) => ComponentStatus::Healthy,
                Err(_) => ComponentStatus::Error,
            },
        ));

        self.diagnostics.snapshot_with(components)
    }

    /// Run tiered recovery, wiring the hooks into the live components.
    pub async fn recover(&self, mode: RecoveryMode) -> RecoveryReport {
        let hooks = self.recovery_hooks();
        self.diagnostics.recover(mode, &hooks).await
    }

    fn recovery_hooks(&self) -> RecoveryHooks {
        let store = self.store.clone();
        let clear_session = recovery_step(move || {
            let store = store.clone();
            async move { store.remove(keys::SESSION_RECORD).await }
        });

        let guard = self.guard.clone();
        let clear_caches = recovery_step(move || {
            let guard = guard.clone();
            async move {
                guard.reset();
                Ok(())
            }
        });

        let guard = self.guard.clone();
        let reset_circuit = recovery_step(move || {
            let guard = guard.clone();
            async move {
                guard.reset();
                Ok(())
            }
        });

        let log = self.log.clone();
        let clear_log_state = recovery_step(move || {
            let log = log.clone();
            async move {
                log.reset();
                Ok(())
            }
        });

        let store = self.store.clone();
        let clock = self.clock.clone();
        let config = self.config.clone();
        let reset_config = recovery_step(move || {
            let store = store.clone();
            let clock = clock.clone();
            let config = config.clone();
            async move {
                // Snapshot the active configuration, then restore the
                // default timing parameters
                let backup = ConfigBackup {
                    saved_at_ms: clock.now_ms(),
                    config: config.read().unwrap().clone(),
                };
                let mut backups: Vec<ConfigBackup> = match store.get(keys::CONFIG_BACKUPS).await? {
                    Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
                    None => Vec::new(),
                };
                backups.push(backup);
                while backups.len() > 3 {
                    backups.remove(0);
                }
                let raw = serde_json::to_string(&backups)
                    .map_err(|e| VigilError::Internal(format!("serialize backups: {}", e)))?;
                store.set(keys::CONFIG_BACKUPS, &raw).await?;
                config.write().unwrap().reset_timings();
                Ok(())
            }
        });

        let vault = self.vault.clone();
        let clear_credential = recovery_step(move || {
            let vault = vault.clone();
            async move { vault.clear().await }
        });

        let guard = self.guard.clone();
        let monitor = self.monitor.clone();
        let reset_components = recovery_step(move || {
            let guard = guard.clone();
            let monitor = monitor.clone();
            async move {
                guard.reset();
                monitor.reset();
                Ok(())
            }
        });

        let store = self.store.clone();
        let clear_persisted = recovery_step(move || {
            let store = store.clone();
            async move {
                for key in [
                    keys::SESSION_RECORD,
                    keys::CREDENTIAL_CIPHERTEXT,
                    keys::CREDENTIAL_META,
                    keys::CSRF_TOKEN,
                    keys::FINGERPRINT,
                    keys::CONFIG_BACKUPS,
                ] {
                    store.remove(key).await?;
                }
                Ok(())
            }
        });

        let log = self.log.clone();
        let reset_ui = recovery_step(move || {
            let log = log.clone();
            async move {
                log.flush();
                Ok(())
            }
        });

        RecoveryHooks {
            clear_session,
            clear_caches,
            reset_circuit,
            clear_log_state,
            reset_config,
            clear_credential,
            reset_components,
            clear_persisted,
            reset_ui,
        }
    }

    /// Run the background watchdog until [`Console::shutdown`] is called.
    ///
    /// Each tick rechecks the environment fingerprint and, when a session
    /// is active, gives the vault a chance to revalidate the credential.
    /// The vault's own refresh interval decides whether a remote call
    /// actually happens.
    pub async fn watchdog(&self) {
        let period = Duration::from_millis(self.monitor.recheck_interval_ms().max(1_000));
        info!(period_ms = period.as_millis() as u64, "watchdog started");

        let mut rx = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.watchdog_sweep().await;
                }
                _ = rx.changed() => {
                    if *rx.borrow() {
                        info!("watchdog stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One watchdog iteration. Public for integration testing.
    pub async fn watchdog_sweep(&self) {
        match self.check_fingerprint().await {
            Ok(status) if !status.ok => {
                warn!("fingerprint recheck flagged the environment");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "fingerprint recheck skipped"),
        }

        if let Ok(session_id) = self.guard.current_session_id().await {
            match self.vault.refresh_validation(&session_id).await {
                Ok(RefreshOutcome::Refreshed) => debug!("credential revalidated"),
                Ok(_) => {}
                Err(e) => {
                    self.diagnostics.record(&e, "watchdog-refresh");
                    warn!(error = %e, "credential revalidation failed");
                }
            }
        }

        // Error-rate escalation: past the critical rate the sweep runs
        // soft recovery itself instead of waiting for an operator.
        let snapshot = self.health().await;
        if snapshot.error_rate_per_min > ERROR_RATE_CRITICAL_PER_MIN {
            warn!(
                rate_per_min = snapshot.error_rate_per_min,
                "error rate critical, running soft recovery"
            );
            let report = self.recover(RecoveryMode::Soft).await;
            if !report.fully_succeeded() {
                warn!("soft recovery finished with failed steps");
            }
        }
    }

    /// Signal the watchdog to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
