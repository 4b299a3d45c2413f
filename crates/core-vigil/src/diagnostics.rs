//! Diagnostics center: error tracking, health snapshots, tiered
//! recovery.
//!
//! Every component reports faults here; the center keeps the most
//! recent 100 in a bounded ring, computes a point-in-time health
//! snapshot on demand, and executes one of three increasingly
//! destructive recovery procedures. Recovery steps are isolated: a
//! failing step is caught, logged and reported, and the remaining steps
//! still run. The error ring is always cleared when recovery completes,
//! regardless of partial step failures.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::error::{ErrorCategory, VigilError};

/// Maximum retained error events.
pub const ERROR_RING_CAPACITY: usize = 100;

/// Trailing window for the error-rate computation.
const ERROR_RATE_WINDOW_MS: u64 = 5 * 60 * 1_000;

/// Errors per minute beyond which overall health is forced critical.
pub const ERROR_RATE_CRITICAL_PER_MIN: f64 = 5.0;

/// One recorded fault occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: u64,
    pub timestamp_ms: u64,
    pub category: ErrorCategory,
    pub message: String,
    pub context: String,
}

/// Status one dependency reports into a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Warning,
    Error,
}

/// Combined system status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OverallStatus::Healthy => "healthy",
            OverallStatus::Warning => "warning",
            OverallStatus::Degraded => "degraded",
            OverallStatus::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// One dependency's contribution to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
}

impl ComponentHealth {
    pub fn new(name: &str, status: ComponentStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
        }
    }
}

/// Point-in-time system status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp_ms: u64,
    pub overall: OverallStatus,
    pub components: Vec<ComponentHealth>,
    /// Errors per minute over the trailing 5-minute window
    pub error_rate_per_min: f64,
}

/// Recovery tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    Soft,
    Medium,
    Hard,
}

impl FromStr for RecoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "soft" => Ok(RecoveryMode::Soft),
            "medium" => Ok(RecoveryMode::Medium),
            "hard" => Ok(RecoveryMode::Hard),
            other => Err(format!("unknown recovery mode: {other}")),
        }
    }
}

/// Outcome of one recovery step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub ok: bool,
    pub detail: Option<String>,
}

/// Outcome of a recovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub mode: RecoveryMode,
    pub steps: Vec<StepResult>,
    /// Hard recovery asks the embedding UI to perform a full reload
    pub reload_required: bool,
    pub completed_at_ms: u64,
}

impl RecoveryReport {
    /// True when every executed step succeeded.
    pub fn fully_succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.ok)
    }
}

/// One idempotent recovery callback.
pub type RecoveryStep =
    Box<dyn Fn() -> BoxFuture<'static, Result<(), VigilError>> + Send + Sync>;

fn noop_step() -> RecoveryStep {
    Box::new(|| Box::pin(async { Ok(()) }))
}

/// Wrap an async closure as a [`RecoveryStep`].
pub fn recovery_step<F, Fut>(f: F) -> RecoveryStep
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), VigilError>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Callbacks into the peer components, supplied by the wiring layer.
///
/// Every hook must be idempotent; recovery may run repeatedly.
pub struct RecoveryHooks {
    /// Soft: remove session records
    pub clear_session: RecoveryStep,
    /// Soft: drop validation caches
    pub clear_caches: RecoveryStep,
    /// Soft: reset the session guard circuit state
    pub reset_circuit: RecoveryStep,
    /// Soft: drop transient log suppression state
    pub clear_log_state: RecoveryStep,
    /// Medium: restore configuration defaults
    pub reset_config: RecoveryStep,
    /// Medium: clear the credential vault
    pub clear_credential: RecoveryStep,
    /// Medium: reset component instances to their initial state
    pub reset_components: RecoveryStep,
    /// Hard: remove all persisted state
    pub clear_persisted: RecoveryStep,
    /// Hard: reset UI-visible state
    pub reset_ui: RecoveryStep,
}

impl RecoveryHooks {
    /// Hooks that do nothing. Wiring replaces the ones it implements.
    pub fn noop() -> Self {
        Self {
            clear_session: noop_step(),
            clear_caches: noop_step(),
            reset_circuit: noop_step(),
            clear_log_state: noop_step(),
            reset_config: noop_step(),
            clear_credential: noop_step(),
            reset_components: noop_step(),
            clear_persisted: noop_step(),
            reset_ui: noop_step(),
        }
    }
}

impl std::fmt::Debug for RecoveryHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecoveryHooks { .. }")
    }
}

/// Error aggregator and recovery executor.
pub struct DiagnosticsCenter {
    clock: Arc<dyn Clock>,
    ring: Mutex<VecDeque<ErrorEvent>>,
    next_id: AtomicU64,
}

impl DiagnosticsCenter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ring: Mutex::new(VecDeque::with_capacity(ERROR_RING_CAPACITY)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record one fault occurrence. O(1) amortized; the oldest entry is
    /// evicted once the ring holds 100.
    pub fn record_error(&self, category: ErrorCategory, message: &str, context: &str) {
        let event = ErrorEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp_ms: self.clock.now_ms(),
            category,
            message: message.to_string(),
            context: context.to_string(),
        };
        let mut ring = self.ring.lock().unwrap();
        if ring.len() >= ERROR_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    /// Record a typed error with its natural category.
    pub fn record(&self, error: &VigilError, context: &str) {
        self.record_error(error.category(), &error.to_string(), context);
    }

    /// The most recent `n` events, newest last.
    pub fn recent_errors(&self, n: usize) -> Vec<ErrorEvent> {
        let ring = self.ring.lock().unwrap();
        ring.iter().rev().take(n).rev().cloned().collect()
    }

    /// Number of retained events.
    pub fn error_count(&self) -> usize {
        self.ring.lock().unwrap().len()
    }

    /// Drop all retained events.
    pub fn clear_errors(&self) {
        self.ring.lock().unwrap().clear();
    }

    /// Errors per minute over the trailing 5-minute window.
    pub fn error_rate_per_min(&self) -> f64 {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(ERROR_RATE_WINDOW_MS);
        let recent = self
            .ring
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.timestamp_ms >= cutoff)
            .count();
        recent as f64 / (ERROR_RATE_WINDOW_MS as f64 / 60_000.0)
    }

    /// Combine dependency reports and the error rate into a snapshot.
    ///
    /// Any `error` forces `critical`; two or more `warning`s are
    /// `degraded`; exactly one is `warning`; a trailing error rate
    /// above 5/min escalates to `critical` regardless of components.
    pub fn snapshot_with(&self, components: Vec<ComponentHealth>) -> HealthSnapshot {
        let errors = components
            .iter()
            .filter(|c| c.status == ComponentStatus::Error)
            .count();
        let warnings = components
            .iter()
            .filter(|c| c.status == ComponentStatus::Warning)
            .count();

        let mut overall = if errors > 0 {
            OverallStatus::Critical
        } else if warnings >= 2 {
            OverallStatus::Degraded
        } else if warnings == 1 {
            OverallStatus::Warning
        } else {
            OverallStatus::Healthy
        };

        let error_rate_per_min = self.error_rate_per_min();
        if error_rate_per_min > ERROR_RATE_CRITICAL_PER_MIN {
            overall = OverallStatus::Critical;
        }

        HealthSnapshot {
            timestamp_ms: self.clock.now_ms(),
            overall,
            components,
            error_rate_per_min,
        }
    }

    /// Execute one recovery tier.
    ///
    /// Steps run in order; a failing step is caught and reported but
    /// never aborts the remaining steps. The error ring is cleared at
    /// the end no matter what.
    pub async fn recover(&self, mode: RecoveryMode, hooks: &RecoveryHooks) -> RecoveryReport {
        tracing::info!(?mode, "running recovery");

        let mut plan: Vec<(&str, &RecoveryStep)> = vec![
            ("clear-session", &hooks.clear_session),
            ("clear-caches", &hooks.clear_caches),
            ("reset-circuit", &hooks.reset_circuit),
            ("clear-log-state", &hooks.clear_log_state),
        ];
        if matches!(mode, RecoveryMode::Medium | RecoveryMode::Hard) {
            plan.push(("reset-config", &hooks.reset_config));
            plan.push(("clear-credential", &hooks.clear_credential));
            plan.push(("reset-components", &hooks.reset_components));
        }
        if mode == RecoveryMode::Hard {
            plan.push(("clear-persisted", &hooks.clear_persisted));
            plan.push(("reset-ui", &hooks.reset_ui));
        }

        let mut steps = Vec::with_capacity(plan.len() + 1);
        for (name, step) in plan {
            match step().await {
                Ok(()) => {
                    steps.push(StepResult {
                        name: name.to_string(),
                        ok: true,
                        detail: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(step = name, error = %e, "recovery step failed, continuing");
                    self.record_error(
                        ErrorCategory::Recovery,
                        &format!("step {name} failed: {e}"),
                        "recover",
                    );
                    steps.push(StepResult {
                        name: name.to_string(),
                        ok: false,
                        detail: Some(e.to_string()),
                    });
                }
            }
        }

        let reload_required = mode == RecoveryMode::Hard;
        if reload_required {
            steps.push(StepResult {
                name: "schedule-reload".to_string(),
                ok: true,
                detail: None,
            });
        }

        // The ring always clears, even after partial failure.
        self.clear_errors();

        let report = RecoveryReport {
            mode,
            steps,
            reload_required,
            completed_at_ms: self.clock.now_ms(),
        };
        tracing::info!(
            ?mode,
            ok = report.fully_succeeded(),
            "recovery completed"
        );
        report
    }
}

impl std::fmt::Debug for DiagnosticsCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsCenter")
            .field("errors", &self.error_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicBool;

    fn center() -> (Arc<ManualClock>, DiagnosticsCenter) {
        let clock = Arc::new(ManualClock::default());
        let center = DiagnosticsCenter::new(clock.clone() as Arc<dyn Clock>);
        (clock, center)
    }

    #[test]
    fn test_ring_capped_at_100() {
        let (_clock, c) = center();
        for i in 0..150 {
            c.record_error(ErrorCategory::Other, &format!("e{i}"), "test");
        }
        assert_eq!(c.error_count(), 100);
        // Oldest evicted first: the earliest retained message is e50
        let oldest = c.recent_errors(100).first().cloned().unwrap();
        assert_eq!(oldest.message, "e50");
    }

    #[test]
    fn test_health_rules() {
        let (_clock, c) = center();
        use ComponentStatus::*;

        let cases: Vec<(Vec<ComponentStatus>, OverallStatus)> = vec![
            (vec![Healthy, Healthy, Error], OverallStatus::Critical),
            (vec![Healthy, Warning], OverallStatus::Warning),
            (vec![Warning, Warning], OverallStatus::Degraded),
            (vec![Healthy, Healthy], OverallStatus::Healthy),
            (vec![Warning, Warning, Error], OverallStatus::Critical),
        ];
        for (statuses, expected) in cases {
            let components = statuses
                .iter()
                .enumerate()
                .map(|(i, s)| ComponentHealth::new(&format!("c{i}"), *s))
                .collect();
            let snapshot = c.snapshot_with(components);
            assert_eq!(snapshot.overall, expected, "statuses: {statuses:?}");
        }
    }

    #[test]
    fn test_error_rate_escalates_to_critical() {
        let (clock, c) = center();

        // 30 errors in the last 5 minutes = 6/min
        for _ in 0..30 {
            c.record_error(ErrorCategory::Storage, "boom", "test");
            clock.advance_ms(1_000);
        }

        let snapshot = c.snapshot_with(vec![ComponentHealth::new("store", ComponentStatus::Healthy)]);
        assert!(snapshot.error_rate_per_min > 5.0);
        assert_eq!(snapshot.overall, OverallStatus::Critical);
    }

    #[test]
    fn test_old_errors_age_out_of_rate() {
        let (clock, c) = center();
        for _ in 0..30 {
            c.record_error(ErrorCategory::Storage, "boom", "test");
        }
        clock.advance_ms(6 * 60 * 1_000); // all outside the window

        assert_eq!(c.error_rate_per_min(), 0.0);
        let snapshot = c.snapshot_with(vec![]);
        assert_eq!(snapshot.overall, OverallStatus::Healthy);
    }

    #[tokio::test]
    async fn test_soft_recovery_runs_four_steps() {
        let (_clock, c) = center();
        let report = c.recover(RecoveryMode::Soft, &RecoveryHooks::noop()).await;

        assert_eq!(report.steps.len(), 4);
        assert!(report.fully_succeeded());
        assert!(!report.reload_required);
    }

    #[tokio::test]
    async fn test_medium_recovery_isolates_failing_step() {
        let (_clock, c) = center();
        c.record_error(ErrorCategory::Storage, "pre-existing", "test");

        let mut hooks = RecoveryHooks::noop();
        hooks.clear_credential = Box::new(|| {
            Box::pin(async { Err(VigilError::Storage("backend threw".to_string())) })
        });
        let ran_after = Arc::new(AtomicBool::new(false));
        let flag = ran_after.clone();
        hooks.reset_components = Box::new(move || {
            let flag = flag.clone();
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        });

        let report = c.recover(RecoveryMode::Medium, &hooks).await;

        assert_eq!(report.steps.len(), 7);
        let failed: Vec<_> = report.steps.iter().filter(|s| !s.ok).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "clear-credential");
        // Later steps still executed
        assert!(ran_after.load(Ordering::SeqCst));
        // Ring cleared despite the partial failure
        assert_eq!(c.error_count(), 0);
    }

    #[tokio::test]
    async fn test_hard_recovery_schedules_reload() {
        let (_clock, c) = center();
        let report = c.recover(RecoveryMode::Hard, &RecoveryHooks::noop()).await;

        assert_eq!(report.steps.len(), 10);
        assert!(report.reload_required);
        assert_eq!(report.steps.last().unwrap().name, "schedule-reload");
    }

    #[test]
    fn test_recovery_mode_from_str() {
        assert_eq!("soft".parse::<RecoveryMode>().unwrap(), RecoveryMode::Soft);
        assert_eq!(
            "MEDIUM".parse::<RecoveryMode>().unwrap(),
            RecoveryMode::Medium
        );
        assert_eq!("hard".parse::<RecoveryMode>().unwrap(), RecoveryMode::Hard);
        assert!("full".parse::<RecoveryMode>().is_err());
    }
}
