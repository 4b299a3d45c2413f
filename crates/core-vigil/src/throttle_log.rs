//! Rate-limited diagnostic log.
//!
//! A persistent fault polled every few hundred milliseconds must produce
//! one log entry, not a flood. The first emission for a key passes
//! through immediately; repeats within the suppression window are
//! counted, and a single summary line is delivered once the window
//! closes. Summaries are flushed opportunistically: every `emit` sweeps
//! all expired windows, so a new key arriving also flushes elapsed ones.
//!
//! Delivery goes through the [`LogSink`] seam: [`TracingSink`] in
//! production, [`VecSink`] in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::Clock;

/// Severity of a throttled log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Destination for delivered (non-suppressed) log entries.
pub trait LogSink: Send + Sync + std::fmt::Debug {
    /// Deliver one entry. `suppressed` is zero for a pass-through
    /// emission and the repeat count for a window summary.
    fn deliver(&self, level: LogLevel, key: &str, message: &str, suppressed: u64);
}

/// Production sink: forwards to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn deliver(&self, level: LogLevel, key: &str, message: &str, suppressed: u64) {
        match (level, suppressed) {
            (LogLevel::Debug, 0) => tracing::debug!(key, "{message}"),
            (LogLevel::Debug, n) => tracing::debug!(key, "{message} ({n} repeats suppressed)"),
            (LogLevel::Info, 0) => tracing::info!(key, "{message}"),
            (LogLevel::Info, n) => tracing::info!(key, "{message} ({n} repeats suppressed)"),
            (LogLevel::Warn, 0) => tracing::warn!(key, "{message}"),
            (LogLevel::Warn, n) => tracing::warn!(key, "{message} ({n} repeats suppressed)"),
            (LogLevel::Error, 0) => tracing::error!(key, "{message}"),
            (LogLevel::Error, n) => tracing::error!(key, "{message} ({n} repeats suppressed)"),
        }
    }
}

/// A single delivered entry, as captured by [`VecSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredEntry {
    pub level: LogLevel,
    pub key: String,
    pub message: String,
    pub suppressed: u64,
}

/// Test sink that records every delivery.
#[derive(Debug, Default)]
pub struct VecSink {
    entries: Mutex<Vec<DeliveredEntry>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    pub fn entries(&self) -> Vec<DeliveredEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of deliveries for a given key.
    pub fn count_for(&self, key: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.key == key)
            .count()
    }
}

impl LogSink for VecSink {
    fn deliver(&self, level: LogLevel, key: &str, message: &str, suppressed: u64) {
        self.entries.lock().unwrap().push(DeliveredEntry {
            level,
            key: key.to_string(),
            message: message.to_string(),
            suppressed,
        });
    }
}

/// Suppression window configuration.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Suppression window after the first emission for a key
    pub window_ms: u64,
    /// Entries with no activity for this long are evicted outright
    pub idle_eviction_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            idle_eviction_ms: 3_600_000, // 1 hour
        }
    }
}

#[derive(Debug)]
struct SuppressionEntry {
    level: LogLevel,
    message: String,
    window_started_ms: u64,
    last_seen_ms: u64,
    suppressed: u64,
}

/// Deduplicating, window-based log throttle.
#[derive(Debug)]
pub struct RateLimitedLog {
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn LogSink>,
    entries: Mutex<HashMap<String, SuppressionEntry>>,
}

impl RateLimitedLog {
    pub fn new(config: ThrottleConfig, clock: Arc<dyn Clock>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            config,
            clock,
            sink,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Emit a message under a deduplication key.
    ///
    /// The first emission within a fresh window is delivered
    /// immediately; repeats are suppressed and counted until the window
    /// closes, at which point one summary is delivered and the window
    /// resets.
    pub fn emit(&self, key: &str, message: &str, level: LogLevel) {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().unwrap();
        Self::sweep(&mut entries, &*self.sink, &self.config, now);

        match entries.get_mut(key) {
            Some(entry) => {
                // Window still open for this key: suppress and count.
                entry.suppressed += 1;
                entry.last_seen_ms = now;
            }
            None => {
                self.sink.deliver(level, key, message, 0);
                entries.insert(
                    key.to_string(),
                    SuppressionEntry {
                        level,
                        message: message.to_string(),
                        window_started_ms: now,
                        last_seen_ms: now,
                        suppressed: 0,
                    },
                );
            }
        }
    }

    /// Deliver summaries for all pending suppressed entries and drop
    /// every window, regardless of expiry.
    pub fn flush(&self) {
        let mut entries = self.entries.lock().unwrap();
        for (key, entry) in entries.drain() {
            if entry.suppressed > 0 {
                self.sink
                    .deliver(entry.level, &key, &entry.message, entry.suppressed);
            }
        }
    }

    /// Drop all suppression state without emitting summaries.
    ///
    /// Used by recovery: pending counts are part of the degraded state
    /// being discarded.
    pub fn reset(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of keys currently tracked (for tests and diagnostics).
    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn sweep(
        entries: &mut HashMap<String, SuppressionEntry>,
        sink: &dyn LogSink,
        config: &ThrottleConfig,
        now: u64,
    ) {
        entries.retain(|key, entry| {
            let idle = now.saturating_sub(entry.last_seen_ms) >= config.idle_eviction_ms;
            let expired = now.saturating_sub(entry.window_started_ms) >= config.window_ms;
            if idle {
                // Stale bookkeeping; summary (if any) was owed at window
                // close but nobody emitted since, so report it now.
                if entry.suppressed > 0 {
                    sink.deliver(entry.level, key, &entry.message, entry.suppressed);
                }
                return false;
            }
            if expired {
                if entry.suppressed > 0 {
                    sink.deliver(entry.level, key, &entry.message, entry.suppressed);
                }
                return false;
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn setup() -> (Arc<ManualClock>, Arc<VecSink>, RateLimitedLog) {
        let clock = Arc::new(ManualClock::default());
        let sink = Arc::new(VecSink::new());
        let log = RateLimitedLog::new(
            ThrottleConfig::default(),
            clock.clone() as Arc<dyn Clock>,
            sink.clone() as Arc<dyn LogSink>,
        );
        (clock, sink, log)
    }

    #[test]
    fn test_first_emission_passes_through() {
        let (_clock, sink, log) = setup();
        log.emit("k", "disk on fire", LogLevel::Warn);

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "k");
        assert_eq!(entries[0].suppressed, 0);
    }

    #[test]
    fn test_n_repeats_yield_one_message_and_one_summary() {
        let (clock, sink, log) = setup();

        // N = 10 emissions inside the window
        for _ in 0..10 {
            log.emit("k", "msg", LogLevel::Warn);
            clock.advance_ms(100);
        }
        assert_eq!(sink.count_for("k"), 1);

        // Window closes; the next emit (any key) flushes the summary
        clock.advance_ms(5_000);
        log.emit("other", "something else", LogLevel::Info);

        let entries = sink.entries();
        assert_eq!(sink.count_for("k"), 2);
        let summary = entries.iter().rfind(|e| e.key == "k").unwrap();
        assert_eq!(summary.suppressed, 9); // N - 1
        assert_eq!(summary.message, "msg");
    }

    #[test]
    fn test_window_resets_after_summary() {
        let (clock, sink, log) = setup();

        log.emit("k", "msg", LogLevel::Info);
        log.emit("k", "msg", LogLevel::Info);
        clock.advance_ms(6_000);

        // Fresh window: this emission passes through again
        log.emit("k", "msg", LogLevel::Info);
        // summary for old window + new pass-through
        assert_eq!(sink.count_for("k"), 3);
    }

    #[test]
    fn test_sole_emission_produces_no_summary() {
        let (clock, sink, log) = setup();

        log.emit("k", "once", LogLevel::Info);
        clock.advance_ms(10_000);
        log.emit("other", "trigger sweep", LogLevel::Info);

        // Only the original pass-through; nothing was suppressed
        assert_eq!(sink.count_for("k"), 1);
    }

    #[test]
    fn test_flush_emits_pending_summaries() {
        let (_clock, sink, log) = setup();

        for _ in 0..4 {
            log.emit("k", "msg", LogLevel::Error);
        }
        log.flush();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].suppressed, 3);
        assert_eq!(log.tracked_keys(), 0);
    }

    #[test]
    fn test_reset_discards_without_summary() {
        let (_clock, sink, log) = setup();

        for _ in 0..4 {
            log.emit("k", "msg", LogLevel::Error);
        }
        log.reset();

        assert_eq!(sink.entries().len(), 1);
        assert_eq!(log.tracked_keys(), 0);
    }

    #[test]
    fn test_idle_entries_evicted() {
        let (clock, _sink, log) = setup();

        log.emit("k", "msg", LogLevel::Info);
        assert_eq!(log.tracked_keys(), 1);

        clock.advance_ms(3_600_000);
        log.emit("other", "trigger sweep", LogLevel::Info);
        // "k" evicted, "other" freshly tracked
        assert_eq!(log.tracked_keys(), 1);
    }

    #[test]
    fn test_log_is_debug_through_trait_objects() {
        let (_clock, _sink, log) = setup();
        let rendered = format!("{log:?}");
        assert!(rendered.contains("RateLimitedLog"));
    }

    #[test]
    fn test_distinct_keys_tracked_independently() {
        let (_clock, sink, log) = setup();

        log.emit("a", "msg a", LogLevel::Info);
        log.emit("b", "msg b", LogLevel::Info);
        log.emit("a", "msg a", LogLevel::Info);

        assert_eq!(sink.count_for("a"), 1);
        assert_eq!(sink.count_for("b"), 1);
    }
}
