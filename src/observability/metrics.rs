//! Thread-safe metrics collection
//!
//! Atomic counters for the hot path (frames, connects) and a mutex-protected
//! map for per-handler statistics. A serializable snapshot is logged at
//! shutdown.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Per-handler-kind counters
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct HandlerStats {
    pub invocations: u64,
    pub failures: u64,
    pub total_time_ms: u64,
}

pub struct MetricsCollector {
    frames_received: AtomicU64,
    frames_unmatched: AtomicU64,
    handler_successes: AtomicU64,
    handler_failures: AtomicU64,

    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    receive_failures: AtomicU64,
    registry_reloads: AtomicU64,

    handler_stats: Mutex<HashMap<String, HandlerStats>>,
    loop_state: Mutex<String>,
    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_unmatched: AtomicU64::new(0),
            handler_successes: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            receive_failures: AtomicU64::new(0),
            registry_reloads: AtomicU64::new(0),
            handler_stats: Mutex::new(HashMap::new()),
            loop_state: Mutex::new("no_session".to_string()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_unmatched(&self) {
        self.frames_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_completed(&self, kind: &str, success: bool, duration: Duration) {
        if success {
            self.handler_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut stats) = self.handler_stats.lock() {
            let entry = stats.entry(kind.to_string()).or_default();
            entry.invocations += 1;
            if !success {
                entry.failures += 1;
            }
            entry.total_time_ms += duration.as_millis() as u64;
        }
    }

    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn receive_failed(&self) {
        self.receive_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn registry_reloaded(&self) {
        self.registry_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_loop_state(&self, state: &str) {
        if let Ok(mut current) = self.loop_state.lock() {
            *current = state.to_string();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            loop_state: self
                .loop_state
                .lock()
                .map(|s| s.clone())
                .unwrap_or_else(|_| "unknown".to_string()),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_unmatched: self.frames_unmatched.load(Ordering::Relaxed),
            handler_successes: self.handler_successes.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            registry_reloads: self.registry_reloads.load(Ordering::Relaxed),
            handlers: self
                .handler_stats
                .lock()
                .map(|stats| stats.clone())
                .unwrap_or_default(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub loop_state: String,
    pub frames_received: u64,
    pub frames_unmatched: u64,
    pub handler_successes: u64,
    pub handler_failures: u64,
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub receive_failures: u64,
    pub registry_reloads: u64,
    pub handlers: HashMap<String, HandlerStats>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
