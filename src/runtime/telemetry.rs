use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters describing status-pipeline activity.
#[derive(Default, Debug)]
pub struct Telemetry {
    statuses_forwarded: AtomicU64,
    log_bytes_written: AtomicU64,
    log_write_failures: AtomicU64,
    targets_created: AtomicU64,
    targets_completed: AtomicU64,
}

impl Telemetry {
    pub fn record_status_forwarded(&self) {
        self.statuses_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_bytes(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.log_bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.log_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_target_created(&self) {
        self.targets_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_target_completed(&self) {
        self.targets_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn statuses_forwarded(&self) -> u64 {
        self.statuses_forwarded.load(Ordering::Relaxed)
    }

    pub fn log_bytes_written(&self) -> u64 {
        self.log_bytes_written.load(Ordering::Relaxed)
    }

    pub fn log_write_failures(&self) -> u64 {
        self.log_write_failures.load(Ordering::Relaxed)
    }

    pub fn targets_created(&self) -> u64 {
        self.targets_created.load(Ordering::Relaxed)
    }

    pub fn targets_completed(&self) -> u64 {
        self.targets_completed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            statuses_forwarded: self.statuses_forwarded(),
            log_bytes_written: self.log_bytes_written(),
            log_write_failures: self.log_write_failures(),
            targets_created: self.targets_created(),
            targets_completed: self.targets_completed(),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub statuses_forwarded: u64,
    pub log_bytes_written: u64,
    pub log_write_failures: u64,
    pub targets_created: u64,
    pub targets_completed: u64,
}
