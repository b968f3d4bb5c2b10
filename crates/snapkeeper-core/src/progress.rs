use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Which pipeline stage a progress event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scan,
    Hash,
    Copy,
    Verification,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scan => "Scan",
            Stage::Hash => "Hash",
            Stage::Copy => "Copy",
            Stage::Verification => "Verification",
        }
    }
}

/// Throttled progress envelope handed to the reporter.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub files_done: u64,
    pub files_total: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub current_path: Option<String>,
    pub error_count: u64,
    pub mb_per_sec: f64,
    pub eta: Option<Duration>,
    pub paused: bool,
}

/// Trait for surfacing pipeline progress.
///
/// The CLI implements this with indicatif bars; a GUI layer would forward to
/// its dispatcher. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_stage_start(&self, _stage: Stage) {}
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_stage_complete(&self, _stage: Stage, _files: u64, _duration_secs: f64) {}
    fn on_job_failed(&self, _job_id: i64, _destination: &str, _error: &str) {}
}

/// No-op reporter for silent operation and tests.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Shared counters workers bump freely; a single dispatcher coalesces them
/// into at most `cadence_hz` events per second.
pub struct ProgressTracker {
    files_done: AtomicU64,
    files_total: AtomicU64,
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    errors: AtomicU64,
    current_path: Mutex<Option<String>>,
    epoch: AtomicUsize,
}

impl ProgressTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            files_done: AtomicU64::new(0),
            files_total: AtomicU64::new(0),
            bytes_done: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            current_path: Mutex::new(None),
            epoch: AtomicUsize::new(0),
        })
    }

    /// Zero everything for a new stage.
    pub fn reset(&self, files_total: u64, bytes_total: u64) {
        self.files_done.store(0, Ordering::Relaxed);
        self.files_total.store(files_total, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
        self.bytes_total.store(bytes_total, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        *self.current_path.lock().unwrap() = None;
        self.epoch.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_file(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_total_files(&self, n: u64) {
        self.files_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn files_done(&self) -> u64 {
        self.files_done.load(Ordering::Relaxed)
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    pub fn set_current_path(&self, path: &str) {
        *self.current_path.lock().unwrap() = Some(path.to_string());
    }

    pub fn snapshot(&self, stage: Stage, paused: bool, started: Instant) -> ProgressEvent {
        let bytes_done = self.bytes_done.load(Ordering::Relaxed);
        let bytes_total = self.bytes_total.load(Ordering::Relaxed);
        let elapsed = started.elapsed().as_secs_f64();
        let mb_per_sec = if elapsed > 0.0 {
            bytes_done as f64 / (1024.0 * 1024.0) / elapsed
        } else {
            0.0
        };
        let eta = if bytes_done > 0 && bytes_total > bytes_done {
            let remaining = (bytes_total - bytes_done) as f64;
            let rate = bytes_done as f64 / elapsed;
            Some(Duration::from_secs_f64(remaining / rate))
        } else {
            None
        };
        ProgressEvent {
            stage,
            files_done: self.files_done.load(Ordering::Relaxed),
            files_total: self.files_total.load(Ordering::Relaxed),
            bytes_done,
            bytes_total,
            current_path: self.current_path.lock().unwrap().clone(),
            error_count: self.errors.load(Ordering::Relaxed),
            mb_per_sec,
            eta,
            paused,
        }
    }
}

/// Runs alongside a stage and emits throttled events until dropped.
pub struct ProgressDispatcher {
    stop: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ProgressDispatcher {
    pub fn spawn(
        tracker: Arc<ProgressTracker>,
        reporter: Arc<dyn ProgressReporter>,
        pause: Arc<crate::control::PauseGate>,
        stage: Stage,
        cadence_hz: u32,
    ) -> Self {
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        let interval = Duration::from_millis(1000 / cadence_hz.max(1) as u64);
        let started = Instant::now();
        let handle = std::thread::spawn(move || {
            while !stop2.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                let event = tracker.snapshot(stage, pause.is_paused(), started);
                reporter.on_progress(&event);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for ProgressDispatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_snapshot_counts() {
        let tracker = ProgressTracker::new();
        tracker.reset(10, 1000);
        tracker.add_file();
        tracker.add_file();
        tracker.add_bytes(500);
        tracker.add_error();
        tracker.set_current_path("/a/b.jpg");

        let event = tracker.snapshot(Stage::Hash, false, Instant::now());
        assert_eq!(event.files_done, 2);
        assert_eq!(event.files_total, 10);
        assert_eq!(event.bytes_done, 500);
        assert_eq!(event.bytes_total, 1000);
        assert_eq!(event.error_count, 1);
        assert_eq!(event.current_path.as_deref(), Some("/a/b.jpg"));
        assert!(!event.paused);
    }

    #[test]
    fn test_reset_clears_counters() {
        let tracker = ProgressTracker::new();
        tracker.add_file();
        tracker.add_error();
        tracker.reset(0, 0);
        assert_eq!(tracker.files_done(), 0);
        assert_eq!(tracker.error_count(), 0);
    }
}
