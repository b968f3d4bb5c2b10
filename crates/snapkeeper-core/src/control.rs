use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, info};

/// Manually settable event that blocks workers at safe points while paused.
/// Initially open. Workers call `wait_if_paused` at every iteration boundary;
/// the call returns immediately when the gate is open.
#[derive(Debug)]
pub struct PauseGate {
    paused: Mutex<bool>,
    cond: Condvar,
}

impl PauseGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            paused: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub fn pause(&self) {
        let mut paused = self.paused.lock().unwrap();
        if !*paused {
            *paused = true;
            info!("Pipeline paused");
        }
    }

    pub fn resume(&self) {
        let mut paused = self.paused.lock().unwrap();
        if *paused {
            *paused = false;
            info!("Pipeline resumed");
        }
        self.cond.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap()
    }

    /// Block the calling worker until the gate is open.
    pub fn wait_if_paused(&self) {
        let mut paused = self.paused.lock().unwrap();
        while *paused {
            paused = self.cond.wait(paused).unwrap();
        }
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self {
            paused: Mutex::new(false),
            cond: Condvar::new(),
        }
    }
}

/// One-way cooperative cancellation trigger observed by every worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Reset for a fresh run. Only the orchestrator calls this, between
    /// stages, never while workers are live.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }

    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Host-supplied capability that prevents the system from sleeping while
/// work is outstanding. The default implementation does nothing; the counter
/// in `SleepInhibitor` still functions on such platforms.
pub trait SleepInhibit: Send + Sync {
    fn begin(&self);
    fn end(&self);
}

pub struct NoopSleepInhibit;

impl SleepInhibit for NoopSleepInhibit {
    fn begin(&self) {}
    fn end(&self) {}
}

/// Reference-counted guard around the platform call. The platform is asked
/// to stay awake while at least one stage lease is held.
pub struct SleepInhibitor {
    inner: Box<dyn SleepInhibit>,
    count: AtomicUsize,
}

impl SleepInhibitor {
    pub fn new(inner: Box<dyn SleepInhibit>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            count: AtomicUsize::new(0),
        })
    }

    pub fn noop() -> Arc<Self> {
        Self::new(Box::new(NoopSleepInhibit))
    }

    /// Acquire a lease keyed by stage name. Dropping the lease releases it.
    pub fn lease(self: &Arc<Self>, stage: &str) -> SleepLease {
        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            self.inner.begin();
        }
        debug!("Sleep-inhibit lease acquired for {}", stage);
        SleepLease {
            inhibitor: Arc::clone(self),
            stage: stage.to_string(),
        }
    }

    pub fn active_leases(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn release(&self, stage: &str) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.end();
        }
        debug!("Sleep-inhibit lease released for {}", stage);
    }
}

pub struct SleepLease {
    inhibitor: Arc<SleepInhibitor>,
    stage: String,
}

impl Drop for SleepLease {
    fn drop(&mut self) {
        self.inhibitor.release(&self.stage);
    }
}
