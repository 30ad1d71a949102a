//! Wake detection: infer a sleep/resume cycle from a forward wall-clock jump.
//!
//! A dedicated thread samples `SystemTime` every `poll_interval`. When two
//! samples are further apart than `jump_threshold`, the machine was asleep
//! (or the clock was set forward) and the wake callback runs.

use deskpilot_core::WakeConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub struct WakeOptions {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub jump_threshold: Duration,
}

impl Default for WakeOptions {
    fn default() -> Self {
        Self::from(&WakeConfig::default())
    }
}

impl From<&WakeConfig> for WakeOptions {
    fn from(config: &WakeConfig) -> Self {
        Self {
            enabled: config.enabled,
            poll_interval: config.poll_interval(),
            jump_threshold: config.jump_threshold(),
        }
    }
}

/// Jump detection state, separate from the thread so it can be tested.
#[derive(Debug)]
pub struct WakeMonitor {
    last: SystemTime,
    threshold: Duration,
}

impl WakeMonitor {
    pub fn new(start: SystemTime, threshold: Duration) -> Self {
        Self {
            last: start,
            threshold,
        }
    }

    /// Record a sample. Returns the gap if it exceeds the threshold.
    pub fn observe(&mut self, now: SystemTime) -> Option<Duration> {
        let gap = now.duration_since(self.last).ok();
        // A backwards step just resets the baseline.
        self.last = now;
        gap.filter(|g| *g > self.threshold)
    }
}

/// Background wake detector thread.
pub struct WakeDetector {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WakeDetector {
    pub fn spawn<F>(options: &WakeOptions, on_wake: F) -> std::io::Result<Self>
    where
        F: Fn(Duration) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let poll = options.poll_interval;
        let threshold = options.jump_threshold;

        let handle = std::thread::Builder::new()
            .name("deskpilot-wake".into())
            .spawn(move || {
                let mut monitor = WakeMonitor::new(SystemTime::now(), threshold);
                while !flag.load(Ordering::SeqCst) {
                    std::thread::sleep(poll);
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Some(gap) = monitor.observe(SystemTime::now()) {
                        tracing::warn!(
                            "💤 Clock jumped {}s; assuming system wake, reloading jobs",
                            gap.as_secs()
                        );
                        on_wake(gap);
                    }
                }
                tracing::debug!("Wake detector stopped");
            })?;

        tracing::info!(
            "Wake detector started (poll {:?}, threshold {:?})",
            poll,
            threshold
        );
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and join it. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            // The wake callback may end up here (e.g. through shutdown); never self-join.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WakeDetector {
    fn drop(&mut self) {
        self.stop();
    }
}
