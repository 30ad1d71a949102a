//! Jobs file watcher: reload the scheduler when another process edits the file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use tracing::{info, warn};

use crate::manager::SchedulerManager;

const DEBOUNCE: Duration = Duration::from_secs(1);
/// How often the watcher thread checks for a stop request.
const STOP_POLL: Duration = Duration::from_millis(200);

/// Handle to a running watcher. Stops when dropped.
pub struct JobsFileWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl JobsFileWatcher {
    /// Watch the manager's jobs file. Must be called inside a tokio runtime.
    pub fn start(manager: &Arc<SchedulerManager>) -> Option<Self> {
        let jobs_file = manager.jobs_file().to_path_buf();
        let watch_dir = match jobs_file.parent() {
            Some(dir) if dir.as_os_str().is_empty() => PathBuf::from("."),
            Some(dir) => dir.to_path_buf(),
            None => return None,
        };
        if let Err(e) = std::fs::create_dir_all(&watch_dir) {
            warn!("Cannot create {} for watching: {e}", watch_dir.display());
            return None;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let weak = Arc::downgrade(manager);
        let handle = tokio::task::spawn_blocking(move || {
            run_watcher(watch_dir, jobs_file, weak, flag);
        });
        Some(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop watching and wait for the watcher thread to exit.
    pub async fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for JobsFileWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn run_watcher(
    watch_dir: PathBuf,
    jobs_file: PathBuf,
    manager: Weak<SchedulerManager>,
    stop: Arc<AtomicBool>,
) {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = match new_debouncer(DEBOUNCE, tx) {
        Ok(d) => d,
        Err(e) => {
            warn!("Failed to create jobs file watcher: {e}");
            return;
        }
    };

    if let Err(e) = debouncer
        .watcher()
        .watch(&watch_dir, notify::RecursiveMode::NonRecursive)
    {
        warn!("Failed to watch {}: {e}", watch_dir.display());
        return;
    }

    info!("👀 Watching {} for job changes", jobs_file.display());

    while !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(STOP_POLL) {
            Ok(Ok(events)) => {
                if !touches_jobs_file(&events, &jobs_file) {
                    continue;
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                info!("Jobs file changed, reloading...");
                let report = manager.reload();
                if report.failed > 0 {
                    warn!("{} job(s) could not be scheduled", report.failed);
                }
            }
            Ok(Err(e)) => warn!("Jobs file watcher error: {e:?}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("Jobs file watcher stopped");
}

/// True if any debounced event refers to the jobs file itself.
fn touches_jobs_file(events: &[DebouncedEvent], jobs_file: &Path) -> bool {
    let Some(name) = jobs_file.file_name() else {
        return false;
    };
    events.iter().any(|event| {
        event.kind == DebouncedEventKind::Any && event.path.file_name() == Some(name)
    })
}
