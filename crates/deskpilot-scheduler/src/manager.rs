//! Scheduler Manager: the public face of the scheduler.
//!
//! Keeps the engine's armed set and the JSON job store consistent, copies
//! email attachments into owned storage, removes one-time jobs after they
//! run, and reloads from disk after a system wake.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use chrono::{NaiveDateTime, Utc};
use deskpilot_core::{DeskPilotConfig, DeskPilotError, Result, TaskStyle};

use crate::attachments::AttachmentStore;
use crate::engine::{
    Clock, EngineOptions, EngineState, JobEvent, JobRunner, SchedulerEngine, system_clock,
};
use crate::jobs::{JobDefinition, JobMetadata, JobRequest, JobSummary};
use crate::registry::{TaskArgs, TaskRegistry};
use crate::store::JobStore;
use crate::trigger::trigger_for;
use crate::wake::{WakeDetector, WakeOptions};

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub jobs_file: PathBuf,
    pub attachments_dir: PathBuf,
    pub engine: EngineOptions,
    pub wake: WakeOptions,
}

impl ManagerOptions {
    pub fn new(jobs_file: &Path, attachments_dir: &Path) -> Self {
        Self {
            jobs_file: jobs_file.to_path_buf(),
            attachments_dir: attachments_dir.to_path_buf(),
            engine: EngineOptions::default(),
            wake: WakeOptions::default(),
        }
    }

    pub fn from_config(config: &DeskPilotConfig) -> Self {
        Self {
            jobs_file: config.scheduler.jobs_path(),
            attachments_dir: config.scheduler.attachments_path(),
            engine: EngineOptions::from(&config.scheduler),
            wake: WakeOptions::from(&config.wake),
        }
    }
}

/// What a `reload` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Armed jobs no longer on disk.
    pub removed: usize,
    /// Definitions armed (or left armed unchanged).
    pub scheduled: usize,
    /// Definitions that could not be armed.
    pub failed: usize,
    /// The jobs file could not be parsed; the armed set was left alone.
    pub store_unreadable: bool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SchedulerManager {
    engine: SchedulerEngine,
    store: JobStore,
    attachments: AttachmentStore,
    registry: Arc<TaskRegistry>,
    metadata: RwLock<HashMap<String, JobMetadata>>,
    /// Serializes add/remove/reload and event cleanup.
    ops: Mutex<()>,
    wake_options: WakeOptions,
    wake: Mutex<Option<WakeDetector>>,
    shut_down: AtomicBool,
}

impl SchedulerManager {
    /// Create the manager and arm every valid job already on disk.
    pub fn new(options: ManagerOptions, registry: Arc<TaskRegistry>) -> Arc<Self> {
        Self::with_clock(options, registry, system_clock())
    }

    pub fn with_clock(options: ManagerOptions, registry: Arc<TaskRegistry>, clock: Clock) -> Arc<Self> {
        let engine = SchedulerEngine::with_clock(options.engine.clone(), clock);
        let manager = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            engine.add_listener(Arc::new(move |event: &JobEvent| {
                if let Some(manager) = weak.upgrade() {
                    manager.on_job_event(event);
                }
            }));
            Self {
                engine,
                store: JobStore::new(&options.jobs_file),
                attachments: AttachmentStore::new(&options.attachments_dir),
                registry,
                metadata: RwLock::new(HashMap::new()),
                ops: Mutex::new(()),
                wake_options: options.wake.clone(),
                wake: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }
        });
        let report = manager.reload();
        tracing::info!(
            "📅 Scheduler manager ready: {} job(s) from {}",
            report.scheduled,
            manager.store.path().display()
        );
        manager
    }

    pub fn engine(&self) -> &SchedulerEngine {
        &self.engine
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn jobs_file(&self) -> &Path {
        self.store.path()
    }

    /// Start the engine loop and, if enabled, the wake detector.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DeskPilotError::Scheduler("Scheduler has been shut down".into()));
        }
        self.engine.start()?;
        if self.wake_options.enabled {
            let mut slot = lock(&self.wake);
            if slot.is_none() {
                let weak = Arc::downgrade(self);
                let detector = WakeDetector::spawn(&self.wake_options, move |_gap| {
                    if let Some(manager) = weak.upgrade() {
                        manager.handle_wake();
                    }
                })
                .map_err(|e| {
                    DeskPilotError::Scheduler(format!("Failed to start wake detector: {e}"))
                })?;
                *slot = Some(detector);
            }
        }
        Ok(())
    }

    /// Validate, persist and arm a job. Returns its id.
    ///
    /// An existing job with the same id is replaced; attachments it owned that
    /// the new definition no longer references are deleted.
    pub fn add_job(&self, request: JobRequest) -> Result<String> {
        let job = request.into_definition(Utc::now());
        let _ops = lock(&self.ops);
        let previous = self.store.find(&job.job_id);
        let job_id = job.job_id.clone();
        let job = self
            .schedule_job(job, true)
            .inspect_err(|e| tracing::warn!("Rejected job {job_id}: {e}"))?;

        if let Some(previous) = previous {
            let stale: Vec<String> = previous
                .attachments()
                .iter()
                .filter(|p| !job.attachments().contains(*p))
                .cloned()
                .collect();
            self.attachments.cleanup(&stale);
        }
        tracing::info!("📅 Job added: {} ({})", job.job_id, job.task_type);
        Ok(job.job_id)
    }

    /// Arm one definition. With `persist`, attachments are materialized and
    /// the definition written to the store first.
    fn schedule_job(&self, mut job: JobDefinition, persist: bool) -> Result<JobDefinition> {
        let trigger = trigger_for(&job.run_time, &job.recurring_days, self.engine.now())?;
        let entry = self
            .registry
            .resolve(&job.task_type)
            .ok_or_else(|| DeskPilotError::TaskNotFound(job.task_type.clone()))?;

        if persist {
            if entry.style == TaskStyle::Email && !job.email_params.attachments.is_empty() {
                job.email_params.attachments =
                    self.attachments.persist(&job.job_id, &job.email_params.attachments);
            }
            if !self.store.upsert(&job) {
                tracing::warn!("Job {} is scheduled but could not be saved", job.job_id);
            }
        }

        let runner = JobRunner {
            func: entry.func.clone(),
            args: TaskArgs::for_job(&job, entry.style),
            pool: entry.pool,
            definition: Arc::new(job.clone()),
        };
        let next = self.engine.arm(&job.job_id, trigger, runner);
        tracing::debug!("Job {} next run: {next:?}", job.job_id);

        self.metadata_mut().insert(
            job.job_id.clone(),
            JobMetadata::new(&job, entry.style == TaskStyle::Email),
        );
        Ok(job)
    }

    /// Delete a job from disk and the engine and remove its attachments.
    ///
    /// Absent jobs are fine. An invocation already running is not interrupted.
    /// Returns `false` only if the store could not be rewritten.
    pub fn remove_job(&self, job_id: &str) -> bool {
        let _ops = lock(&self.ops);
        let stored = self.store.find(job_id);
        let saved = self.store.delete(job_id);
        let disarmed = self.engine.disarm(job_id);
        let known = self.metadata_mut().remove(job_id);

        let mut owned: Vec<String> = Vec::new();
        if let Some(job) = &stored {
            owned.extend(job.attachments().iter().cloned());
        }
        if let Some(meta) = &known {
            owned.extend(meta.definition.attachments().iter().cloned());
        }
        owned.sort();
        owned.dedup();
        self.attachments.cleanup(&owned);

        if stored.is_some() || disarmed {
            tracing::info!("🗑️ Job removed: {job_id}");
        }
        saved
    }

    /// Armed jobs, sorted by next run time (none last) then id.
    ///
    /// One-time jobs that are no longer in the store are left out.
    pub fn list_jobs(&self) -> Vec<JobSummary> {
        let stored: HashSet<String> = self
            .store
            .read_all()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        let metadata = self.metadata_ref();

        let mut rows: Vec<JobSummary> = self
            .engine
            .jobs()
            .into_iter()
            .filter(|armed| armed.trigger.is_recurring() || stored.contains(&armed.job_id))
            .map(|armed| {
                let meta = metadata.get(&armed.job_id);
                let task_type = meta.map(|m| m.task_type.clone()).unwrap_or_default();
                JobSummary {
                    label: self.registry.label(&task_type),
                    target: meta.map(|m| m.target()).unwrap_or_else(|| "-".into()),
                    trigger: armed.trigger.to_string(),
                    next_run_time: armed.next_run_time,
                    recurring_days: meta.map(|m| m.recurring_days.clone()).unwrap_or_default(),
                    job_id: armed.job_id,
                    task_type,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.next_run_time.is_none(), a.next_run_time, &a.job_id).cmp(&(
                b.next_run_time.is_none(),
                b.next_run_time,
                &b.job_id,
            ))
        });
        rows
    }

    /// Make the armed set match the store.
    ///
    /// Jobs no longer on disk are disarmed; definitions already armed and
    /// unchanged keep their next fire time. Invalid definitions are logged,
    /// counted and left disarmed. A missing jobs file counts as an empty one.
    pub fn reload(&self) -> ReloadReport {
        let _ops = lock(&self.ops);
        let mut report = ReloadReport::default();

        let jobs = match self.store.load() {
            Ok(jobs) => jobs,
            Err(DeskPilotError::JobsFileMissing(path)) => {
                tracing::debug!("No jobs file at {}", path.display());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("⚠️ Reload skipped: {e}");
                report.store_unreadable = true;
                return report;
            }
        };

        let on_disk: HashSet<&str> = jobs.iter().map(|j| j.job_id.as_str()).collect();
        for job_id in self.engine.job_ids() {
            if !on_disk.contains(job_id.as_str()) {
                self.engine.disarm(&job_id);
                self.metadata_mut().remove(&job_id);
                report.removed += 1;
            }
        }
        // Metadata for one-time jobs the engine already dropped
        self.metadata_mut()
            .retain(|id, _| on_disk.contains(id.as_str()));

        for job in jobs {
            let unchanged = self.engine.contains(&job.job_id)
                && self
                    .metadata_ref()
                    .get(&job.job_id)
                    .is_some_and(|m| m.definition == job);
            if unchanged {
                report.scheduled += 1;
                continue;
            }

            let job_id = job.job_id.clone();
            match self.schedule_job(job, false) {
                Ok(_) => report.scheduled += 1,
                Err(e) => {
                    tracing::warn!("Skipping job {job_id}: {e}");
                    self.engine.disarm(&job_id);
                    self.metadata_mut().remove(&job_id);
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            "Reload: {} scheduled, {} removed, {} failed",
            report.scheduled,
            report.removed,
            report.failed
        );
        report
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    pub fn resume(&self) {
        self.engine.resume();
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    /// Pause, resync with disk, resume.
    pub fn handle_wake(&self) {
        self.pause();
        let report = self.reload();
        self.resume();
        tracing::info!(
            "🔄 Reloaded after wake: {} scheduled, {} removed",
            report.scheduled,
            report.removed
        );
    }

    /// The persisted definition of a job.
    pub fn job(&self, job_id: &str) -> Option<JobDefinition> {
        self.store.find(job_id)
    }

    pub fn next_run_time(&self, job_id: &str) -> Option<NaiveDateTime> {
        self.engine.job(job_id).and_then(|j| j.next_run_time)
    }

    /// Stop the wake detector and the engine. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let detector = lock(&self.wake).take();
        if let Some(mut detector) = detector {
            detector.stop();
        }
        self.engine.shutdown();
        tracing::info!("Scheduler shut down");
    }

    /// Delete a one-time job once it has run.
    ///
    /// Only the definition that fired is deleted: if the id was removed and
    /// scheduled again while the run was in flight, the new job stays.
    fn on_job_event(&self, event: &JobEvent) {
        let JobEvent::Executed {
            job_id, definition, ..
        } = event
        else {
            return;
        };
        if !definition.is_one_time() {
            return;
        }
        let _ops = lock(&self.ops);
        let Some(job) = self.store.find(job_id) else {
            return;
        };
        if job != **definition {
            tracing::debug!("Job {job_id} was rescheduled while running; keeping the new definition");
            return;
        }
        self.store.delete(job_id);
        self.engine.disarm(job_id);
        self.metadata_mut().remove(job_id);
        let removed = self.attachments.cleanup(job.attachments());
        tracing::info!("🧹 One-time job {job_id} completed; removed it and {removed} attachment(s)");
    }

    fn metadata_ref(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, JobMetadata>> {
        self.metadata
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metadata_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, JobMetadata>> {
        self.metadata
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SchedulerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
