//! Scheduler Engine: owns the armed job set and fires callables when they come due.
//!
//! One tokio task runs the loop. It sleeps until the earliest next fire time
//! (capped by `tick_interval`) and is woken early whenever the armed set
//! changes. Callables run on `spawn_blocking`, gated by [`WorkerPools`].

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use deskpilot_core::{DeskPilotError, PoolKind, Result, SchedulerConfig};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::jobs::JobDefinition;
use crate::pools::{PoolStats, WorkerPools};
use crate::registry::{TaskArgs, TaskFn};
use crate::trigger::{Trigger, truncate_to_second};

/// Source of "now" in local wall-clock time.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| truncate_to_second(Local::now().naive_local()))
}

/// Event callback, invoked on the thread that produced the event.
pub type Listener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

/// Max events kept in the in-memory history.
const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub general_workers: usize,
    pub process_workers: usize,
    /// A fire later than this is reported as missed and not run.
    pub misfire_grace: Duration,
    /// Skip a due invocation while the previous one is still running.
    pub coalesce: bool,
    /// Upper bound on how long the loop sleeps between checks.
    pub tick_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for EngineOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            general_workers: config.general_workers,
            process_workers: config.process_workers,
            misfire_grace: config.misfire_grace(),
            coalesce: config.coalesce,
            tick_interval: config.tick_interval(),
        }
    }
}

/// Outcome of a due fire time.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Executed {
        job_id: String,
        at: NaiveDateTime,
        /// The definition this run was armed from.
        definition: Arc<JobDefinition>,
    },
    Error {
        job_id: String,
        at: NaiveDateTime,
        error: String,
    },
    /// The fire time was older than the misfire grace window.
    Missed {
        job_id: String,
        scheduled: NaiveDateTime,
    },
    /// The previous invocation was still running.
    Skipped {
        job_id: String,
        scheduled: NaiveDateTime,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Executed { job_id, .. }
            | JobEvent::Error { job_id, .. }
            | JobEvent::Missed { job_id, .. }
            | JobEvent::Skipped { job_id, .. } => job_id,
        }
    }
}

/// What to call when a job fires.
#[derive(Clone)]
pub struct JobRunner {
    pub func: TaskFn,
    pub args: TaskArgs,
    pub pool: PoolKind,
    pub definition: Arc<JobDefinition>,
}

struct ArmedJob {
    trigger: Trigger,
    next_run: Option<NaiveDateTime>,
    runner: JobRunner,
    running: Arc<AtomicBool>,
}

/// Snapshot of an armed job.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmedJobInfo {
    pub job_id: String,
    pub trigger: Trigger,
    pub next_run_time: Option<NaiveDateTime>,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    Paused,
    Stopped,
}

struct EngineInner {
    options: EngineOptions,
    clock: Clock,
    jobs: Mutex<HashMap<String, ArmedJob>>,
    listeners: RwLock<Vec<Listener>>,
    history: Mutex<VecDeque<JobEvent>>,
    state: Mutex<EngineState>,
    pools: WorkerPools,
    wakeup: Notify,
    runtime: Mutex<Option<Handle>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to the engine. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
}

impl SchedulerEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self::with_clock(options, system_clock())
    }

    pub fn with_clock(options: EngineOptions, clock: Clock) -> Self {
        let pools = WorkerPools::new(options.general_workers, options.process_workers);
        Self {
            inner: Arc::new(EngineInner {
                options,
                clock,
                jobs: Mutex::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
                history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
                state: Mutex::new(EngineState::Created),
                pools,
                wakeup: Notify::new(),
                runtime: Mutex::new(None),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.inner.clock)()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// Arm (or re-arm) a job. Returns its first fire time.
    ///
    /// Re-arming an id whose previous invocation is still running keeps the
    /// running flag, so coalescing still applies.
    pub fn arm(&self, job_id: &str, trigger: Trigger, runner: JobRunner) -> Option<NaiveDateTime> {
        let now = self.now();
        let next_run = trigger.first_fire(now);
        {
            let mut jobs = lock(&self.inner.jobs);
            let running = jobs
                .get(job_id)
                .map(|j| j.running.clone())
                .unwrap_or_default();
            match next_run {
                Some(_) => {
                    jobs.insert(
                        job_id.to_string(),
                        ArmedJob {
                            trigger,
                            next_run,
                            runner,
                            running,
                        },
                    );
                }
                None => {
                    jobs.remove(job_id);
                }
            }
        }
        tracing::debug!("Armed job {job_id}, next run {next_run:?}");
        self.inner.wakeup.notify_one();
        next_run
    }

    /// Disarm a job. An in-flight invocation is not interrupted.
    pub fn disarm(&self, job_id: &str) -> bool {
        let removed = lock(&self.inner.jobs).remove(job_id).is_some();
        if removed {
            tracing::debug!("Disarmed job {job_id}");
            self.inner.wakeup.notify_one();
        }
        removed
    }

    pub fn contains(&self, job_id: &str) -> bool {
        lock(&self.inner.jobs).contains_key(job_id)
    }

    pub fn job_ids(&self) -> Vec<String> {
        lock(&self.inner.jobs).keys().cloned().collect()
    }

    pub fn job(&self, job_id: &str) -> Option<ArmedJobInfo> {
        lock(&self.inner.jobs).get(job_id).map(|j| info(job_id, j))
    }

    pub fn jobs(&self) -> Vec<ArmedJobInfo> {
        lock(&self.inner.jobs)
            .iter()
            .map(|(id, j)| info(id, j))
            .collect()
    }

    pub fn add_listener(&self, listener: Listener) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.inner.state)
    }

    /// Spawn the engine loop on the current tokio runtime. Idempotent.
    pub fn start(&self) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|e| DeskPilotError::Scheduler(format!("No tokio runtime: {e}")))?;
        let mut loop_handle = lock(&self.inner.loop_handle);
        if loop_handle.is_some() {
            return Ok(());
        }
        {
            let mut state = lock(&self.inner.state);
            match *state {
                EngineState::Stopped => {
                    return Err(DeskPilotError::Scheduler("Engine has been shut down".into()));
                }
                EngineState::Created => *state = EngineState::Running,
                _ => {}
            }
        }
        *lock(&self.inner.runtime) = Some(handle.clone());
        let inner = self.inner.clone();
        *loop_handle = Some(handle.spawn(run_loop(inner)));
        tracing::info!(
            "⏰ Scheduler engine started (general: {}, process: {})",
            self.inner.options.general_workers,
            self.inner.options.process_workers
        );
        Ok(())
    }

    /// Stop dispatching. Armed jobs stay armed.
    pub fn pause(&self) {
        let mut state = lock(&self.inner.state);
        if matches!(*state, EngineState::Created | EngineState::Running) {
            *state = EngineState::Paused;
            tracing::info!("⏸️ Scheduler paused");
        }
    }

    pub fn resume(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state != EngineState::Paused {
                return;
            }
            *state = if lock(&self.inner.loop_handle).is_some() {
                EngineState::Running
            } else {
                EngineState::Created
            };
        }
        tracing::info!("▶️ Scheduler resumed");
        self.inner.wakeup.notify_one();
    }

    /// Stop the loop and close the pools. In-flight callables finish on their own.
    pub fn shutdown(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Stopped;
        }
        self.inner.pools.close();
        self.inner.wakeup.notify_one();
        if let Some(handle) = lock(&self.inner.loop_handle).take() {
            handle.abort();
        }
        tracing::info!("🛑 Scheduler engine stopped");
    }

    /// Fire everything due now. Returns the number of invocations dispatched.
    pub fn run_pending(&self) -> usize {
        self.inner.run_pending()
    }

    /// Most recent events, oldest first.
    pub fn recent_events(&self) -> Vec<JobEvent> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.inner.pools.stats()
    }
}

fn info(job_id: &str, job: &ArmedJob) -> ArmedJobInfo {
    ArmedJobInfo {
        job_id: job_id.to_string(),
        trigger: job.trigger.clone(),
        next_run_time: job.next_run,
        running: job.running.load(Ordering::SeqCst),
    }
}

impl EngineInner {
    fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    fn run_pending(self: &Arc<Self>) -> usize {
        if matches!(self.state(), EngineState::Paused | EngineState::Stopped) {
            return 0;
        }
        let now = (self.clock)();
        let grace = chrono::Duration::from_std(self.options.misfire_grace)
            .unwrap_or_else(|_| chrono::Duration::days(36500));

        let mut events = Vec::new();
        let mut due = Vec::new();
        {
            let mut jobs = lock(&self.jobs);
            for (job_id, job) in jobs.iter_mut() {
                let scheduled = match job.next_run {
                    Some(t) if t <= now => t,
                    _ => continue,
                };
                // Several missed occurrences collapse into the next future one.
                job.next_run = job.trigger.next_fire_after(now);

                if now - scheduled > grace {
                    events.push(JobEvent::Missed {
                        job_id: job_id.clone(),
                        scheduled,
                    });
                    continue;
                }
                if self.options.coalesce && job.running.load(Ordering::SeqCst) {
                    events.push(JobEvent::Skipped {
                        job_id: job_id.clone(),
                        scheduled,
                    });
                    continue;
                }
                job.running.store(true, Ordering::SeqCst);
                due.push((job_id.clone(), job.runner.clone(), job.running.clone()));
            }
            jobs.retain(|_, j| j.next_run.is_some());
        }

        for event in events {
            self.emit(event);
        }
        let count = due.len();
        for (job_id, runner, running) in due {
            self.dispatch(job_id, runner, running);
        }
        count
    }

    fn dispatch(self: &Arc<Self>, job_id: String, runner: JobRunner, running: Arc<AtomicBool>) {
        let handle = match Handle::try_current()
            .ok()
            .or_else(|| lock(&self.runtime).clone())
        {
            Some(h) => h,
            None => {
                running.store(false, Ordering::SeqCst);
                let at = (self.clock)();
                self.emit(JobEvent::Error {
                    job_id,
                    at,
                    error: "No tokio runtime available to run the job".into(),
                });
                return;
            }
        };

        tracing::info!("🔔 Job {job_id} fired ({} pool)", runner.pool);
        let inner = self.clone();
        handle.spawn(async move {
            let Some(permit) = inner.pools.acquire(runner.pool).await else {
                running.store(false, Ordering::SeqCst);
                tracing::warn!("Worker pools closed; job {job_id} not run");
                return;
            };
            let worker = inner.clone();
            let id = job_id.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let outcome = catch_unwind(AssertUnwindSafe(|| (runner.func)(&runner.args)));
                running.store(false, Ordering::SeqCst);
                let at = (worker.clock)();
                let event = match outcome {
                    Ok(Ok(())) => JobEvent::Executed {
                        job_id: id,
                        at,
                        definition: runner.definition.clone(),
                    },
                    Ok(Err(e)) => JobEvent::Error {
                        job_id: id,
                        at,
                        error: e.to_string(),
                    },
                    Err(panic) => JobEvent::Error {
                        job_id: id,
                        at,
                        error: panic_message(panic.as_ref()),
                    },
                };
                worker.emit(event);
            })
            .await;
            if let Err(e) = joined {
                tracing::error!("Worker for job {job_id} did not complete: {e}");
            }
        });
    }

    fn emit(&self, event: JobEvent) {
        match &event {
            JobEvent::Executed { job_id, .. } => tracing::info!("✅ Job {job_id} executed"),
            JobEvent::Error { job_id, error, .. } => {
                tracing::error!("❌ Job {job_id} failed: {error}")
            }
            JobEvent::Missed { job_id, scheduled } => {
                tracing::warn!("⚠️ Job {job_id} missed its run at {scheduled}; not retrying")
            }
            JobEvent::Skipped { job_id, .. } => {
                tracing::info!("Job {job_id} still running; skipping this run")
            }
        }
        {
            let mut history = lock(&self.history);
            if history.len() >= HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener(&event);
        }
    }

    /// Time until the earliest armed fire, capped at `tick_interval`.
    fn next_sleep(&self) -> Duration {
        let tick = self.options.tick_interval;
        let now = (self.clock)();
        lock(&self.jobs)
            .values()
            .filter_map(|j| j.next_run)
            .min()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO).min(tick))
            .unwrap_or(tick)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        "Task panicked".to_string()
    }
}

async fn run_loop(inner: Arc<EngineInner>) {
    loop {
        match inner.state() {
            EngineState::Stopped => break,
            EngineState::Paused => {
                inner.wakeup.notified().await;
                continue;
            }
            _ => {}
        }
        let fired = inner.run_pending();
        if fired > 0 {
            tracing::debug!("Dispatched {fired} job(s)");
        }
        let sleep = inner.next_sleep();
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = inner.wakeup.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobRequest;
    use crate::test_support::{ManualClock, wait_until};
    use crate::trigger::{one_shot_trigger, parse_run_time, weekly_trigger};
    use std::sync::atomic::AtomicUsize;

    fn options() -> EngineOptions {
        EngineOptions {
            general_workers: 2,
            process_workers: 1,
            misfire_grace: Duration::from_secs(300),
            coalesce: true,
            tick_interval: Duration::from_millis(20),
        }
    }

    fn runner(func: TaskFn, pool: PoolKind) -> JobRunner {
        let definition =
            JobRequest::new("backup_files", "/tmp", "09:00").into_definition(chrono::Utc::now());
        JobRunner {
            func,
            args: TaskArgs::Files {
                source_directory: definition.folder_target.clone(),
            },
            pool,
            definition: Arc::new(definition),
        }
    }

    fn counting_runner(counter: Arc<AtomicUsize>) -> JobRunner {
        runner(
            Arc::new(move |_: &TaskArgs| -> Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            PoolKind::General,
        )
    }

    fn failing_runner(message: &'static str) -> JobRunner {
        runner(
            Arc::new(move |_: &TaskArgs| -> Result<()> {
                Err(DeskPilotError::Task(message.into()))
            }),
            PoolKind::Process,
        )
    }

    #[test]
    fn test_arm_and_disarm() {
        // Thursday 09:00
        let clock = ManualClock::at("2026-10-15 09:00:00");
        let engine = SchedulerEngine::with_clock(options(), clock.clock());
        let trigger = weekly_trigger(&["Monday"], parse_run_time("14:30").unwrap()).unwrap();

        let next = engine.arm("j1", trigger, counting_runner(Arc::default()));
        assert_eq!(next, Some(ManualClock::parse("2026-10-19 14:30:00")));
        assert!(engine.contains("j1"));
        assert_eq!(engine.jobs().len(), 1);
        assert_eq!(engine.job("j1").unwrap().next_run_time, next);

        assert!(engine.disarm("j1"));
        assert!(!engine.disarm("j1"));
        assert!(engine.job_ids().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fires_when_due() {
        let clock = ManualClock::at("2026-10-15 09:00:00");
        let engine = SchedulerEngine::with_clock(options(), clock.clock());
        let counter = Arc::new(AtomicUsize::new(0));
        let trigger = weekly_trigger(&["Thursday"], parse_run_time("10:00").unwrap()).unwrap();
        engine.arm("weekly", trigger, counting_runner(counter.clone()));

        assert_eq!(engine.run_pending(), 0);
        clock.set("2026-10-15 10:00:30");
        assert_eq!(engine.run_pending(), 1);

        assert!(wait_until(|| counter.load(Ordering::SeqCst) == 1).await);
        assert!(wait_until(|| engine.recent_events().len() == 1).await);
        assert!(matches!(engine.recent_events()[0], JobEvent::Executed { .. }));
        // Recurring: advanced to next week
        assert_eq!(
            engine.job("weekly").unwrap().next_run_time,
            Some(ManualClock::parse("2026-10-22 10:00:00"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_time_job_dropped_after_fire() {
        let clock = ManualClock::at("2026-10-15 09:00:00");
        let engine = SchedulerEngine::with_clock(options(), clock.clock());
        let counter = Arc::new(AtomicUsize::new(0));
        let trigger = one_shot_trigger(parse_run_time("09:30").unwrap(), clock.now());
        engine.arm("once", trigger, counting_runner(counter.clone()));

        clock.set("2026-10-15 09:30:00");
        assert_eq!(engine.run_pending(), 1);
        assert!(!engine.contains("once"));
        assert!(wait_until(|| counter.load(Ordering::SeqCst) == 1).await);
        assert_eq!(engine.run_pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missed_outside_grace() {
        let clock = ManualClock::at("2026-10-15 09:00:00");
        let engine = SchedulerEngine::with_clock(options(), clock.clock());
        let counter = Arc::new(AtomicUsize::new(0));
        let trigger = weekly_trigger(&["thu"], parse_run_time("09:10").unwrap()).unwrap();
        engine.arm("late", trigger, counting_runner(counter.clone()));

        // Six minutes late with a five minute grace
        clock.set("2026-10-15 09:16:00");
        assert_eq!(engine.run_pending(), 0);
        assert_eq!(
            engine.recent_events(),
            vec![JobEvent::Missed {
                job_id: "late".into(),
                scheduled: ManualClock::parse("2026-10-15 09:10:00"),
            }]
        );
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(
            engine.job("late").unwrap().next_run_time,
            Some(ManualClock::parse("2026-10-22 09:10:00"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_error_and_panic_become_error_events() {
        let clock = ManualClock::at("2026-10-15 09:00:00");
        let engine = SchedulerEngine::with_clock(options(), clock.clock());
        let at = parse_run_time("09:01").unwrap();
        engine.arm("fails", weekly_trigger(&["thu"], at).unwrap(), failing_runner("disk full"));
        engine.arm(
            "panics",
            weekly_trigger(&["thu"], at).unwrap(),
            runner(
                Arc::new(|_: &TaskArgs| -> Result<()> { panic!("boom") }),
                PoolKind::General,
            ),
        );

        clock.set("2026-10-15 09:01:00");
        assert_eq!(engine.run_pending(), 2);
        assert!(wait_until(|| engine.recent_events().len() == 2).await);

        let mut errors: Vec<String> = engine
            .recent_events()
            .into_iter()
            .map(|e| match e {
                JobEvent::Error { error, .. } => error,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        errors.sort();
        assert!(errors[0].contains("boom"));
        assert!(errors[1].contains("disk full"));
        // Both recurring jobs stay armed and nothing is left running
        assert!(wait_until(|| engine.jobs().iter().all(|j| !j.running)).await);
        assert_eq!(engine.jobs().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_coalesce_skips_while_running() {
        let clock = ManualClock::at("2026-10-15 09:00:00");
        let engine = SchedulerEngine::with_clock(options(), clock.clock());
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let days = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"];
        engine.arm(
            "slow",
            weekly_trigger(&days, parse_run_time("09:05").unwrap()).unwrap(),
            runner(
                Arc::new(move |_: &TaskArgs| -> Result<()> {
                    flag.store(true, Ordering::SeqCst);
                    let _ = lock(&release_rx).recv_timeout(Duration::from_secs(5));
                    Ok(())
                }),
                PoolKind::General,
            ),
        );

        clock.set("2026-10-15 09:05:00");
        assert_eq!(engine.run_pending(), 1);
        assert!(wait_until(|| started.load(Ordering::SeqCst)).await);

        // Next day's occurrence comes due while the first is still running
        clock.set("2026-10-16 09:05:00");
        assert_eq!(engine.run_pending(), 0);
        assert!(matches!(
            engine.recent_events().last(),
            Some(JobEvent::Skipped { .. })
        ));

        release_tx.send(()).unwrap();
        assert!(wait_until(|| !engine.job("slow").unwrap().running).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pause_and_resume() {
        let clock = ManualClock::at("2026-10-15 09:00:00");
        let engine = SchedulerEngine::with_clock(options(), clock.clock());
        let counter = Arc::new(AtomicUsize::new(0));
        engine.arm(
            "j",
            weekly_trigger(&["thu"], parse_run_time("09:01").unwrap()).unwrap(),
            counting_runner(counter.clone()),
        );

        engine.pause();
        assert_eq!(engine.state(), EngineState::Paused);
        clock.set("2026-10-15 09:01:00");
        assert_eq!(engine.run_pending(), 0);

        engine.resume();
        assert_eq!(engine.state(), EngineState::Created);
        assert_eq!(engine.run_pending(), 1);
        assert!(wait_until(|| counter.load(Ordering::SeqCst) == 1).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_loop_fires_and_shutdown_is_idempotent() {
        let clock = ManualClock::at("2026-10-15 09:00:00");
        let engine = SchedulerEngine::with_clock(options(), clock.clock());
        let counter = Arc::new(AtomicUsize::new(0));
        engine.arm(
            "looped",
            weekly_trigger(&["thu"], parse_run_time("09:02").unwrap()).unwrap(),
            counting_runner(counter.clone()),
        );
        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        clock.set("2026-10-15 09:02:00");
        assert!(wait_until(|| counter.load(Ordering::SeqCst) == 1).await);

        engine.shutdown();
        engine.shutdown();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.start().is_err());
        assert_eq!(engine.run_pending(), 0);
    }

    #[test]
    fn test_start_requires_runtime() {
        let engine = SchedulerEngine::new(options());
        assert!(matches!(engine.start(), Err(DeskPilotError::Scheduler(_))));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("oops");
        assert_eq!(panic_message(boxed.as_ref()), "Task panicked: oops");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bad"));
        assert_eq!(panic_message(boxed.as_ref()), "Task panicked: bad");
    }
}
