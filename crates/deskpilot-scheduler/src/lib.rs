//! # DeskPilot Scheduler
//!
//! Persistent job scheduling for desktop automation tasks.
//! A flat JSON file is the source of truth; the engine keeps an in-memory
//! armed set in sync with it.
//!
//! ## Architecture
//! ```text
//! SchedulerManager
//!   ├── TaskRegistry     task type → callable, label, arg style, pool
//!   ├── Trigger          weekly "cron[...]" or one-shot "date[...]"
//!   ├── JobStore         scheduled_jobs.json (temp file + rename)
//!   ├── AttachmentStore  scheduled_attachments/{job_id}_{file}
//!   ├── SchedulerEngine  tokio loop → WorkerPools (general / process) → spawn_blocking
//!   │                      └── JobEvent: executed / error / missed / skipped
//!   └── WakeDetector     clock-jump thread → pause → reload → resume
//!
//! JobsFileWatcher: jobs file edited elsewhere → reload
//! ```

pub mod attachments;
pub mod command;
pub mod engine;
pub mod jobs;
pub mod manager;
pub mod pools;
pub mod registry;
pub mod store;
pub mod trigger;
pub mod wake;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use attachments::AttachmentStore;
pub use command::CommandTask;
pub use engine::{Clock, EngineOptions, EngineState, JobEvent, SchedulerEngine};
pub use jobs::{DataParams, EmailParams, JobDefinition, JobRequest, JobSummary};
pub use manager::{ManagerOptions, ReloadReport, SchedulerManager};
pub use pools::{PoolStats, WorkerPools};
pub use registry::{TaskArgs, TaskEntry, TaskFn, TaskRegistry};
pub use store::JobStore;
pub use trigger::{RunTime, Trigger};
pub use wake::{WakeDetector, WakeOptions};
pub use watcher::JobsFileWatcher;
