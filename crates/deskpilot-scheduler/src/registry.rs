//! Task Registry: maps task types to callables, labels, argument styles and pools.
//!
//! Built once through [`TaskRegistryBuilder`], then shared read-only behind an `Arc`.

use crate::command::CommandTask;
use crate::jobs::{DataParams, EmailParams, JobDefinition};
use deskpilot_core::{PoolKind, Result, TaskConfig, TaskStyle};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A task callable. Failure is signalled with `Err`.
pub type TaskFn = Arc<dyn Fn(&TaskArgs) -> Result<()> + Send + Sync>;

/// Parameters handed to a task callable, shaped by its [`TaskStyle`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskArgs {
    Files {
        source_directory: String,
    },
    Email(EmailParams),
    Data {
        source_directory: String,
        data_params: DataParams,
    },
}

impl TaskArgs {
    pub fn for_job(job: &JobDefinition, style: TaskStyle) -> Self {
        match style {
            TaskStyle::Files => TaskArgs::Files {
                source_directory: job.folder_target.clone(),
            },
            TaskStyle::Email => TaskArgs::Email(job.email_params.clone()),
            TaskStyle::Data => TaskArgs::Data {
                source_directory: job.folder_target.clone(),
                data_params: job.data_params.clone(),
            },
        }
    }

    pub fn source_directory(&self) -> Option<&str> {
        match self {
            TaskArgs::Files { source_directory } | TaskArgs::Data { source_directory, .. } => {
                Some(source_directory.as_str())
            }
            TaskArgs::Email(_) => None,
        }
    }
}

/// Well-known task types and their display labels.
pub const BUILTIN_TASKS: &[(&str, &str)] = &[
    ("sort_by_type", "Sort by Type"),
    ("sort_by_date", "Sort by Date"),
    ("sort_by_size", "Sort by Size"),
    ("detect_duplicates", "Detect Duplicates"),
    ("rename_files", "Rename Files"),
    ("compress_files", "Compress Files"),
    ("backup_files", "Backup Files"),
    ("send_email", "Send Email"),
    ("merge_data", "Merge Data"),
    ("mirror_data", "Mirror Data"),
];

pub fn builtin_label(task_type: &str) -> Option<&'static str> {
    BUILTIN_TASKS
        .iter()
        .find(|(name, _)| *name == task_type)
        .map(|(_, label)| *label)
}

/// One registered task type.
#[derive(Clone)]
pub struct TaskEntry {
    pub task_type: String,
    pub label: String,
    pub style: TaskStyle,
    pub pool: PoolKind,
    pub func: TaskFn,
}

impl TaskEntry {
    /// Entry with the label and style implied by the task-type name.
    pub fn new(task_type: &str, func: TaskFn) -> Self {
        Self {
            task_type: task_type.to_string(),
            label: builtin_label(task_type).unwrap_or(task_type).to_string(),
            style: TaskStyle::for_task_type(task_type),
            pool: PoolKind::General,
            func,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_style(mut self, style: TaskStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_pool(mut self, pool: PoolKind) -> Self {
        self.pool = pool;
        self
    }
}

impl fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("task_type", &self.task_type)
            .field("label", &self.label)
            .field("style", &self.style)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Immutable task-type lookup table.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: HashMap<String, TaskEntry>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    /// Build a registry from `[tasks.*]` config sections, binding each to its command.
    pub fn from_config(tasks: &BTreeMap<String, TaskConfig>) -> Result<Self> {
        let mut builder = Self::builder();
        for (task_type, config) in tasks {
            let command =
                CommandTask::from_argv(task_type, &config.command)?.with_timeout(config.timeout());
            let mut entry = TaskEntry::new(task_type, command.into_task_fn()).with_pool(config.pool);
            if let Some(label) = &config.label {
                entry = entry.with_label(label);
            }
            if let Some(style) = config.style {
                entry = entry.with_style(style);
            }
            builder = builder.entry(entry);
        }
        Ok(builder.build())
    }

    pub fn resolve(&self, task_type: &str) -> Option<&TaskEntry> {
        self.entries.get(task_type)
    }

    /// Registered label, else the built-in label, else the raw identifier.
    pub fn label(&self, task_type: &str) -> String {
        if let Some(entry) = self.entries.get(task_type) {
            return entry.label.clone();
        }
        builtin_label(task_type).unwrap_or(task_type).to_string()
    }

    /// All entries sorted by task type.
    pub fn entries(&self) -> Vec<&TaskEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| a.task_type.cmp(&b.task_type));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct TaskRegistryBuilder {
    entries: HashMap<String, TaskEntry>,
}

impl TaskRegistryBuilder {
    /// Register a closure under `task_type` with default label, style and pool.
    pub fn task<F>(self, task_type: &str, func: F) -> Self
    where
        F: Fn(&TaskArgs) -> Result<()> + Send + Sync + 'static,
    {
        self.entry(TaskEntry::new(task_type, Arc::new(func)))
    }

    /// Register a fully specified entry. Later entries replace earlier ones.
    pub fn entry(mut self, entry: TaskEntry) -> Self {
        tracing::debug!("Registered task: {} ({})", entry.task_type, entry.label);
        self.entries.insert(entry.task_type.clone(), entry);
        self
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            entries: self.entries,
        }
    }
}
