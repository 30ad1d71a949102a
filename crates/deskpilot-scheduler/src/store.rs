//! File-based job store: a single pretty-printed JSON array.
//! The file is the source of truth; every write rewrites it whole.

use crate::jobs::JobDefinition;
use deskpilot_core::{DeskPilotError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// JSON-file job store. Writes never raise; they report success as `bool`.
pub struct JobStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JobStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read every valid definition, distinguishing a missing file from a corrupt one.
    pub fn load(&self) -> Result<Vec<JobDefinition>> {
        let _guard = self.guard();
        self.load_unlocked()
    }

    fn load_unlocked(&self) -> Result<Vec<JobDefinition>> {
        let entries = self.load_entries_unlocked()?;
        let mut jobs = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<JobDefinition>(entry) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!(
                    "Ignoring malformed job entry #{index} in {}: {e}",
                    self.path.display()
                ),
            }
        }
        Ok(jobs)
    }

    /// The raw array, including entries that do not decode.
    fn load_entries_unlocked(&self) -> Result<Vec<Value>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeskPilotError::JobsFileMissing(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let corrupt = |reason: String| DeskPilotError::JobsFileCorrupt {
            path: self.path.clone(),
            reason,
        };
        let value: Value = serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
        match value {
            Value::Array(entries) => Ok(entries),
            _ => Err(corrupt("top-level value is not an array".into())),
        }
    }

    /// Read every valid definition; missing or unreadable files read as empty.
    pub fn read_all(&self) -> Vec<JobDefinition> {
        let _guard = self.guard();
        match self.load_unlocked() {
            Ok(jobs) => jobs,
            Err(e) => {
                log_unreadable(&e);
                Vec::new()
            }
        }
    }

    fn entries_or_empty(&self) -> Vec<Value> {
        match self.load_entries_unlocked() {
            Ok(entries) => entries,
            Err(e) => {
                log_unreadable(&e);
                Vec::new()
            }
        }
    }

    pub fn find(&self, job_id: &str) -> Option<JobDefinition> {
        self.read_all().into_iter().find(|j| j.job_id == job_id)
    }

    /// Insert or replace the definition with the same `job_id`.
    ///
    /// Other entries are written back exactly as read, even ones that do not
    /// decode as a job.
    pub fn upsert(&self, job: &JobDefinition) -> bool {
        let entry = match serde_json::to_value(job) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Failed to encode job {}: {e}", job.job_id);
                return false;
            }
        };
        let _guard = self.guard();
        let mut entries = self.entries_or_empty();
        entries.retain(|e| entry_id(e) != Some(job.job_id.as_str()));
        entries.push(entry);
        self.write_logged(&entries)
    }

    /// Delete by id. Absent ids succeed without touching the file.
    pub fn delete(&self, job_id: &str) -> bool {
        let _guard = self.guard();
        let mut entries = self.entries_or_empty();
        let before = entries.len();
        entries.retain(|e| entry_id(e) != Some(job_id));
        if entries.len() == before {
            return true;
        }
        self.write_logged(&entries)
    }

    fn write_logged(&self, entries: &[Value]) -> bool {
        match self.write(entries) {
            Ok(()) => {
                tracing::debug!("💾 Saved {} jobs to {}", entries.len(), self.path.display());
                true
            }
            Err(e) => {
                tracing::error!("Failed to write {}: {e}", self.path.display());
                false
            }
        }
    }

    fn write(&self, entries: &[Value]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("job_id")?.as_str()
}

fn log_unreadable(e: &DeskPilotError) {
    if !matches!(e, DeskPilotError::JobsFileMissing(_)) {
        tracing::warn!("⚠️ {e}; treating job store as empty");
    }
}
