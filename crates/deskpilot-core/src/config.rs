//! DeskPilot configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DeskPilotError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeskPilotConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    /// Task types bound to external commands, keyed by task type.
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
}

impl DeskPilotConfig {
    /// Load config from the default path (~/.deskpilot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeskPilotError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DeskPilotError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DeskPilotError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the DeskPilot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".deskpilot")
    }
}

/// Scheduler engine and persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_jobs_file")]
    pub jobs_file: String,
    #[serde(default = "default_attachments_dir")]
    pub attachments_dir: String,
    #[serde(default = "default_general_workers")]
    pub general_workers: usize,
    #[serde(default = "default_process_workers")]
    pub process_workers: usize,
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
    #[serde(default = "bool_true")]
    pub coalesce: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "bool_true")]
    pub watch_jobs_file: bool,
}

fn bool_true() -> bool { true }
fn default_jobs_file() -> String { "~/.deskpilot/scheduled_jobs.json".into() }
fn default_attachments_dir() -> String { "~/.deskpilot/scheduled_attachments".into() }
fn default_general_workers() -> usize { 10 }
fn default_process_workers() -> usize { 3 }
fn default_misfire_grace_secs() -> u64 { 300 }
fn default_tick_interval_ms() -> u64 { 1000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jobs_file: default_jobs_file(),
            attachments_dir: default_attachments_dir(),
            general_workers: default_general_workers(),
            process_workers: default_process_workers(),
            misfire_grace_secs: default_misfire_grace_secs(),
            coalesce: true,
            tick_interval_ms: default_tick_interval_ms(),
            watch_jobs_file: true,
        }
    }
}

impl SchedulerConfig {
    /// Jobs file path with `~` expanded.
    pub fn jobs_path(&self) -> PathBuf {
        expand_path(&self.jobs_file)
    }

    /// Attachment storage directory with `~` expanded.
    pub fn attachments_path(&self) -> PathBuf {
        expand_path(&self.attachments_dir)
    }

    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Sleep/resume detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_jump_threshold_secs")]
    pub jump_threshold_secs: u64,
}

fn default_poll_interval_secs() -> u64 { 1 }
fn default_jump_threshold_secs() -> u64 { 10 }

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval_secs(),
            jump_threshold_secs: default_jump_threshold_secs(),
        }
    }
}

impl WakeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn jump_threshold(&self) -> Duration {
        Duration::from_secs(self.jump_threshold_secs)
    }
}

/// How a task callable expects its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStyle {
    /// `source_directory` only.
    Files,
    /// The full email parameter set.
    Email,
    /// `source_directory` plus `data_params`.
    Data,
}

impl TaskStyle {
    /// Style implied by a task type name.
    pub fn for_task_type(task_type: &str) -> Self {
        match task_type {
            "send_email" => TaskStyle::Email,
            "merge_data" | "mirror_data" => TaskStyle::Data,
            _ => TaskStyle::Files,
        }
    }
}

/// Which worker pool runs a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// I/O-bound file and email work.
    #[default]
    General,
    /// CPU-heavy or process-isolated work.
    Process,
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKind::General => write!(f, "general"),
            PoolKind::Process => write!(f, "process"),
        }
    }
}

/// A task type bound to an external command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub style: Option<TaskStyle>,
    #[serde(default)]
    pub pool: PoolKind,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// The command is killed after running this long.
    #[serde(default = "default_task_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_task_timeout_secs() -> u64 { 600 }

impl TaskConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeskPilotConfig::default();
        assert_eq!(config.scheduler.general_workers, 10);
        assert_eq!(config.scheduler.process_workers, 3);
        assert_eq!(config.scheduler.misfire_grace_secs, 300);
        assert!(config.scheduler.coalesce);
        assert_eq!(config.wake.jump_threshold_secs, 10);
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [scheduler]
            jobs_file = "/var/lib/deskpilot/jobs.json"
            misfire_grace_secs = 60

            [wake]
            enabled = false

            [tasks.backup_files]
            label = "Nightly Backup"
            pool = "process"
            command = ["rsync", "-a"]
            timeout_secs = 3600

            [tasks.send_email]
            command = ["mail-sender"]
        "#;

        let config: DeskPilotConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.jobs_path(), PathBuf::from("/var/lib/deskpilot/jobs.json"));
        assert_eq!(config.scheduler.misfire_grace(), Duration::from_secs(60));
        assert_eq!(config.scheduler.general_workers, 10);
        assert!(!config.wake.enabled);

        let backup = &config.tasks["backup_files"];
        assert_eq!(backup.label.as_deref(), Some("Nightly Backup"));
        assert_eq!(backup.pool, PoolKind::Process);
        assert_eq!(backup.command, vec!["rsync", "-a"]);
        assert_eq!(backup.timeout(), Duration::from_secs(3600));

        let email = &config.tasks["send_email"];
        assert_eq!(email.pool, PoolKind::General);
        assert!(email.style.is_none());
        assert_eq!(email.timeout_secs, 600);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: DeskPilotConfig = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert!(config.scheduler.watch_jobs_file);
        assert_eq!(config.wake.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_task_style_for_task_type() {
        assert_eq!(TaskStyle::for_task_type("send_email"), TaskStyle::Email);
        assert_eq!(TaskStyle::for_task_type("merge_data"), TaskStyle::Data);
        assert_eq!(TaskStyle::for_task_type("mirror_data"), TaskStyle::Data);
        assert_eq!(TaskStyle::for_task_type("sort_by_type"), TaskStyle::Files);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = DeskPilotConfig::default();
        config.scheduler.process_workers = 1;
        config.tasks.insert(
            "compress_files".into(),
            TaskConfig {
                label: None,
                style: Some(TaskStyle::Files),
                pool: PoolKind::Process,
                command: vec!["zip".into(), "-r".into()],
                timeout_secs: 0,
            },
        );
        config.save_to(&path).unwrap();

        let loaded = DeskPilotConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.process_workers, 1);
        assert_eq!(loaded.tasks["compress_files"].command, vec!["zip", "-r"]);
        // Zero is clamped so the command gets at least a second
        assert_eq!(loaded.tasks["compress_files"].timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scheduler\njobs_file = ").unwrap();
        let err = DeskPilotConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, DeskPilotError::Config(_)));
    }

    #[test]
    fn test_home_dir() {
        let home = DeskPilotConfig::home_dir();
        assert!(home.to_string_lossy().contains("deskpilot"));
    }
}
