//! DeskPilot error types.

use std::path::PathBuf;

/// Every failure DeskPilot can surface to a caller.
///
/// Variants are grouped by kind so callers can tell a definition problem
/// (bad `run_time`, unknown task type) from a storage problem (no jobs file,
/// corrupt jobs file) without matching on message text.
#[derive(Debug, thiserror::Error)]
pub enum DeskPilotError {
    // Definition errors
    #[error("Invalid run time '{0}': expected HH:MM")]
    InvalidRunTime(String),

    #[error("Invalid weekday '{0}'")]
    InvalidWeekday(String),

    #[error("Task type '{0}' not found")]
    TaskNotFound(String),

    // Storage errors
    #[error("Jobs file not found: {}", .0.display())]
    JobsFileMissing(PathBuf),

    #[error("Jobs file {} is corrupt: {reason}", path.display())]
    JobsFileCorrupt { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Execution errors
    #[error("Task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl DeskPilotError {
    /// True for errors caused by a bad job definition rather than by the
    /// environment.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRunTime(_) | Self::InvalidWeekday(_) | Self::TaskNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DeskPilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_errors() {
        assert!(DeskPilotError::InvalidRunTime("25:00".into()).is_definition_error());
        assert!(DeskPilotError::TaskNotFound("nope".into()).is_definition_error());
        assert!(!DeskPilotError::JobsFileMissing(PathBuf::from("/x")).is_definition_error());
        assert!(!DeskPilotError::Task("boom".into()).is_definition_error());
    }

    #[test]
    fn test_display() {
        let err = DeskPilotError::JobsFileCorrupt {
            path: PathBuf::from("/tmp/jobs.json"),
            reason: "expected value".into(),
        };
        assert_eq!(
            err.to_string(),
            "Jobs file /tmp/jobs.json is corrupt: expected value"
        );
        assert_eq!(
            DeskPilotError::InvalidRunTime("9am".into()).to_string(),
            "Invalid run time '9am': expected HH:MM"
        );
    }
}
