//! Job definitions: the unit of persistence and scheduling.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A persisted job: what to run, when, and with which parameters.
///
/// Whether a job recurs is derived from `recurring_days` and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique job ID.
    pub job_id: String,
    /// Key into the task registry.
    pub task_type: String,
    /// Folder or file the task works on.
    #[serde(default, deserialize_with = "nullable")]
    pub folder_target: String,
    /// Time of day, `HH:MM` (24h).
    pub run_time: String,
    /// Weekday names; empty means the job runs once.
    #[serde(default, deserialize_with = "nullable")]
    pub recurring_days: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub email_params: EmailParams,
    #[serde(default, deserialize_with = "nullable")]
    pub data_params: DataParams,
}

impl JobDefinition {
    /// True when the job fires a single time and is deleted afterwards.
    pub fn is_one_time(&self) -> bool {
        self.recurring_days.is_empty()
    }

    /// Materialized attachment paths owned by this job.
    pub fn attachments(&self) -> &[String] {
        &self.email_params.attachments
    }
}

/// Parameters for email jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub to_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub cc_addresses: Vec<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl EmailParams {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parameters for data merge/mirror jobs.
///
/// Keys other than the known ones are kept in `extra` so hand-written or
/// GUI-written documents survive a rewrite unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_file: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub other_files: Vec<String>,
    /// Per source file: source column name to master column name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_map: Option<BTreeMap<String, BTreeMap<String, String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_single_name_col: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DataParams {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Treat an explicit JSON `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A request to schedule a job.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub task_type: String,
    pub folder_target: String,
    pub run_time: String,
    pub recurring_days: Vec<String>,
    /// Generated from the task type and current time when `None`.
    pub job_id: Option<String>,
    pub email_params: EmailParams,
    pub data_params: DataParams,
}

impl JobRequest {
    /// Create a one-time job request.
    pub fn new(task_type: &str, folder_target: &str, run_time: &str) -> Self {
        Self {
            task_type: task_type.to_string(),
            folder_target: folder_target.to_string(),
            run_time: run_time.to_string(),
            ..Default::default()
        }
    }

    /// Make the job recur on the given weekdays.
    pub fn recurring<S: AsRef<str>>(mut self, days: &[S]) -> Self {
        self.recurring_days = days.iter().map(|d| d.as_ref().to_string()).collect();
        self
    }

    pub fn with_id(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    pub fn with_email(mut self, email_params: EmailParams) -> Self {
        self.email_params = email_params;
        self
    }

    pub fn with_data(mut self, data_params: DataParams) -> Self {
        self.data_params = data_params;
        self
    }

    /// Build the definition, generating an ID if none was supplied.
    pub fn into_definition(self, now: DateTime<Utc>) -> JobDefinition {
        let job_id = match self.job_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => generate_job_id(&self.task_type, now),
        };
        JobDefinition {
            job_id,
            task_type: self.task_type,
            folder_target: self.folder_target,
            run_time: self.run_time,
            recurring_days: self.recurring_days,
            email_params: self.email_params,
            data_params: self.data_params,
        }
    }
}

/// `"{task_type}_{unix_timestamp}"` with microsecond fraction.
pub fn generate_job_id(task_type: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}.{:06}",
        task_type,
        now.timestamp(),
        now.timestamp_subsec_micros()
    )
}

/// Quick-lookup fields kept in memory for every armed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobMetadata {
    pub task_type: String,
    pub folder_target: String,
    pub recurring_days: Vec<String>,
    pub to_addresses: Vec<String>,
    pub is_email: bool,
    /// The definition the job was armed from.
    pub definition: JobDefinition,
}

impl JobMetadata {
    pub fn new(job: &JobDefinition, is_email: bool) -> Self {
        Self {
            task_type: job.task_type.clone(),
            folder_target: job.folder_target.clone(),
            recurring_days: job.recurring_days.clone(),
            to_addresses: job.email_params.to_addresses.clone(),
            is_email,
            definition: job.clone(),
        }
    }

    /// Recipients for email jobs, the folder otherwise.
    pub fn target(&self) -> String {
        if !self.is_email {
            return self.folder_target.clone();
        }
        if self.to_addresses.is_empty() {
            "-".to_string()
        } else {
            self.to_addresses.join(", ")
        }
    }
}

/// One row of `list_jobs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub task_type: String,
    /// Human-readable task label.
    pub label: String,
    /// Folder for file jobs, recipients for email jobs.
    pub target: String,
    /// Trigger description.
    pub trigger: String,
    pub next_run_time: Option<NaiveDateTime>,
    pub recurring_days: Vec<String>,
}
