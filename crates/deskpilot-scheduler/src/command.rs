//! Command tasks: a task type bound to an external program.
//!
//! The program receives the task arguments as JSON on stdin plus a few
//! environment variables. A non-zero exit status fails the job, and so does
//! running past the task's timeout.

use crate::registry::{TaskArgs, TaskFn};
use deskpilot_core::{DeskPilotError, Result};
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const ENV_TASK_TYPE: &str = "DESKPILOT_TASK_TYPE";
pub const ENV_SOURCE_DIRECTORY: &str = "DESKPILOT_SOURCE_DIRECTORY";

/// Stderr is truncated to this many bytes in error messages.
const MAX_STDERR: usize = 2000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct CommandTask {
    pub task_type: String,
    pub program: String,
    pub args: Vec<String>,
    /// The child is killed once it runs longer than this.
    pub timeout: Duration,
}

impl CommandTask {
    /// Build from `[program, arg...]`.
    pub fn from_argv(task_type: &str, argv: &[String]) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            DeskPilotError::Config(format!("Task '{task_type}' has an empty command"))
        })?;
        Ok(Self {
            task_type: task_type.to_string(),
            program: program.clone(),
            args: args.to_vec(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the command to completion. Blocks the calling thread.
    pub fn run(&self, args: &TaskArgs) -> Result<()> {
        let payload = serde_json::to_vec(args)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(ENV_TASK_TYPE, &self.task_type)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = args.source_directory() {
            command.env(ENV_SOURCE_DIRECTORY, dir);
        }

        let mut child = command.spawn().map_err(|e| {
            DeskPilotError::Task(format!("Failed to start '{}': {e}", self.program))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // The program may exit without reading its input.
            if let Err(e) = stdin.write_all(&payload) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    reap(&mut child);
                    return Err(e.into());
                }
            }
        }

        // Drain stderr on its own thread so a chatty child never blocks on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let status = match self.wait_with_timeout(&mut child) {
            Ok(status) => status,
            Err(e) => {
                reap(&mut child);
                return Err(e);
            }
        };
        let Some(status) = status else {
            // The reader thread is left to finish on its own: a grandchild may
            // still hold the pipe open.
            tracing::warn!(
                "Command task '{}' killed after {}s",
                self.task_type,
                self.timeout.as_secs()
            );
            return Err(DeskPilotError::Task(format!(
                "'{}' timed out after {}s",
                self.program,
                self.timeout.as_secs()
            )));
        };
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        if status.success() {
            tracing::debug!("Command task '{}' finished", self.task_type);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&stderr);
        let stderr = stderr.trim();
        let stderr = match stderr.char_indices().nth(MAX_STDERR) {
            Some((idx, _)) => &stderr[..idx],
            None => stderr,
        };
        Err(DeskPilotError::Task(format!(
            "'{}' exited with {}: {}",
            self.program, status, stderr
        )))
    }

    /// Poll the child until it exits. `None` means it hit the timeout and was killed.
    fn wait_with_timeout(&self, child: &mut Child) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                reap(child);
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn into_task_fn(self) -> TaskFn {
        Arc::new(move |args: &TaskArgs| self.run(args))
    }
}

/// Kill the child if it is still running and collect its exit status.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
