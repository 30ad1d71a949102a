//! # DeskPilot: persistent task scheduler for desktop automation
//!
//! Usage:
//!   deskpilot daemon                                   # Run the scheduler until Ctrl-C
//!   deskpilot add --task backup_files --target ~/Docs --at 09:00 --days Monday,Friday
//!   deskpilot add --task send_email --at 17:30 --to boss@example.com --attach report.pdf
//!   deskpilot list [--json]                            # Scheduled jobs
//!   deskpilot remove <job_id>
//!   deskpilot tasks                                    # Registered task types

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deskpilot_core::DeskPilotConfig;
use deskpilot_core::config::expand_path;
use deskpilot_scheduler::{
    DataParams, EmailParams, JobRequest, JobsFileWatcher, ManagerOptions, SchedulerManager,
    TaskRegistry,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "deskpilot",
    version,
    about = "🗓️ DeskPilot: scheduled file, email and data automation"
)]
struct Cli {
    /// Config file (default: ~/.deskpilot/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, wake detector and jobs file watcher
    Daemon,
    /// Schedule a job
    Add(AddArgs),
    /// Remove a scheduled job
    Remove {
        job_id: String,
    },
    /// List scheduled jobs
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List registered task types
    Tasks,
}

#[derive(clap::Args)]
struct AddArgs {
    /// Task type, e.g. backup_files
    #[arg(long)]
    task: String,

    /// Folder the task works on
    #[arg(long, default_value = "")]
    target: String,

    /// Time of day, HH:MM (24h)
    #[arg(long)]
    at: String,

    /// Weekdays to repeat on (omit for a one-time job)
    #[arg(long, value_delimiter = ',')]
    days: Vec<String>,

    /// Explicit job ID (replaces an existing job with the same ID)
    #[arg(long)]
    id: Option<String>,

    #[arg(long)]
    from: Option<String>,

    #[arg(long, value_delimiter = ',')]
    to: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    cc: Vec<String>,

    #[arg(long)]
    subject: Option<String>,

    #[arg(long)]
    body: Option<String>,

    /// File to attach (repeatable)
    #[arg(long)]
    attach: Vec<String>,

    /// Data task parameters as JSON
    #[arg(long)]
    data: Option<String>,
}

impl AddArgs {
    fn into_request(self) -> Result<JobRequest> {
        let data_params: DataParams = match &self.data {
            Some(json) => serde_json::from_str(json).context("Invalid --data JSON")?,
            None => DataParams::default(),
        };
        let email_params = EmailParams {
            from_address: self.from,
            to_addresses: self.to,
            subject: self.subject,
            body_text: self.body,
            cc_addresses: self.cc,
            attachments: self
                .attach
                .iter()
                .map(|p| expand_path(p).to_string_lossy().into_owned())
                .collect(),
        };
        let target = if self.target.is_empty() {
            String::new()
        } else {
            expand_path(&self.target)
                .to_string_lossy()
                .into_owned()
        };

        let mut request = JobRequest::new(&self.task, &target, &self.at)
            .recurring(&self.days)
            .with_email(email_params)
            .with_data(data_params);
        if let Some(id) = &self.id {
            request = request.with_id(id);
        }
        Ok(request)
    }
}

fn load_config(path: Option<&str>) -> Result<DeskPilotConfig> {
    let config = match path {
        Some(p) => DeskPilotConfig::load_from(&expand_path(p))?,
        None => DeskPilotConfig::load()?,
    };
    Ok(config)
}

fn open_manager(config: &DeskPilotConfig) -> Result<Arc<SchedulerManager>> {
    let registry = TaskRegistry::from_config(&config.tasks)?;
    if registry.is_empty() {
        tracing::warn!("No task types configured; add [tasks.<name>] sections to the config");
    }
    Ok(SchedulerManager::new(
        ManagerOptions::from_config(config),
        Arc::new(registry),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "deskpilot=debug,deskpilot_scheduler=debug,deskpilot_core=debug"
    } else {
        "deskpilot=info,deskpilot_scheduler=info,deskpilot_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Daemon => run_daemon(&config).await?,
        Command::Add(args) => {
            let manager = open_manager(&config)?;
            let job_id = manager.add_job(args.into_request()?)?;
            if let Some(next) = manager.next_run_time(&job_id) {
                println!("✅ Scheduled {job_id} (next run {next})");
            } else {
                println!("✅ Scheduled {job_id}");
            }
            manager.shutdown();
        }
        Command::Remove { job_id } => {
            let manager = open_manager(&config)?;
            if manager.job(&job_id).is_none() {
                println!("⚠️  No job with ID {job_id}");
            } else if manager.remove_job(&job_id) {
                println!("🗑️  Removed {job_id}");
            } else {
                anyhow::bail!("Failed to update the jobs file for {job_id}");
            }
            manager.shutdown();
        }
        Command::List { json } => {
            let manager = open_manager(&config)?;
            let jobs = manager.list_jobs();
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No scheduled jobs.");
            } else {
                for job in &jobs {
                    let next = job
                        .next_run_time
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".into());
                    println!("{}  {}", job.job_id, job.label);
                    println!("    target:  {}", job.target);
                    println!("    trigger: {}", job.trigger);
                    println!("    next:    {next}");
                }
            }
            manager.shutdown();
        }
        Command::Tasks => {
            let registry = TaskRegistry::from_config(&config.tasks)?;
            if registry.is_empty() {
                println!("No task types configured.");
            }
            for entry in registry.entries() {
                println!(
                    "{:<20} {:<20} style={:?} pool={}",
                    entry.task_type, entry.label, entry.style, entry.pool
                );
            }
        }
    }

    Ok(())
}

async fn run_daemon(config: &DeskPilotConfig) -> Result<()> {
    let manager = open_manager(config)?;
    manager.start()?;

    let watcher = if config.scheduler.watch_jobs_file {
        JobsFileWatcher::start(&manager)
    } else {
        None
    };

    tracing::info!(
        "🚀 DeskPilot daemon running ({} job(s)); press Ctrl-C to stop",
        manager.list_jobs().len()
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    manager.shutdown();
    Ok(())
}
