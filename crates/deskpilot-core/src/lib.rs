//! # DeskPilot Core
//!
//! Types shared by every DeskPilot crate: the error taxonomy and the
//! TOML configuration system.

pub mod config;
pub mod error;

pub use config::{DeskPilotConfig, PoolKind, SchedulerConfig, TaskConfig, TaskStyle, WakeConfig};
pub use error::{DeskPilotError, Result};
