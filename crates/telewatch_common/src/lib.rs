//! Shared types for Telewatch components.
//!
//! The event model handed to the engine by source collaborators, the analysis
//! the engine hands back, configuration, and the common error type.

pub mod analysis;
pub mod config;
pub mod error;
pub mod event;

pub use analysis::{truncate_chars, Analysis};
pub use config::Config;
pub use error::WatchError;
pub use event::{MonitorEvent, Severity};

/// Application name used for config and state directories
pub const APP_NAME: &str = "telewatch";

/// System-wide config file path
pub const SYSTEM_CONFIG_PATH: &str = "/etc/telewatch/config.toml";
