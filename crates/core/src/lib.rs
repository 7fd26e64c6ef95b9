//! Shared configuration and logging setup for the taskwire workspace.

pub mod config;
pub mod logging;

pub use config::{Config, ServerConfig, TasksConfig};
