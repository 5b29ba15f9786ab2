//! BlueChat CLI library
//!
//! Command parsing, configuration loading, and the demos that drive the session
//! and broadcast engines over the loopback harness.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
