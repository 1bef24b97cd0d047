//! Configuration for the farland terrain pipeline.
//!
//! Settings persist to disk as RON files and can be overridden from the
//! command line via clap.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{BakeConfig, Config, DebugConfig, DemoConfig, TreeConfig, default_config_dir};
pub use error::ConfigError;
