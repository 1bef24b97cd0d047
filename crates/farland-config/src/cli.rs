//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Farland command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "farland", about = "Level-of-detail terrain bake demo")]
pub struct CliArgs {
    /// Level of the LOD tree root.
    #[arg(long)]
    pub root_level: Option<u8>,

    /// Coarsest level to bake.
    #[arg(long)]
    pub max_level: Option<u8>,

    /// Bake worker threads (0 = automatic).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Number of frames to simulate.
    #[arg(long)]
    pub frames: Option<u32>,

    /// Terrain noise seed.
    #[arg(long)]
    pub seed: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(level) = args.root_level {
            self.tree.root_level = level;
        }
        if let Some(level) = args.max_level {
            self.tree.max_level = level;
        }
        if let Some(workers) = args.workers {
            self.bake.worker_threads = workers;
        }
        if let Some(frames) = args.frames {
            self.demo.frames = frames;
        }
        if let Some(seed) = args.seed {
            self.demo.seed = seed;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            max_level: Some(4),
            workers: Some(2),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.tree.max_level, 4);
        assert_eq!(config.bake.worker_threads, 2);
        assert_eq!(config.debug.log_level, "debug");
        // Non-overridden fields retain defaults
        assert_eq!(config.tree.root_level, 32);
        assert_eq!(config.demo.frames, 120);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from(["farland", "--frames", "5", "--seed", "7"]);
        assert_eq!(args.frames, Some(5));
        assert_eq!(args.seed, Some(7));
        assert!(args.config.is_none());
    }
}
