//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// LOD tree layout.
    pub tree: TreeConfig,
    /// Bake pipeline tuning.
    pub bake: BakeConfig,
    /// Demo world and run length.
    pub demo: DemoConfig,
    /// Logging settings.
    pub debug: DebugConfig,
}

/// LOD tree layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TreeConfig {
    /// Level of the synthetic root node (1..=32).
    pub root_level: u8,
    /// A level-0 tile spans `2^tile_shift` world units per axis.
    pub tile_shift: u8,
    /// Coarsest level that is baked. Must be below `root_level`.
    pub max_level: u8,
}

/// Bake pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BakeConfig {
    /// Worker threads (0 = one less than the CPU count).
    pub worker_threads: usize,
    /// Tree updates committed per frame (0 = unlimited).
    pub max_updates_per_frame: usize,
}

/// Demo world and run length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    /// Half-width of the generated world in level-0 tiles.
    pub world_radius_tiles: u32,
    /// Number of frames to simulate.
    pub frames: u32,
    /// Terrain noise seed.
    pub seed: u32,
    /// Unload and re-receive a batch of tiles every this many frames (0 = never).
    pub unload_every: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level filter (e.g. "debug", "info", "farland_bake=trace").
    pub log_level: String,
    /// Directory for the JSON log file in debug builds. Defaults to `logs/`.
    pub log_dir: Option<PathBuf>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            root_level: 32,
            tile_shift: 6,
            max_level: 8,
        }
    }
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_updates_per_frame: 512,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            world_radius_tiles: 16,
            frames: 120,
            seed: 42,
            unload_every: 30,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

// --- Load / Save / Reload ---

/// Platform config directory for farland (e.g. `~/.config/farland`).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("farland")
}

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Returns `Some(new_config)` if the file on disk differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Checks cross-field constraints the tree relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tree = &self.tree;
        if !(1..=32).contains(&tree.root_level) {
            return Err(ConfigError::InvalidValue(format!(
                "tree.root_level must be in 1..=32, got {}",
                tree.root_level
            )));
        }
        if tree.max_level >= tree.root_level {
            return Err(ConfigError::InvalidValue(format!(
                "tree.max_level ({}) must be below tree.root_level ({})",
                tree.max_level, tree.root_level
            )));
        }
        if tree.tile_shift > 24 {
            return Err(ConfigError::InvalidValue(format!(
                "tree.tile_shift must be at most 24, got {}",
                tree.tile_shift
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("root_level: 32"));
        assert!(ron_str.contains("max_updates_per_frame: 512"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(tree: (max_level: 5))").unwrap();
        assert_eq!(config.tree.max_level, 5);
        assert_eq!(config.tree.root_level, 32);
        assert_eq!(config.bake, BakeConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.bake.worker_threads = 3;
        config.debug.log_dir = Some(PathBuf::from("/tmp/farland-logs"));

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.demo.frames = 10;
        modified.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap();
        assert_eq!(reloaded.map(|c| c.demo.frames), Some(10));
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_levels() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.tree.max_level = 32;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = Config::default();
        config.tree.root_level = 0;
        config.tree.max_level = 0;
        assert!(config.validate().is_err());
    }
}
