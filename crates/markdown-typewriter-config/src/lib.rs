use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    ConfigReadError {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    ConfigParseError {
        config_path: PathBuf,
        source: toml::de::Error,
    },
}

/// `chars_per_tick = 3` or `chars_per_tick = [2, 6]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CharsPerTickSetting {
    Fixed(usize),
    Range([usize; 2]),
}

impl Default for CharsPerTickSetting {
    fn default() -> Self {
        CharsPerTickSetting::Fixed(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chars_per_tick: CharsPerTickSetting,
    pub tick_interval_ms: u64,
    /// `none`, `fade-in` or `typing`.
    pub effect: String,
    pub pause_on_hidden: bool,
    pub fade_duration_ms: u64,
    /// Built-in reveal plugins, in priority order.
    pub plugins: Vec<String>,
    /// Bytes fed to the parser per replay step.
    pub chunk_size: usize,
    pub chunk_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chars_per_tick: CharsPerTickSetting::default(),
            tick_interval_ms: 20,
            effect: "typing".to_string(),
            pause_on_hidden: true,
            fade_duration_ms: 300,
            plugins: ["math", "diagram", "image", "thematic-break"]
                .into_iter()
                .map(String::from)
                .collect(),
            chunk_size: 8,
            chunk_interval_ms: 40,
        }
    }
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ConfigReadError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::ConfigParseError {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        Ok(Some(config))
    }

    pub fn load() -> Result<Option<Self>, ConfigError> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, config_path: P) -> anyhow::Result<()> {
        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        self.save_to_path(&config_path)
    }

    pub fn config_path() -> PathBuf {
        let config_dir = shellexpand::tilde("~/.config/markdown-typewriter");
        PathBuf::from(config_dir.as_ref()).join("config.toml")
    }

    /// Expands `~` and environment variables in a user-supplied path.
    pub fn expand_path(path: &Path) -> Option<PathBuf> {
        let path_str = path.to_string_lossy();
        match shellexpand::full(&path_str) {
            Ok(expanded) => Some(PathBuf::from(expanded.as_ref())),
            Err(_) => None,
        }
    }
}
