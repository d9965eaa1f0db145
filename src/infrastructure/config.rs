use crate::domain::{config::MuxConfig, error::{MuxError, MuxResult}};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Use the per-user configuration file.
    pub fn new() -> MuxResult<Self> {
        Ok(Self {
            config_path: Self::default_config_path()?,
        })
    }

    /// Use an explicit configuration file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Load the configuration, falling back to defaults when the file is absent.
    pub fn load_config(&self) -> MuxResult<MuxConfig> {
        if !self.config_path.exists() {
            return Ok(MuxConfig::default());
        }
        self.load_config_from_path(&self.config_path)
    }

    /// Load and validate configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> MuxResult<MuxConfig> {
        let content = fs::read_to_string(path).map_err(|e| MuxError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        let config: MuxConfig = toml::from_str(&content).map_err(|e| MuxError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &MuxConfig) -> MuxResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MuxError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| MuxError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| MuxError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Write a default configuration file, refusing to overwrite one.
    pub fn init_config(&self) -> MuxResult<&Path> {
        if self.config_path.exists() {
            return Err(MuxError::Config {
                message: format!(
                    "Configuration already exists at {}",
                    self.config_path.display()
                ),
            });
        }

        self.save_config_to_path(&self.config_path, &MuxConfig::default())?;
        Ok(&self.config_path)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn default_config_path() -> MuxResult<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| MuxError::Config {
            message: "Could not determine configuration directory".to_string(),
        })?;

        Ok(base.join("serial-mux").join("config.toml"))
    }
}
