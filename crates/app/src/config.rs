use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tally_core::MatchingConfig;

const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "tally.db";

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: Option<PathBuf>,
    pub matching: MatchingConfig,
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Failed to parse configuration")?;
        config.matching.validate()?;
        Ok(config)
    }

    /// Reads `explicit` if given, otherwise `config.toml` in `data_dir` when it exists.
    pub fn load(explicit: Option<&Path>, data_dir: &Path) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = data_dir.join(CONFIG_FILE);
                if !default.exists() {
                    tracing::debug!("No configuration at {}, using defaults", default.display());
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// `--db` wins over the configured path; the data directory is the fallback.
    pub fn database_path(&self, cli_override: Option<&Path>, data_dir: &Path) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.database.clone())
            .unwrap_or_else(|| data_dir.join(DATABASE_FILE))
    }
}

/// Platform data directory, e.g. `~/.local/share/tally` on Linux.
pub fn data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "tally", "Tally")
        .context("Failed to determine the application data directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
