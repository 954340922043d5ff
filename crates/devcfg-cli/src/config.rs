//! Configuration loading

use anyhow::{Context, Result};
use devcfg_core::{ScanMode, INDEX_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Directory holding the device records
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Index file, relative to the root unless absolute
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,
    /// Abort on the first invalid record instead of skipping it
    #[serde(default)]
    pub strict: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            index_file: default_index_file(),
            strict: false,
        }
    }
}

impl CorpusConfig {
    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.index_file)
    }

    /// Strict when configured, or when running under CI
    pub fn scan_mode(&self) -> ScanMode {
        if self.strict {
            ScanMode::Strict
        } else {
            ScanMode::from_env()
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./devices")
}

fn default_index_file() -> PathBuf {
    PathBuf::from(INDEX_FILE_NAME)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Load configuration from file, falling back to defaults if it is missing
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}
