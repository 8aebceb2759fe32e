use std::path::{Path, PathBuf};

use lodge_common::{MigrationError, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_FILE_NAMES: [&str; 3] = ["lodge.toml", "lodge.yml", "lodge.yaml"];

/// Locates and parses the lodge configuration file.
///
/// Search order: an explicit path, then `lodge.toml` / `lodge.yml` /
/// `lodge.yaml` in each search directory (the working directory, then the
/// user config directory). Without a file, defaults are used.
pub struct ConfigLoader {
    search_dirs: Vec<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        let mut search_dirs = vec![PathBuf::from(".")];
        if let Some(dir) = dirs::config_dir() {
            search_dirs.push(dir.join("lodge"));
        }
        Self { search_dirs }
    }

    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Load the configuration. Returns the file it came from, if any.
    pub fn load(&self, explicit: Option<&Path>) -> Result<(AppConfig, Option<PathBuf>)> {
        if let Some(path) = explicit {
            let config = Self::from_file(path)?;
            return Ok((config, Some(path.to_path_buf())));
        }

        for dir in &self.search_dirs {
            for name in CONFIG_FILE_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    let config = Self::from_file(&candidate)?;
                    return Ok((config, Some(candidate)));
                }
            }
        }

        debug!("no config file found, using defaults");
        Ok((AppConfig::default(), None))
    }

    /// Parse a single config file, dispatching on its extension. Relative
    /// paths inside the file resolve against the file's directory.
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mut config: AppConfig = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| MigrationError::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| MigrationError::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(MigrationError::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        if let Some(base) = path.parent() {
            config.database.path = resolve(base, &config.database.path);
            config.migrations.path = resolve(base, &config.migrations.path);
        }

        info!("config loaded from {}", path.display());
        Ok(config)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
