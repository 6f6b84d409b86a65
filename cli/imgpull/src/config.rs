//! Optional configuration file.
//!
//! `config.json` in the platform config directory supplies defaults that
//! flags and environment variables override.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use imgpull_core::config::PROJECT_NAME;
use imgpull_core::PullerConfig;
use serde::Deserialize;

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

/// Get the config file path.
fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", PROJECT_NAME).map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Defaults read from disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Library service base URL.
    pub library_url: Option<String>,

    /// Default hub host.
    pub hub_host: Option<String>,

    /// Builder program for docker:// sources.
    pub builder: Option<PathBuf>,

    /// Cache root directory.
    pub cache_dir: Option<PathBuf>,
}

impl FileConfig {
    /// Load the config file, or return defaults when there is none.
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Overlay onto `config`.
    pub fn apply(self, config: &mut PullerConfig) {
        if let Some(url) = self.library_url {
            config.library_url = url;
        }
        if let Some(host) = self.hub_host {
            config.hub_host = host;
        }
        if let Some(builder) = self.builder {
            config.builder = Some(builder);
        }
        if let Some(root) = self.cache_dir {
            config.cache.root = root;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert!(config.library_url.is_none());
        assert!(config.builder.is_none());
    }

    #[test]
    fn test_file_values_apply() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"{"library_url": "https://library.internal", "builder": "/opt/bin/sif-build"}"#,
        )
        .unwrap();

        let mut config = PullerConfig::default();
        let default_hub = config.hub_host.clone();
        FileConfig::load_from(&path).unwrap().apply(&mut config);

        assert_eq!(config.library_url, "https://library.internal");
        assert_eq!(config.builder, Some(PathBuf::from("/opt/bin/sif-build")));
        assert_eq!(config.hub_host, default_hub);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"libary_url": "typo"}"#).unwrap();

        assert!(FileConfig::load_from(&path).is_err());
    }
}
