use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use kenko_core::config::{DEFAULT_STORE_NAME, StoreConfig};
use kenko_core::models::UserIdentity;

pub struct Config {
    pub data_dir: PathBuf,
    pub store: StoreConfig,
    /// Signed-in user, used to tag and filter owned records.
    pub user: Option<UserIdentity>,
}

/// On-disk shape of `config.json`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    store_name: Option<String>,
    sync_container: Option<String>,
    user: Option<UserIdentity>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "kenko").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Self::load_from(&proj_dirs.config_dir().join("config.json"), data_dir)
    }

    /// Builds the config from `config_path` if it exists, defaults otherwise.
    pub fn load_from(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        let file = if config_path.exists() {
            let raw = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            serde_json::from_str::<FileConfig>(&raw)
                .with_context(|| format!("Invalid config file {}", config_path.display()))?
        } else {
            debug!(path = %config_path.display(), "no config file, using defaults");
            FileConfig::default()
        };

        let mut store =
            StoreConfig::named(file.store_name.as_deref().unwrap_or(DEFAULT_STORE_NAME));
        if let Some(container) = file.sync_container {
            store = store.with_sync_container(container);
        }

        Ok(Config {
            data_dir,
            store,
            user: file.user,
        })
    }
}
