use serde::{Deserialize, Serialize};

pub const DEFAULT_STORE_NAME: &str = "kenko";

/// How a store is opened: its name and, optionally, the container of the
/// external sync service it shares records with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    #[serde(default)]
    pub sync_container: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_STORE_NAME.to_string(),
            sync_container: None,
        }
    }
}

impl StoreConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sync_container: None,
        }
    }

    #[must_use]
    pub fn with_sync_container(mut self, container: impl Into<String>) -> Self {
        self.sync_container = Some(container.into());
        self
    }

    /// File name of the durable store inside the data directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.sqlite", self.name)
    }

    /// A missing or blank container means the store stays local.
    #[must_use]
    pub fn sync_mode(&self) -> SyncMode {
        match self.sync_container.as_deref().map(str::trim) {
            Some(container) if !container.is_empty() => SyncMode::Remote {
                container: container.to_string(),
            },
            _ => SyncMode::LocalOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    LocalOnly,
    Remote { container: String },
}

impl SyncMode {
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncMode::Remote { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_local_only() {
        let config = StoreConfig::default();
        assert_eq!(config.file_name(), "kenko.sqlite");
        assert_eq!(config.sync_mode(), SyncMode::LocalOnly);
    }

    #[test]
    fn test_container_enables_remote_mode() {
        let config = StoreConfig::named("test").with_sync_container("iCloud.com.example.kenko");
        assert_eq!(
            config.sync_mode(),
            SyncMode::Remote {
                container: "iCloud.com.example.kenko".to_string()
            }
        );
    }

    #[test]
    fn test_blank_container_stays_local() {
        let config = StoreConfig::default().with_sync_container("  ");
        assert!(!config.sync_mode().is_remote());
    }

    #[test]
    fn test_missing_container_deserializes_as_none() {
        let config: StoreConfig = serde_json::from_str(r#"{"name":"kenko"}"#).unwrap();
        assert_eq!(config.sync_container, None);
    }
}
