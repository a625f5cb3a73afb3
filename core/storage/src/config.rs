//! Backup client configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use pdvbackup_common::{Error, Result};

/// Drive v3 API base URL.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Drive v3 upload API base URL.
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// What to do when a backup targets a name that already exists in the folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Every backup creates a new remote file, same-named files pile up.
    #[default]
    Accumulate,
    /// Replace the content of the first same-named file in the folder.
    Overwrite,
}

/// Configuration for [`crate::BackupClient`].
///
/// Relative paths (credential files, backup sources, restore destinations)
/// are resolved against `storage_root`. On desktop this is usually the
/// working directory, on Android the app-private files directory; the caller
/// decides which and passes it in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root directory for relative local paths.
    pub storage_root: PathBuf,
    /// Bootstrap credentials file.
    pub credentials_file: PathBuf,
    /// Token store written after every successful (re)authentication.
    pub token_file: PathBuf,
    /// Base URL of the metadata API.
    pub api_base: String,
    /// Base URL of the upload API.
    pub upload_base: String,
    /// Timeout for search/create requests, in seconds.
    pub request_timeout_secs: u64,
    /// Timeout for uploads and downloads, in seconds.
    pub transfer_timeout_secs: u64,
    /// Timeout for the token validity probe, in seconds.
    pub probe_timeout_secs: u64,
    /// Handling of same-named backups.
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("."),
            credentials_file: PathBuf::from("credentials.json"),
            token_file: PathBuf::from("token.json"),
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            request_timeout_secs: 10,
            transfer_timeout_secs: 60,
            probe_timeout_secs: 5,
            duplicate_policy: DuplicatePolicy::Accumulate,
        }
    }
}

impl ClientConfig {
    /// Create a configuration rooted at `storage_root` with default settings.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    /// Point both API bases at a different server (e.g. a local mock).
    pub fn with_server(mut self, server: &str) -> Self {
        let server = server.trim_end_matches('/');
        self.api_base = format!("{}/drive/v3", server);
        self.upload_base = format!("{}/upload/drive/v3", server);
        self
    }

    /// Set the duplicate policy.
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Load configuration from a JSON file. Missing keys take their defaults.
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid JSON for this structure
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::InvalidInput(format!("Invalid config {}: {}", path.display(), e))
        })
    }

    /// Resolve a local path against the storage root. Absolute paths pass through.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.storage_root.join(path)
        }
    }

    /// Absolute location of the bootstrap credentials file.
    pub fn credentials_path(&self) -> PathBuf {
        self.resolve(&self.credentials_file)
    }

    /// Absolute location of the token store.
    pub fn token_path(&self) -> PathBuf {
        self.resolve(&self.token_file)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub(crate) fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub(crate) fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_drive() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base, DRIVE_API_BASE);
        assert_eq!(config.upload_base, DRIVE_UPLOAD_BASE);
        assert_eq!(config.transfer_timeout(), Duration::from_secs(60));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Accumulate);
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let config = ClientConfig::new("/data/data/pos/files");
        assert_eq!(
            config.resolve("pdvDB.sqlite"),
            PathBuf::from("/data/data/pos/files/pdvDB.sqlite")
        );
        assert_eq!(config.resolve("/tmp/x.sqlite"), PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(
            config.token_path(),
            PathBuf::from("/data/data/pos/files/token.json")
        );
    }

    #[test]
    fn test_with_server() {
        let config = ClientConfig::default().with_server("http://127.0.0.1:9000/");
        assert_eq!(config.api_base, "http://127.0.0.1:9000/drive/v3");
        assert_eq!(config.upload_base, "http://127.0.0.1:9000/upload/drive/v3");
    }

    #[tokio::test]
    async fn test_load_partial_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(
            &path,
            r#"{"storage_root": "/srv/pos", "duplicate_policy": "overwrite"}"#,
        )
        .await
        .unwrap();

        let config = ClientConfig::load(&path).await.unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/srv/pos"));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Overwrite);
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[tokio::test]
    async fn test_load_invalid_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let result = ClientConfig::load(&path).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
