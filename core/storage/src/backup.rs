//! Backup and restore operations against a Drive folder.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use pdvbackup_common::{DriveId, Error, RemoteName, Result};

use crate::config::{ClientConfig, DuplicatePolicy};
use crate::gdrive::{About, AuthManager, DriveClient, DriveFile, FolderResolver};
use crate::progress::Progress;

/// Folder used when the caller does not name one.
pub const DEFAULT_FOLDER: &str = "backup";

/// A file found in a backup folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: DriveId,
    pub name: String,
    /// Size in bytes, if the server reported one.
    pub size: Option<u64>,
    pub modified_time: Option<DateTime<Utc>>,
}

impl TryFrom<DriveFile> for RemoteFile {
    type Error = Error;

    fn try_from(file: DriveFile) -> Result<Self> {
        let size = file.size_bytes();
        Ok(Self {
            id: DriveId::new(file.id)?,
            name: file.name,
            size,
            modified_time: file.modified_time,
        })
    }
}

/// Name a backup after the moment it was taken:
/// `<stem>_backup_<YYYY-MM-DD_HH-MM-SS>.<ext>`.
pub fn timestamped_name(stem: &str, ext: &str, now: NaiveDateTime) -> String {
    let stamp = now.format("%Y-%m-%d_%H-%M-%S");
    if ext.is_empty() {
        format!("{}_backup_{}", stem, stamp)
    } else {
        format!("{}_backup_{}.{}", stem, stamp, ext.trim_start_matches('.'))
    }
}

/// Remote backup client.
///
/// Authenticates once on [`BackupClient::connect`]. Each operation then
/// re-resolves its folder by name and runs its requests in order.
///
/// `backup`, `restore`, `list_files_in_folder` and `restore_latest` never
/// fail: errors are logged and turned into `None`/`false`. The `try_*`
/// variants return the error instead.
pub struct BackupClient {
    config: ClientConfig,
    drive: DriveClient,
}

impl BackupClient {
    /// Build the HTTP client and authenticate.
    ///
    /// Missing or invalid credentials do not fail construction; the client
    /// is returned unauthenticated and every operation reports failure.
    ///
    /// # Errors
    /// - HTTP client cannot be built
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("pdvbackup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        let auth = AuthManager::connect(&config, http.clone()).await;
        let drive = DriveClient::new(&config, http, Arc::new(auth));

        Ok(Self { config, drive })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether a live credential is held.
    pub async fn is_authenticated(&self) -> bool {
        self.drive.auth().is_authenticated().await
    }

    /// Ask the server who the current credential belongs to.
    pub async fn check(&self) -> Result<About> {
        self.drive.about().await
    }

    /// Upload `local_path` into `folder`, creating the folder if needed.
    ///
    /// The remote name defaults to the file's basename. Returns the id of the
    /// created (or, under [`DuplicatePolicy::Overwrite`], updated) file.
    pub async fn try_backup(
        &self,
        local_path: impl AsRef<Path>,
        folder: &str,
        remote_name: Option<&str>,
    ) -> Result<DriveId> {
        let path = self.config.resolve(local_path);

        let data = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "Local file not found: {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let name = match remote_name {
            Some(name) => RemoteName::new(name)?,
            None => RemoteName::new(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )?,
        };

        let folder_id = FolderResolver::new(&self.drive)
            .resolve_or_create(folder)
            .await?;

        if self.config.duplicate_policy == DuplicatePolicy::Overwrite {
            if let Some(existing) = self.drive.find_file(&folder_id, name.as_str()).await? {
                let id = existing.drive_id()?;
                self.drive.update_content(&id, data).await?;
                info!("Backup updated: {} ({})", name, id);
                return Ok(id);
            }
        }

        let created = self
            .drive
            .upload_multipart(name.as_str(), &folder_id, data)
            .await?;
        let id = created.drive_id()?;
        info!("Backup successful: {} ({})", name, id);
        Ok(id)
    }

    /// [`Self::try_backup`], logging failures.
    pub async fn backup(
        &self,
        local_path: impl AsRef<Path>,
        folder: &str,
        remote_name: Option<&str>,
    ) -> Option<DriveId> {
        match self.try_backup(local_path, folder, remote_name).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Backup failed: {}", e);
                None
            }
        }
    }

    /// Download `remote_name` from `folder` to `dest`.
    ///
    /// The folder is never created. Missing parent directories of `dest`
    /// are, once the remote file is found, and existing content at `dest`
    /// is truncated.
    ///
    /// Returns the number of bytes written.
    pub async fn try_restore(
        &self,
        dest: impl AsRef<Path>,
        remote_name: &str,
        folder: &str,
        on_progress: impl FnMut(Progress),
    ) -> Result<u64> {
        let dest = self.prepare_destination(dest.as_ref()).await?;

        let folder_id = self.existing_folder(folder).await?;
        let file = self
            .drive
            .find_file(&folder_id, remote_name)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "File '{}' not found in folder '{}'",
                    remote_name, folder
                ))
            })?;

        let file = RemoteFile::try_from(file)?;
        self.download(&file, &dest, on_progress).await
    }

    /// [`Self::try_restore`] with progress logged at debug level.
    pub async fn restore(&self, dest: impl AsRef<Path>, remote_name: &str, folder: &str) -> bool {
        self.restore_with_progress(dest, remote_name, folder, |progress| {
            debug!(?progress, "restore progress")
        })
        .await
    }

    /// [`Self::try_restore`], logging failures.
    pub async fn restore_with_progress(
        &self,
        dest: impl AsRef<Path>,
        remote_name: &str,
        folder: &str,
        on_progress: impl FnMut(Progress),
    ) -> bool {
        match self.try_restore(dest, remote_name, folder, on_progress).await {
            Ok(_) => true,
            Err(e) => {
                error!("Restore failed: {}", e);
                false
            }
        }
    }

    /// List `folder`, most recently modified first.
    ///
    /// # Errors
    /// - `NotFound` if the folder does not exist
    pub async fn try_list_files_in_folder(&self, folder: &str) -> Result<Vec<RemoteFile>> {
        let folder_id = self.existing_folder(folder).await?;
        self.drive
            .list_folder(&folder_id)
            .await?
            .into_iter()
            .map(RemoteFile::try_from)
            .collect()
    }

    /// [`Self::try_list_files_in_folder`], logging failures.
    ///
    /// An existing empty folder yields `Some(vec![])`.
    pub async fn list_files_in_folder(&self, folder: &str) -> Option<Vec<RemoteFile>> {
        match self.try_list_files_in_folder(folder).await {
            Ok(files) => Some(files),
            Err(e) => {
                error!("Listing failed: {}", e);
                None
            }
        }
    }

    /// Restore the most recently modified file in `folder` whose name starts
    /// with `prefix`. Returns the file that was restored.
    pub async fn try_restore_latest(
        &self,
        dest: impl AsRef<Path>,
        prefix: &str,
        folder: &str,
        on_progress: impl FnMut(Progress),
    ) -> Result<RemoteFile> {
        let dest = self.prepare_destination(dest.as_ref()).await?;

        let latest = self
            .try_list_files_in_folder(folder)
            .await?
            .into_iter()
            .find(|f| f.name.starts_with(prefix))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No backup starting with '{}' in folder '{}'",
                    prefix, folder
                ))
            })?;

        self.download(&latest, &dest, on_progress).await?;
        Ok(latest)
    }

    /// [`Self::try_restore_latest`], logging failures.
    pub async fn restore_latest(&self, dest: impl AsRef<Path>, prefix: &str, folder: &str) -> bool {
        let result = self
            .try_restore_latest(dest, prefix, folder, |progress| {
                debug!(?progress, "restore progress")
            })
            .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                error!("Restore failed: {}", e);
                false
            }
        }
    }

    /// Resolve `dest` and check that it can be written. Creates nothing;
    /// parent directories are made by [`Self::download`].
    async fn prepare_destination(&self, dest: &Path) -> Result<PathBuf> {
        // No local side effects without a credential
        self.drive.auth().current().await?;

        let dest = self.config.resolve(dest);
        if tokio::fs::metadata(&dest).await.is_ok_and(|m| m.is_dir()) {
            return Err(Error::InvalidInput(format!(
                "Restore destination is a directory: {}",
                dest.display()
            )));
        }

        // The nearest existing ancestor must be a writable directory
        for ancestor in dest.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match tokio::fs::metadata(ancestor).await {
                Ok(meta) if !meta.is_dir() => {
                    return Err(Error::Storage(format!(
                        "Not a directory: {}",
                        ancestor.display()
                    )));
                }
                Ok(meta) if meta.permissions().readonly() => {
                    return Err(Error::PermissionDenied(format!(
                        "Destination directory is read-only: {}",
                        ancestor.display()
                    )));
                }
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(dest)
    }

    async fn existing_folder(&self, folder: &str) -> Result<DriveId> {
        FolderResolver::new(&self.drive)
            .lookup(folder)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Folder '{}' not found", folder)))
    }

    async fn download(
        &self,
        file: &RemoteFile,
        dest: &Path,
        on_progress: impl FnMut(Progress),
    ) -> Result<u64> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let written = self
            .drive
            .download_to(&file.id, file.size, dest, on_progress)
            .await?;
        info!(
            "Restore successful: {} -> {} ({} bytes)",
            file.name,
            dest.display(),
            written
        );
        Ok(written)
    }
}
