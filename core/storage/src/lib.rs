//! Remote backup client for the point-of-sale database.
//!
//! Uploads local files into a named Google Drive folder and downloads them
//! back, with credential bookkeeping (token store, one-shot refresh) handled
//! by [`gdrive::AuthManager`].
//!
//! # Design Principles
//! - Folder references are never cached: every operation resolves by name
//! - Requests run strictly in sequence, no automatic retries
//! - Operation-level calls report failure as `None`/`false` and log the cause

pub mod backup;
pub mod config;
pub mod gdrive;
pub mod progress;

pub use backup::{timestamped_name, BackupClient, RemoteFile, DEFAULT_FOLDER};
pub use config::{ClientConfig, DuplicatePolicy};
pub use progress::Progress;
