//! Google Drive backend for pdvbackup.
//!
//! This module provides:
//! - Credential loading from the token store and credentials file
//! - OAuth2 refresh-token exchange, attempted once per expiry
//! - Folder resolution by name with optional creation
//! - Multipart uploads and streamed downloads with progress

pub mod auth;
pub mod client;
pub mod credentials;
pub mod query;
pub mod resolver;

pub use auth::{About, AboutUser, AuthManager, AuthState, AuthStatus};
pub use client::{DriveClient, DriveFile};
pub use credentials::{CredentialFile, CredentialRecord};
pub use query::Query;
pub use resolver::FolderResolver;
