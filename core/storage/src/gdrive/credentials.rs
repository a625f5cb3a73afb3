//! Credential records and their JSON file stores.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;

use pdvbackup_common::{Error, Result, Secret};

/// Default OAuth2 token endpoint used for refresh.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Tokens are treated as expired this long before their recorded expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// The bundle of secrets authorizing API calls.
///
/// Only `access_token` is needed to make requests. Keys this type does not
/// know about are kept in `extra` so a load/save cycle does not drop them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub scopes: BTreeSet<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_expiry"
    )]
    pub expiry: Option<DateTime<Utc>>,
    /// Legacy API key, only honoured when there is no access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<Secret>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CredentialRecord {
    /// Record holding only an access token.
    pub fn with_access_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(Secret::new(token)),
            ..Self::default()
        }
    }

    /// A record can authenticate requests iff it carries an access token.
    pub fn is_usable(&self) -> bool {
        self.access_token.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// A record can be refreshed iff refresh token and client credentials are all present.
    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.as_ref().is_some_and(|t| !t.is_empty())
            && self.client_id.as_deref().is_some_and(|id| !id.is_empty())
            && self.client_secret.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Whether the recorded expiry has passed (or is about to). Unknown expiry is never expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry
            .is_some_and(|expiry| expiry <= now + Duration::seconds(EXPIRY_SKEW_SECS))
    }

    /// Token endpoint for refresh, falling back to Google's.
    pub fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URL)
    }

    /// Build the `Authorization: Bearer <access_token>` header.
    ///
    /// # Errors
    /// - No access token in the record
    /// - Token contains bytes not allowed in a header value
    pub fn headers(&self) -> Result<HeaderMap> {
        let token = self
            .access_token
            .as_ref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Authentication("No access token in credentials".to_string()))?;

        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|_| {
                Error::Authentication("Access token is not a valid header value".to_string())
            })?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value);
        Ok(headers)
    }

    /// Query parameters for legacy API-key auth.
    ///
    /// Empty whenever an access token is present: bearer and key auth are
    /// mutually exclusive.
    pub fn api_key_params(&self) -> Vec<(&'static str, String)> {
        match (&self.access_token, &self.api_key) {
            (None, Some(key)) if !key.is_empty() => vec![("key", key.expose().to_string())],
            _ => Vec::new(),
        }
    }

    /// Fold a refreshed token into this record.
    pub(crate) fn apply_refresh(&mut self, refreshed: RefreshedToken) {
        self.access_token = Some(refreshed.access_token);
        if let Some(refresh_token) = refreshed.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        self.expiry = Some(refreshed.expires_at);
        if !refreshed.scopes.is_empty() {
            self.scopes = refreshed.scopes;
        }
    }
}

/// Result of a refresh-token exchange.
#[derive(Debug, Clone)]
pub(crate) struct RefreshedToken {
    pub access_token: Secret,
    pub refresh_token: Option<Secret>,
    pub expires_at: DateTime<Utc>,
    pub scopes: BTreeSet<String>,
}

/// Parse an expiry timestamp, accepting offset-less ISO-8601 as UTC.
fn parse_expiry(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Ok(parsed.with_timezone(&Utc)),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc()),
    }
}

fn deserialize_expiry<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        Some(raw) => parse_expiry(&raw).map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

/// A JSON file holding one [`CredentialRecord`].
///
/// Used both for the bootstrap credentials file and the token store.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    /// Create a handle for the file at `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    ///
    /// # Errors
    /// - File exists but cannot be read (e.g. permissions)
    /// - File is not a valid credential record
    pub async fn load(&self) -> Result<Option<CredentialRecord>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            Error::Serialization(format!("Invalid credentials in {}: {}", self.path.display(), e))
        })
    }

    /// Write the record, replacing the file.
    ///
    /// # Errors
    /// - Parent directory cannot be created or file cannot be written
    pub async fn save(&self, record: &CredentialRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        fs::write(&self.path, json).await.map_err(|e| {
            Error::Storage(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}
