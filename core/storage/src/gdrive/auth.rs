//! Authentication state and token refresh for the Drive client.

use chrono::{Duration, Utc};
use oauth2::{
    basic::BasicClient, AuthType, AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse,
    TokenUrl,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use pdvbackup_common::{Error, Result, Secret};

use super::credentials::{CredentialFile, CredentialRecord, RefreshedToken};
use crate::config::ClientConfig;

/// OAuth2 authorization endpoint. Required by the client type, unused for refresh.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Where the authentication manager currently stands.
///
/// ```text
/// Unauthenticated -> Authenticated -> Expired -> Refreshing -> Authenticated
///                                                           \-> Unauthenticated
/// ```
#[derive(Debug, Clone)]
pub enum AuthState {
    /// No usable credential. Every operation fails before touching the network.
    Unauthenticated,
    /// Live credential.
    Authenticated(CredentialRecord),
    /// Credential known to be rejected or past its expiry.
    Expired(CredentialRecord),
    /// A refresh-token exchange is in flight.
    Refreshing,
}

/// Discriminant of [`AuthState`] without the credential payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    Authenticated,
    Expired,
    Refreshing,
}

impl AuthState {
    /// Status without the payload.
    pub fn status(&self) -> AuthStatus {
        match self {
            AuthState::Unauthenticated => AuthStatus::Unauthenticated,
            AuthState::Authenticated(_) => AuthStatus::Authenticated,
            AuthState::Expired(_) => AuthStatus::Expired,
            AuthState::Refreshing => AuthStatus::Refreshing,
        }
    }
}

/// Account information returned by the `about` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct About {
    #[serde(default)]
    pub user: Option<AboutUser>,
}

/// User section of [`About`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutUser {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

/// Fetch `about?fields=user` with the given record.
pub(crate) async fn fetch_about(
    http: &reqwest::Client,
    api_base: &str,
    record: &CredentialRecord,
    timeout: std::time::Duration,
) -> Result<About> {
    let response = http
        .get(format!("{}/about", api_base))
        .headers(record.headers()?)
        .query(&record.api_key_params())
        .query(&[("fields", "user")])
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::Network(format!("Failed to reach about endpoint: {}", e)))?;

    let status = response.status();
    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse about response: {}", e)))
    } else if status == reqwest::StatusCode::UNAUTHORIZED {
        Err(Error::Authentication("Invalid or expired token".to_string()))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(Error::Network(format!("About request failed: {} - {}", status, body)))
    }
}

/// Exchange the record's refresh token for a new access token.
///
/// # Preconditions
/// - `record.is_refreshable()`
///
/// # Errors
/// - Record is missing refresh token or client credentials
/// - Token endpoint rejects the exchange or is unreachable
pub(crate) async fn refresh_record(record: &CredentialRecord) -> Result<RefreshedToken> {
    use oauth2::reqwest::async_http_client;

    let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
        record.refresh_token.as_ref(),
        record.client_id.as_ref(),
        record.client_secret.as_ref(),
    ) else {
        return Err(Error::Authentication(
            "Missing refresh_token, client_id or client_secret for refresh".to_string(),
        ));
    };

    let client = BasicClient::new(
        ClientId::new(client_id.clone()),
        Some(ClientSecret::new(client_secret.expose().to_string())),
        AuthUrl::new(GOOGLE_AUTH_URL.to_string())
            .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
        Some(
            TokenUrl::new(record.token_uri().to_string())
                .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
        ),
    )
    .set_auth_type(AuthType::RequestBody);

    let token_result = client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
        .request_async(async_http_client)
        .await
        .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

    let expires_in = token_result
        .expires_in()
        .and_then(|d| Duration::from_std(d).ok())
        .unwrap_or_else(|| Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

    let scopes: BTreeSet<String> = token_result
        .scopes()
        .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default();

    Ok(RefreshedToken {
        access_token: Secret::new(token_result.access_token().secret().clone()),
        refresh_token: token_result
            .refresh_token()
            .map(|t| Secret::new(t.secret().clone())),
        expires_at: Utc::now() + expires_in,
        scopes,
    })
}

/// Produces the live credential for every Drive request.
///
/// Built with [`AuthManager::connect`], which loads the token store, probes
/// it, falls back to the credentials file, and persists whatever ends up live.
pub struct AuthManager {
    http: reqwest::Client,
    api_base: String,
    probe_timeout: std::time::Duration,
    token_store: CredentialFile,
    credentials: CredentialFile,
    state: RwLock<AuthState>,
}

impl AuthManager {
    /// Authenticate using the files named in `config`.
    ///
    /// Never fails: if no usable credential is found the manager is left
    /// `Unauthenticated` and [`AuthManager::current`] reports it.
    pub async fn connect(config: &ClientConfig, http: reqwest::Client) -> Self {
        let manager = Self {
            http,
            api_base: config.api_base.clone(),
            probe_timeout: config.probe_timeout(),
            token_store: CredentialFile::new(config.token_path()),
            credentials: CredentialFile::new(config.credentials_path()),
            state: RwLock::new(AuthState::Unauthenticated),
        };

        let established = manager.establish().await;
        *manager.state.write().await = established;
        manager
    }

    /// Current state snapshot.
    pub async fn state(&self) -> AuthState {
        self.state.read().await.clone()
    }

    /// Current status without the credential payload.
    pub async fn status(&self) -> AuthStatus {
        self.state.read().await.status()
    }

    /// Whether a live credential is held.
    pub async fn is_authenticated(&self) -> bool {
        self.status().await == AuthStatus::Authenticated
    }

    /// Get the live credential, refreshing once if its expiry has passed.
    ///
    /// # Errors
    /// - No usable credential (`Unauthenticated`)
    /// - Refresh was needed and failed
    pub async fn current(&self) -> Result<CredentialRecord> {
        {
            let state = self.state.read().await;
            match &*state {
                AuthState::Authenticated(record) if !needs_refresh(record) => {
                    return Ok(record.clone());
                }
                AuthState::Unauthenticated => return Err(unauthenticated()),
                _ => {}
            }
        }

        let mut state = self.state.write().await;

        // Re-check after acquiring the write lock
        match std::mem::replace(&mut *state, AuthState::Refreshing) {
            AuthState::Authenticated(record) if !needs_refresh(&record) => {
                *state = AuthState::Authenticated(record.clone());
                Ok(record)
            }
            AuthState::Authenticated(record) | AuthState::Expired(record) => {
                info!("Refreshing expired access token");
                self.refresh_into(&mut state, record).await
            }
            AuthState::Refreshing | AuthState::Unauthenticated => {
                *state = AuthState::Unauthenticated;
                Err(unauthenticated())
            }
        }
    }

    /// Report that the remote rejected the live credential (HTTP 401).
    ///
    /// The credential moves to `Expired`; a refreshable one is refreshed once,
    /// anything else drops to `Unauthenticated`.
    pub async fn mark_rejected(&self) {
        let mut state = self.state.write().await;

        let record = match std::mem::replace(&mut *state, AuthState::Refreshing) {
            AuthState::Authenticated(record) | AuthState::Expired(record) => record,
            other => {
                *state = other;
                return;
            }
        };

        if record.is_refreshable() {
            warn!("Access token rejected, attempting refresh");
            if let Err(e) = self.refresh_into(&mut state, record).await {
                error!("Refresh after rejection failed: {}", e);
            }
        } else {
            warn!("Access token rejected and cannot be refreshed");
            *state = AuthState::Unauthenticated;
        }
    }

    /// Run the load/probe/fallback sequence and return the resulting state.
    async fn establish(&self) -> AuthState {
        match self.token_store.load().await {
            Ok(Some(record)) if record.is_usable() => {
                if self.probe(&record).await {
                    info!("Loaded existing token");
                    return AuthState::Authenticated(record);
                }

                info!("Stored token is no longer valid");
                if record.is_refreshable() {
                    match self.refresh(record).await {
                        Ok(record) => return AuthState::Authenticated(record),
                        Err(e) => warn!("Error refreshing stored token: {}", e),
                    }
                }
            }
            Ok(Some(_)) => debug!("Token store has no access token"),
            Ok(None) => debug!("No token store at {}", self.token_store.path().display()),
            Err(e) => warn!("Error loading token: {}", e),
        }

        match self.credentials.load().await {
            Ok(Some(record)) if record.is_usable() => {
                self.persist(&record).await;
                AuthState::Authenticated(record)
            }
            Ok(Some(_)) => {
                error!(
                    "Credentials file {} has no access_token",
                    self.credentials.path().display()
                );
                AuthState::Unauthenticated
            }
            Ok(None) => {
                error!(
                    "Credentials file not found: {}",
                    self.credentials.path().display()
                );
                AuthState::Unauthenticated
            }
            Err(e) => {
                error!("Error loading credentials: {}", e);
                AuthState::Unauthenticated
            }
        }
    }

    /// Lightweight validity check. Any failure counts as invalid.
    async fn probe(&self, record: &CredentialRecord) -> bool {
        match fetch_about(&self.http, &self.api_base, record, self.probe_timeout).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Token probe failed: {}", e);
                false
            }
        }
    }

    /// Refresh `record` and persist the result.
    async fn refresh(&self, mut record: CredentialRecord) -> Result<CredentialRecord> {
        let refreshed = refresh_record(&record).await?;
        record.apply_refresh(refreshed);
        self.persist(&record).await;
        info!("Token refreshed successfully");
        Ok(record)
    }

    /// Refresh while holding the state lock, leaving the state at the outcome.
    async fn refresh_into(
        &self,
        state: &mut AuthState,
        record: CredentialRecord,
    ) -> Result<CredentialRecord> {
        if !record.is_refreshable() {
            // Past expiry but nothing to refresh with: let the server decide.
            *state = AuthState::Authenticated(record.clone());
            return Ok(record);
        }

        *state = AuthState::Refreshing;
        match self.refresh(record).await {
            Ok(record) => {
                *state = AuthState::Authenticated(record.clone());
                Ok(record)
            }
            Err(e) => {
                *state = AuthState::Unauthenticated;
                Err(e)
            }
        }
    }

    /// Write the record to the token store. Failures are logged only.
    async fn persist(&self, record: &CredentialRecord) {
        match self.token_store.save(record).await {
            Ok(()) => info!("Saved new token"),
            Err(e) => warn!("Error saving token: {}", e),
        }
    }
}

fn needs_refresh(record: &CredentialRecord) -> bool {
    record.is_refreshable() && record.is_expired_at(Utc::now())
}

fn unauthenticated() -> Error {
    Error::Authentication("Authentication failed - no usable credentials".to_string())
}
