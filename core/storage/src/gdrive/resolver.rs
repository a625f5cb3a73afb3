//! Folder name to id resolution.

use tracing::{debug, info};

use pdvbackup_common::{DriveId, Result};

use super::client::DriveClient;

/// Resolves top-level folder names to Drive ids.
///
/// Folder names are not unique remotely; the first match returned by the
/// search wins.
pub struct FolderResolver<'a> {
    client: &'a DriveClient,
}

impl<'a> FolderResolver<'a> {
    pub fn new(client: &'a DriveClient) -> Self {
        Self { client }
    }

    /// Look up a folder without creating it.
    pub async fn lookup(&self, name: &str) -> Result<Option<DriveId>> {
        match self.client.find_folder(name).await? {
            Some(folder) => {
                debug!("Resolved folder '{}' to {}", name, folder.id);
                Ok(Some(folder.drive_id()?))
            }
            None => Ok(None),
        }
    }

    /// Look up a folder, creating it when absent.
    pub async fn resolve_or_create(&self, name: &str) -> Result<DriveId> {
        if let Some(id) = self.lookup(name).await? {
            return Ok(id);
        }

        let folder = self.client.create_folder(name).await?;
        info!("Created folder '{}' with ID: {}", name, folder.id);
        folder.drive_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::gdrive::auth::AuthManager;
    use pdvbackup_common::Error;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(dir: &TempDir, server: &MockServer) -> DriveClient {
        tokio::fs::write(
            dir.path().join("credentials.json"),
            r#"{"access_token": "live"}"#,
        )
        .await
        .unwrap();

        let config = ClientConfig::new(dir.path()).with_server(&server.uri());
        let http = reqwest::Client::new();
        let auth = AuthManager::connect(&config, http.clone()).await;
        DriveClient::new(&config, http, Arc::new(auth))
    }

    #[tokio::test]
    async fn test_existing_folder_is_not_recreated() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                "name='Backups' and mimeType='application/vnd.google-apps.folder' and trashed=false",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": "F1", "name": "Backups"}, {"id": "F2", "name": "Backups"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&dir, &server).await;
        let resolver = FolderResolver::new(&client);

        let first = resolver.resolve_or_create("Backups").await.unwrap();
        let second = resolver.resolve_or_create("Backups").await.unwrap();
        assert_eq!(first.as_str(), "F1");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_folder_is_created() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []})),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(body_json(serde_json::json!({
                "name": "backup",
                "mimeType": "application/vnd.google-apps.folder"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "NEW", "name": "backup"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&dir, &server).await;
        let id = FolderResolver::new(&client)
            .resolve_or_create("backup")
            .await
            .unwrap();
        assert_eq!(id.as_str(), "NEW");
    }

    #[tokio::test]
    async fn test_lookup_never_creates() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []})),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&dir, &server).await;
        assert!(FolderResolver::new(&client)
            .lookup("nope")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_an_error() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&dir, &server).await;
        let result = FolderResolver::new(&client).resolve_or_create("backup").await;
        assert!(matches!(result, Err(Error::Network(msg)) if msg.contains("500")));
    }
}
