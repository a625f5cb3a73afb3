//! Drive v3 API client.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::debug;

use pdvbackup_common::{DriveId, Error, Result};

use super::auth::{fetch_about, About, AuthManager};
use super::query::{Query, FOLDER_MIME_TYPE};
use crate::config::ClientConfig;
use crate::progress::{Progress, ProgressTracker};

/// Download buffer size.
const CHUNK_SIZE: usize = 8192;

/// Fields requested for folder lookups.
const FOLDER_FIELDS: &str = "nextPageToken,files(id,name)";
/// Fields requested for file lookups.
const ENTRY_FIELDS: &str = "nextPageToken,files(id,name,size)";
/// Fields requested for folder listings.
const LISTING_FIELDS: &str = "nextPageToken,files(id,name,size,modifiedTime)";
/// Fields requested for single-object responses.
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents";

/// Drive file metadata from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    #[serde(default)]
    pub name: String,
    /// MIME type (absent when not requested).
    #[serde(default)]
    pub mime_type: String,
    /// Size in bytes as a decimal string (files only).
    #[serde(default)]
    pub size: Option<String>,
    /// Modified time.
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    /// Parent folder IDs.
    #[serde(default)]
    pub parents: Vec<String>,
}

impl DriveFile {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }

    /// Typed id.
    pub fn drive_id(&self) -> Result<DriveId> {
        DriveId::new(self.id.clone())
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Drive API client.
///
/// Every request is authorized with the live credential from the
/// [`AuthManager`]; a `401` is reported back to it so the next request can
/// use a refreshed token.
pub struct DriveClient {
    http: Client,
    auth: Arc<AuthManager>,
    api_base: String,
    upload_base: String,
    request_timeout: Duration,
    transfer_timeout: Duration,
    probe_timeout: Duration,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(config: &ClientConfig, http: Client, auth: Arc<AuthManager>) -> Self {
        Self {
            http,
            auth,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
            transfer_timeout: config.transfer_timeout(),
            probe_timeout: config.probe_timeout(),
        }
    }

    /// The authentication manager backing this client.
    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    /// Attach the live credential to a request.
    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let record = self.auth.current().await?;
        Ok(request
            .headers(record.headers()?)
            .query(&record.api_key_params()))
    }

    /// Account information for the live credential.
    pub async fn about(&self) -> Result<About> {
        let record = self.auth.current().await?;
        let result = fetch_about(&self.http, &self.api_base, &record, self.probe_timeout).await;
        if let Err(Error::Authentication(_)) = &result {
            self.auth.mark_rejected().await;
        }
        result
    }

    /// Run a search, following page tokens.
    pub async fn search(
        &self,
        query: &Query,
        fields: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<DriveFile>> {
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let url = format!("{}/files", self.api_base);
            let mut request = self
                .authorized(self.http.get(&url))
                .await?
                .query(&[("q", query.as_str()), ("fields", fields)])
                .timeout(self.request_timeout);

            if let Some(order_by) = order_by {
                request = request.query(&[("orderBy", order_by)]);
            }
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::Network(format!("Failed to search files: {}", e)))?;

            let list_response: FileListResponse = self.handle_response(response).await?;
            all_files.extend(list_response.files);

            match list_response.next_page_token {
                Some(token) if !seen_tokens.insert(token.clone()) => {
                    return Err(Error::Network(format!(
                        "Server repeated page token '{}' while searching",
                        token
                    )));
                }
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_files)
    }

    /// Find a folder by name. First match wins.
    pub async fn find_folder(&self, name: &str) -> Result<Option<DriveFile>> {
        let files = self.search(&Query::folder_named(name), FOLDER_FIELDS, None).await?;
        Ok(files.into_iter().next())
    }

    /// Find a file by name inside a folder. First match wins.
    pub async fn find_file(&self, parent: &DriveId, name: &str) -> Result<Option<DriveFile>> {
        let files = self.search(&Query::child_named(parent, name), ENTRY_FIELDS, None).await?;
        Ok(files.into_iter().next())
    }

    /// List a folder's non-trashed children, most recently modified first.
    pub async fn list_folder(&self, parent: &DriveId) -> Result<Vec<DriveFile>> {
        self.search(
            &Query::children_of(parent),
            LISTING_FIELDS,
            Some("modifiedTime desc"),
        )
        .await
    }

    /// Create a folder.
    pub async fn create_folder(&self, name: &str) -> Result<DriveFile> {
        let url = format!("{}/files", self.api_base);

        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE
        });

        let response = self
            .authorized(self.http.post(&url))
            .await?
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create folder: {}", e)))?;

        self.handle_response(response).await
    }

    /// Create a file in `parent` with a single multipart request.
    pub async fn upload_multipart(
        &self,
        name: &str,
        parent: &DriveId,
        data: Bytes,
    ) -> Result<DriveFile> {
        let url = format!("{}/files", self.upload_base);

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent.as_str()]
        });
        let metadata_json = serde_json::to_string(&metadata)?;

        let boundary = format!("pdvbackup-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata_json, &data);

        let response = self
            .authorized(self.http.post(&url))
            .await?
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .timeout(self.transfer_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload file: {}", e)))?;

        self.handle_response(response).await
    }

    /// Replace the content of an existing file.
    pub async fn update_content(&self, file: &DriveId, data: Bytes) -> Result<DriveFile> {
        let url = format!("{}/files/{}", self.upload_base, file);

        let response = self
            .authorized(self.http.patch(&url))
            .await?
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .timeout(self.transfer_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to update file: {}", e)))?;

        self.handle_response(response).await
    }

    /// Stream a file's content to `dest`, truncating whatever is there.
    ///
    /// `size` is the remote size if known; it only drives progress reporting.
    /// On a mid-stream failure the partially written file is left in place.
    ///
    /// Returns the number of bytes written.
    pub async fn download_to(
        &self,
        file: &DriveId,
        size: Option<u64>,
        dest: &Path,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<u64> {
        let url = format!("{}/files/{}", self.api_base, file);

        let response = self
            .authorized(self.http.get(&url))
            .await?
            .query(&[("alt", "media")])
            .timeout(self.transfer_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to start download: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.auth.mark_rejected().await;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Network(format!(
                "Download failed: {} - {}",
                status, body
            )));
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = Box::pin(StreamReader::new(stream));
        let mut out = tokio::fs::File::create(dest).await?;

        let mut tracker = ProgressTracker::new(size);
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| Error::Network(format!("Stream read error: {}", e)))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await?;

            if let Some(progress) = tracker.advance(n) {
                debug!(?progress, "download progress");
                on_progress(progress);
            }
        }

        out.flush().await?;
        if let Some(progress) = tracker.finish() {
            on_progress(progress);
        }

        Ok(tracker.written())
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound("Resource not found".to_string()))
        } else if status == StatusCode::UNAUTHORIZED {
            self.auth.mark_rejected().await;
            Err(Error::Authentication(
                "Invalid or expired token".to_string(),
            ))
        } else if status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            Err(Error::PermissionDenied(format!("Access denied - {}", body)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Network(format!("API error: {} - {}", status, body)))
        }
    }
}

/// Assemble a `multipart/related` body: JSON metadata part, then the raw bytes.
fn multipart_related(boundary: &str, metadata_json: &str, data: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(data.len() + metadata_json.len() + 256);

    // Metadata part
    body.put_slice(format!("--{}\r\n", boundary).as_bytes());
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(metadata_json.as_bytes());
    body.put_slice(b"\r\n");

    // Data part
    body.put_slice(format!("--{}\r\n", boundary).as_bytes());
    body.put_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.put_slice(data);
    body.put_slice(b"\r\n");

    // End boundary
    body.put_slice(format!("--{}--", boundary).as_bytes());
    body.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_file(mime_type: &str, size: Option<&str>) -> DriveFile {
        DriveFile {
            id: "1".to_string(),
            name: "entry".to_string(),
            mime_type: mime_type.to_string(),
            size: size.map(String::from),
            modified_time: None,
            parents: vec![],
        }
    }

    #[test]
    fn test_drive_file_is_folder() {
        assert!(drive_file(FOLDER_MIME_TYPE, None).is_folder());
        assert!(!drive_file("application/x-sqlite3", Some("10")).is_folder());
    }

    #[test]
    fn test_drive_file_size_bytes() {
        assert_eq!(drive_file("text/plain", Some("12345")).size_bytes(), Some(12345));
        assert_eq!(drive_file(FOLDER_MIME_TYPE, None).size_bytes(), None);
        assert_eq!(drive_file("text/plain", Some("n/a")).size_bytes(), None);
    }

    #[test]
    fn test_drive_file_minimal_fields() {
        let file: DriveFile = serde_json::from_str(r#"{"id": "abc", "name": "backup"}"#).unwrap();
        assert_eq!(file.id, "abc");
        assert!(file.mime_type.is_empty());
        assert!(file.modified_time.is_none());
    }

    #[test]
    fn test_multipart_layout() {
        let body = multipart_related("B", r#"{"name":"x"}"#, b"TESTDATA12");
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert_eq!(
            text,
            "--B\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"x\"}\r\n\
             --B\r\nContent-Type: application/octet-stream\r\n\r\nTESTDATA12\r\n--B--"
        );
    }

    #[tokio::test]
    async fn test_repeated_page_token_stops_search() {
        use tempfile::TempDir;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        tokio::fs::write(dir.path().join("credentials.json"), r#"{"access_token": "live"}"#)
            .await
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": "A", "name": "a.sqlite"}],
                "nextPageToken": "same"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let config = ClientConfig::new(dir.path()).with_server(&server.uri());
        let http = Client::new();
        let auth = AuthManager::connect(&config, http.clone()).await;
        let client = DriveClient::new(&config, http, Arc::new(auth));

        let parent = DriveId::new("F1").unwrap();
        let result = client.list_folder(&parent).await;
        assert!(matches!(result, Err(Error::Network(msg)) if msg.contains("same")));
    }
}
