//! Google Drive backend (Drive API v3).
//!
//! Folders and files are looked up by exact name under a parent. Payloads up to
//! the configured chunk size go up in one multipart request; larger ones use a
//! resumable session with `Content-Range` PUTs, where `308` means "send the
//! next chunk". Files reached a second time are linked with shortcuts.
//!
//! All HTTP goes through [`DriveApi`], so the backend logic can be exercised
//! against a scripted Drive in tests. [`HttpDriveApi`] is the real one.

use std::io::SeekFrom;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

use super::sanitize_filename;
use crate::config::PerformanceOptions;
use crate::contract::{Content, ExistingOutputMetadata, FolderRef, Method, PlacedItem, StorageBackend};
use crate::error::{StorageError, TransportError};
use crate::timestamp::parse_timestamp;
use crate::transport::{retry_with_backoff, Attempt, RetryPolicy};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
pub const SHORTCUT_MIME: &str = "application/vnd.google-apps.shortcut";
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime";

/// Drive file resource, reduced to what the mirror reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Decimal string; absent for folders and native documents.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
}

impl DriveFile {
    fn metadata(&self) -> Result<ExistingOutputMetadata, StorageError> {
        let modified_at = self
            .modified_time
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or_else(|| StorageError::Parse(format!("no modifiedTime on '{}'", self.name)))?;
        Ok(ExistingOutputMetadata {
            size: self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
            modified_at,
            handle: Some(self.id.clone()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilesListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriveBody {
    Empty,
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// One Drive request, described as data.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: DriveBody,
}

impl DriveRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: DriveBody::Empty,
        }
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = DriveBody::Json(value);
        self
    }

    pub fn bytes(mut self, data: Vec<u8>) -> Self {
        self.body = DriveBody::Bytes(data);
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A `2xx` or `308` response; anything else comes back as an error.
#[derive(Debug, Clone, Default)]
pub struct DriveResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl DriveResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        serde_json::from_slice(&self.body).map_err(|e| StorageError::Parse(e.to_string()))
    }
}

/// The HTTP seam under [`DriveBackend`]. Retries happen behind it.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn send(&self, request: DriveRequest) -> Result<DriveResponse, StorageError>;
}

/// [`DriveApi`] over reqwest with bearer auth and the shared retry policy.
pub struct HttpDriveApi {
    client: reqwest::Client,
    access_token: String,
    policy: RetryPolicy,
}

impl HttpDriveApi {
    /// `client` is the transport's shared pool.
    pub fn new(client: reqwest::Client, access_token: &str, options: &PerformanceOptions) -> Self {
        Self {
            client,
            access_token: access_token.to_string(),
            policy: RetryPolicy::from_options(options),
        }
    }

    fn build(&self, request: &DriveRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .bearer_auth(&self.access_token)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match &request.body {
            DriveBody::Empty => builder,
            DriveBody::Json(value) => builder.json(value),
            DriveBody::Bytes(data) => builder.body(data.clone()),
        }
    }

    async fn send_once(&self, request: &DriveRequest) -> Result<DriveResponse, TransportError> {
        let resp = self.build(request).send().await?;
        let status = resp.status().as_u16();
        if !(resp.status().is_success() || status == 308) {
            let url = resp.url().to_string();
            let message = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status,
                url,
                message,
            });
        }
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = resp.bytes().await?;
        Ok(DriveResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl DriveApi for HttpDriveApi {
    async fn send(&self, request: DriveRequest) -> Result<DriveResponse, StorageError> {
        let result = retry_with_backoff(&self.policy, |_| {
            let request = &request;
            async move { Attempt::from_result(self.send_once(request).await) }
        })
        .await;
        result.map_err(|e| match e {
            TransportError::Status {
                status, message, ..
            } => StorageError::Api { status, message },
            other => StorageError::Transport(other),
        })
    }
}

/// Quote a value for a Drive `q` expression.
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn child_query(parent_id: &str, name: &str, folder: bool) -> String {
    let kind = if folder {
        format!("mimeType = '{FOLDER_MIME}'")
    } else {
        format!("mimeType != '{FOLDER_MIME}'")
    };
    format!(
        "name = '{}' and '{}' in parents and {} and trashed = false",
        escape_query_value(name),
        escape_query_value(parent_id),
        kind
    )
}

/// `multipart/related` body: JSON metadata part, then the media part.
pub fn multipart_body(boundary: &str, metadata: &serde_json::Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// `Content-Range` value for bytes `start..=end` of `total`.
pub fn content_range(start: u64, end: u64, total: u64) -> String {
    if total == 0 {
        "bytes */0".to_string()
    } else {
        format!("bytes {start}-{end}/{total}")
    }
}

/// Last committed byte from a `Range: bytes=0-N` header.
pub fn committed_through(range: &str) -> Option<u64> {
    range
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split('-').nth(1))
        .and_then(|end| end.trim().parse().ok())
}

fn drive_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn read_range(content: Content<'_>, start: u64, len: usize) -> Result<Vec<u8>, StorageError> {
    match content {
        Content::Bytes(bytes) => {
            let start = start as usize;
            Ok(bytes[start..(start + len).min(bytes.len())].to_vec())
        }
        Content::Staged(path) => {
            let mut file = tokio::fs::File::open(path)
                .await
                .map_err(|e| StorageError::io(path, e))?;
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| StorageError::io(path, e))?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)
                .await
                .map_err(|e| StorageError::io(path, e))?;
            Ok(buf)
        }
    }
}

async fn content_len(content: Content<'_>) -> Result<u64, StorageError> {
    match content {
        Content::Bytes(bytes) => Ok(bytes.len() as u64),
        Content::Staged(path) => tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .map_err(|e| StorageError::io(path, e)),
    }
}

pub struct DriveBackend<A: DriveApi = HttpDriveApi> {
    api: A,
    root_folder_name: String,
    chunk_size: u64,
    /// Non-advancing `308`s tolerated per resumable upload.
    stall_limit: u32,
}

impl DriveBackend<HttpDriveApi> {
    /// `client` is the transport's shared pool.
    pub fn new(
        client: reqwest::Client,
        access_token: &str,
        root_folder_name: &str,
        options: &PerformanceOptions,
    ) -> Self {
        Self::with_api(HttpDriveApi::new(client, access_token, options), root_folder_name, options)
    }
}

impl<A: DriveApi> DriveBackend<A> {
    pub fn with_api(api: A, root_folder_name: &str, options: &PerformanceOptions) -> Self {
        Self {
            api,
            root_folder_name: root_folder_name.to_string(),
            chunk_size: options.upload_chunk_bytes(),
            stall_limit: options.max_retries,
        }
    }

    async fn find_child(
        &self,
        parent_id: &str,
        name: &str,
        folder: bool,
    ) -> Result<Option<DriveFile>, StorageError> {
        let request = DriveRequest::new(Method::GET, format!("{DRIVE_API_BASE}/files"))
            .query("q", &child_query(parent_id, name, folder))
            .query("fields", &format!("files({FILE_FIELDS})"))
            .query("spaces", "drive")
            .query("pageSize", "100");
        let list: FilesListResponse = self.api.send(request).await?.json()?;
        // The query match is not reliably case-sensitive.
        Ok(list.files.into_iter().find(|f| f.name == name))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveFile, StorageError> {
        let request = DriveRequest::new(Method::POST, format!("{DRIVE_API_BASE}/files"))
            .query("fields", FILE_FIELDS)
            .json(json!({ "name": name, "mimeType": FOLDER_MIME, "parents": [parent_id] }));
        let created: DriveFile = self.api.send(request).await?.json()?;
        info!(folder = name, id = %created.id, "Created Drive folder");
        Ok(created)
    }

    async fn folder(&self, parent_id: &str, name: &str) -> Result<DriveFile, StorageError> {
        match self.find_child(parent_id, name, true).await? {
            Some(existing) => Ok(existing),
            None => self.create_folder(parent_id, name).await,
        }
    }

    fn upload_request(existing_id: Option<&str>) -> DriveRequest {
        match existing_id {
            Some(id) => DriveRequest::new(Method::PATCH, format!("{DRIVE_UPLOAD_BASE}/files/{id}")),
            None => DriveRequest::new(Method::POST, format!("{DRIVE_UPLOAD_BASE}/files")),
        }
    }

    async fn upload_multipart(
        &self,
        existing_id: Option<&str>,
        metadata: &serde_json::Value,
        content: Content<'_>,
        total: u64,
    ) -> Result<DriveFile, StorageError> {
        let data = read_range(content, 0, total as usize).await?;
        let boundary = format!("course-mirror-{}", uuid::Uuid::new_v4().simple());
        let request = Self::upload_request(existing_id)
            .query("uploadType", "multipart")
            .query("fields", FILE_FIELDS)
            .header("Content-Type", &format!("multipart/related; boundary={boundary}"))
            .bytes(multipart_body(&boundary, metadata, &data));
        self.api.send(request).await?.json()
    }

    async fn upload_resumable(
        &self,
        filename: &str,
        existing_id: Option<&str>,
        metadata: &serde_json::Value,
        content: Content<'_>,
        total: u64,
    ) -> Result<DriveFile, StorageError> {
        let init = Self::upload_request(existing_id)
            .query("uploadType", "resumable")
            .query("fields", FILE_FIELDS)
            .header("X-Upload-Content-Type", "application/octet-stream")
            .header("X-Upload-Content-Length", &total.to_string())
            .json(metadata.clone());
        let session = self
            .api
            .send(init)
            .await?
            .header("Location")
            .map(str::to_string)
            .ok_or_else(|| StorageError::Upload {
                filename: filename.to_string(),
                message: "no session location returned".to_string(),
            })?;

        let mut offset = 0u64;
        let mut stalls = 0u32;
        loop {
            let end = (offset + self.chunk_size).min(total) - 1;
            let chunk = read_range(content, offset, (end - offset + 1) as usize).await?;
            let range = content_range(offset, end, total);
            debug!(filename, range = %range, "Uploading chunk");
            let put = DriveRequest::new(Method::PUT, session.as_str())
                .header("Content-Range", &range)
                .header("Content-Length", &chunk.len().to_string())
                .bytes(chunk);
            let resp = self.api.send(put).await?;
            if resp.status != 308 {
                return resp.json();
            }
            let next = resp
                .header("Range")
                .and_then(committed_through)
                .map(|last| last + 1)
                .unwrap_or(0);
            if next <= offset {
                stalls += 1;
                warn!(filename, offset, next, "Upload session did not advance");
                if stalls > self.stall_limit {
                    return Err(StorageError::Upload {
                        filename: filename.to_string(),
                        message: format!("no progress past byte {offset}"),
                    });
                }
            }
            if next >= total {
                return Err(StorageError::Upload {
                    filename: filename.to_string(),
                    message: "session reported complete without returning the file".to_string(),
                });
            }
            offset = next;
        }
    }
}

#[async_trait]
impl<A: DriveApi> StorageBackend for DriveBackend<A> {
    async fn root(&self) -> Result<FolderRef, StorageError> {
        let folder = self.folder("root", &self.root_folder_name).await?;
        info!(root = %self.root_folder_name, id = %folder.id, "Using Drive storage root");
        Ok(FolderRef {
            id: folder.id,
            label: String::new(),
        })
    }

    async fn ensure_folder(&self, parent: &FolderRef, name: &str) -> Result<FolderRef, StorageError> {
        let name = sanitize_filename(name);
        let folder = self.folder(&parent.id, &name).await?;
        Ok(FolderRef {
            id: folder.id,
            label: parent.child_label(&name),
        })
    }

    async fn existing_metadata(
        &self,
        folder: &FolderRef,
        filename: &str,
    ) -> Result<Option<ExistingOutputMetadata>, StorageError> {
        let name = sanitize_filename(filename);
        match self.find_child(&folder.id, &name, false).await? {
            Some(file) if file.mime_type.as_deref() != Some(SHORTCUT_MIME) => {
                file.metadata().map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn place<'a>(
        &self,
        folder: &FolderRef,
        filename: &str,
        content: Content<'a>,
        source_updated_at: Option<DateTime<Utc>>,
        previous: Option<&'a ExistingOutputMetadata>,
    ) -> Result<PlacedItem, StorageError> {
        let name = sanitize_filename(filename);
        let existing_id = previous.and_then(|p| p.handle.as_deref());
        let mut metadata = json!({ "name": name });
        if existing_id.is_none() {
            metadata["parents"] = json!([folder.id]);
        }
        if let Some(at) = source_updated_at {
            metadata["modifiedTime"] = json!(drive_time(at));
        }

        let total = content_len(content).await?;
        let uploaded = if total <= self.chunk_size {
            self.upload_multipart(existing_id, &metadata, content, total).await?
        } else {
            self.upload_resumable(&name, existing_id, &metadata, content, total).await?
        };
        info!(
            file = %name,
            id = %uploaded.id,
            bytes = total,
            updated = existing_id.is_some(),
            "Uploaded to Drive"
        );
        Ok(PlacedItem {
            folder: folder.clone(),
            filename: name,
            handle: Some(uploaded.id),
        })
    }

    async fn read(&self, folder: &FolderRef, filename: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let name = sanitize_filename(filename);
        let Some(file) = self.find_child(&folder.id, &name, false).await? else {
            return Ok(None);
        };
        let request = DriveRequest::new(Method::GET, format!("{DRIVE_API_BASE}/files/{}", file.id))
            .query("alt", "media");
        let resp = self.api.send(request).await?;
        Ok(Some(resp.body.to_vec()))
    }

    fn supports_references(&self) -> bool {
        true
    }

    async fn reference(
        &self,
        folder: &FolderRef,
        filename: &str,
        target: &PlacedItem,
    ) -> Result<(), StorageError> {
        let name = sanitize_filename(filename);
        let target_id = target.handle.as_deref().ok_or_else(|| StorageError::Upload {
            filename: name.clone(),
            message: "reference target has no Drive id".to_string(),
        })?;
        if folder.id == target.folder.id && name == target.filename {
            return Ok(());
        }
        if self.find_child(&folder.id, &name, false).await?.is_some() {
            debug!(file = %name, "Shortcut already present");
            return Ok(());
        }
        let request = DriveRequest::new(Method::POST, format!("{DRIVE_API_BASE}/files"))
            .query("fields", "id")
            .json(json!({
                "name": name,
                "mimeType": SHORTCUT_MIME,
                "parents": [folder.id],
                "shortcutDetails": { "targetId": target_id },
            }));
        self.api.send(request).await?;
        info!(file = %name, target = target_id, "Created Drive shortcut");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UPLOAD_CHUNK_GRANULARITY;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<DriveRequest>>>;

    fn ok_json(body: serde_json::Value) -> Result<DriveResponse, StorageError> {
        Ok(DriveResponse {
            status: 200,
            headers: Vec::new(),
            body: Bytes::from(body.to_string()),
        })
    }

    fn resume_incomplete(range: Option<&str>) -> Result<DriveResponse, StorageError> {
        Ok(DriveResponse {
            status: 308,
            headers: range
                .map(|r| vec![("range".to_string(), r.to_string())])
                .unwrap_or_default(),
            body: Bytes::new(),
        })
    }

    /// A Drive holding `folders` as `(parent, id, name)`. Listing ignores
    /// case, like the real query does; folder creation appends to the store.
    fn scripted_drive(folders: Vec<(&str, &str, &str)>, log: Log) -> MockDriveApi {
        let store: Arc<Mutex<Vec<(String, String, String)>>> = Arc::new(Mutex::new(
            folders
                .into_iter()
                .map(|(p, i, n)| (p.to_string(), i.to_string(), n.to_string()))
                .collect(),
        ));
        let mut api = MockDriveApi::new();
        api.expect_send().returning(move |request: DriveRequest| {
            log.lock().unwrap().push(request.clone());
            let mut store = store.lock().unwrap();
            match (request.method.clone(), request.url.as_str()) {
                (Method::GET, url) if url.ends_with("/files") => {
                    let q = request.query_value("q").unwrap_or_default().to_lowercase();
                    let files: Vec<serde_json::Value> = store
                        .iter()
                        .filter(|(parent, _, name)| {
                            q.contains(&format!("name = '{}'", name.to_lowercase()))
                                && q.contains(&format!("'{}' in parents", parent.to_lowercase()))
                        })
                        .map(|(_, id, name)| json!({"id": id, "name": name, "mimeType": FOLDER_MIME}))
                        .collect();
                    ok_json(json!({ "files": files }))
                }
                (Method::POST, url) if url == format!("{DRIVE_API_BASE}/files") => {
                    let DriveBody::Json(body) = &request.body else {
                        panic!("folder creation sends JSON");
                    };
                    let id = format!("f{}", store.len() + 1);
                    let name = body["name"].as_str().unwrap_or_default().to_string();
                    let parent = body["parents"][0].as_str().unwrap_or_default().to_string();
                    store.push((parent, id.clone(), name.clone()));
                    ok_json(json!({"id": id, "name": name, "mimeType": FOLDER_MIME}))
                }
                (method, url) => panic!("unexpected {method} {url}"),
            }
        });
        api
    }

    fn options(max_retries: u32) -> PerformanceOptions {
        PerformanceOptions {
            max_retries,
            upload_chunk_size_mb: 0,
            ..Default::default()
        }
    }

    fn root() -> FolderRef {
        FolderRef {
            id: "r".into(),
            label: String::new(),
        }
    }

    fn posts(log: &Log) -> usize {
        log.lock().unwrap().iter().filter(|r| r.method == Method::POST).count()
    }

    #[tokio::test]
    async fn ensure_folder_is_idempotent() {
        let log: Log = Arc::default();
        let backend = DriveBackend::with_api(scripted_drive(vec![], log.clone()), "Courses", &options(3));

        let first = backend.ensure_folder(&root(), "Biology").await.unwrap();
        let second = backend.ensure_folder(&root(), "Biology").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.label, "Biology");
        assert_eq!(posts(&log), 1);
    }

    #[tokio::test]
    async fn folder_lookup_requires_the_exact_name() {
        let log: Log = Arc::default();
        let api = scripted_drive(vec![("r", "lower", "biology")], log.clone());
        let backend = DriveBackend::with_api(api, "Courses", &options(3));

        let folder = backend.ensure_folder(&root(), "Biology").await.unwrap();
        assert_ne!(folder.id, "lower");
        assert_eq!(posts(&log), 1);

        let existing = backend.ensure_folder(&root(), "biology").await.unwrap();
        assert_eq!(existing.id, "lower");
        assert_eq!(posts(&log), 1);
    }

    #[tokio::test]
    async fn place_patches_when_a_handle_exists_and_posts_otherwise() {
        let log: Log = Arc::default();
        let l = log.clone();
        let mut api = MockDriveApi::new();
        api.expect_send().returning(move |request: DriveRequest| {
            l.lock().unwrap().push(request);
            ok_json(json!({"id": "file-1", "name": "a.pdf"}))
        });
        let backend = DriveBackend::with_api(api, "Courses", &options(3));
        let folder = FolderRef {
            id: "folder-9".into(),
            label: "Bio".into(),
        };
        let previous = ExistingOutputMetadata {
            size: 3,
            modified_at: parse_timestamp("2024-01-01T00:00:00Z").unwrap(),
            handle: Some("file-1".into()),
        };

        let at = parse_timestamp("2024-11-29T12:00:00Z").unwrap();
        backend.place(&folder, "a.pdf", Content::Bytes(b"new"), Some(at), None).await.unwrap();
        backend
            .place(&folder, "a.pdf", Content::Bytes(b"newer"), None, Some(&previous))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log[0].method, Method::POST);
        assert_eq!(log[0].url, format!("{DRIVE_UPLOAD_BASE}/files"));
        assert_eq!(log[0].query_value("uploadType"), Some("multipart"));
        let DriveBody::Bytes(body) = &log[0].body else {
            panic!("multipart body expected");
        };
        let body = String::from_utf8_lossy(body);
        assert!(body.contains(r#""parents":["folder-9"]"#));
        assert!(body.contains(r#""modifiedTime":"2024-11-29T12:00:00.000Z""#));

        assert_eq!(log[1].method, Method::PATCH);
        assert_eq!(log[1].url, format!("{DRIVE_UPLOAD_BASE}/files/file-1"));
        let DriveBody::Bytes(body) = &log[1].body else {
            panic!("multipart body expected");
        };
        assert!(!String::from_utf8_lossy(body).contains("parents"));
    }

    #[tokio::test]
    async fn resumable_upload_follows_the_committed_range() {
        let chunk = UPLOAD_CHUNK_GRANULARITY;
        let total = chunk * 2 + 100;
        let log: Log = Arc::default();
        let l = log.clone();
        let mut api = MockDriveApi::new();
        api.expect_send().returning(move |request: DriveRequest| {
            let mut log = l.lock().unwrap();
            log.push(request.clone());
            match request.method {
                Method::POST => Ok(DriveResponse {
                    status: 200,
                    headers: vec![("location".into(), "https://upload.example/session-1".into())],
                    body: Bytes::new(),
                }),
                // The server commits only half of the first chunk.
                Method::PUT => match log.len() {
                    2 => resume_incomplete(Some(&format!("bytes=0-{}", chunk / 2 - 1))),
                    3 => resume_incomplete(Some(&format!("bytes=0-{}", chunk / 2 + chunk - 1))),
                    _ => ok_json(json!({"id": "big", "name": "big.bin"})),
                },
                ref other => panic!("unexpected {other}"),
            }
        });
        let backend = DriveBackend::with_api(api, "Courses", &options(3));
        let data = vec![7u8; total as usize];

        let placed = backend
            .place(&root(), "big.bin", Content::Bytes(&data), None, None)
            .await
            .unwrap();
        assert_eq!(placed.handle.as_deref(), Some("big"));

        let log = log.lock().unwrap();
        assert_eq!(log[0].query_value("uploadType"), Some("resumable"));
        assert_eq!(log[0].header_value("X-Upload-Content-Length"), Some(total.to_string().as_str()));
        let ranges: Vec<&str> = log[1..]
            .iter()
            .map(|r| r.header_value("Content-Range").unwrap())
            .collect();
        let half = chunk / 2;
        assert_eq!(
            ranges,
            vec![
                format!("bytes 0-{}/{total}", chunk - 1),
                format!("bytes {half}-{}/{total}", half + chunk - 1),
                format!("bytes {}-{}/{total}", half + chunk, total - 1),
            ]
        );
        assert!(log[1..].iter().all(|r| r.url == "https://upload.example/session-1"));
    }

    #[tokio::test]
    async fn resumable_upload_gives_up_when_the_session_stalls() {
        let puts = Arc::new(Mutex::new(0u32));
        let p = puts.clone();
        let mut api = MockDriveApi::new();
        api.expect_send().returning(move |request: DriveRequest| match request.method {
            Method::POST => Ok(DriveResponse {
                status: 200,
                headers: vec![("Location".into(), "https://upload.example/s".into())],
                body: Bytes::new(),
            }),
            _ => {
                *p.lock().unwrap() += 1;
                resume_incomplete(None)
            }
        });
        let backend = DriveBackend::with_api(api, "Courses", &options(2));
        let data = vec![0u8; (UPLOAD_CHUNK_GRANULARITY + 1) as usize];

        let err = backend
            .place(&root(), "stuck.bin", Content::Bytes(&data), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Upload { .. }));
        assert_eq!(*puts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn references_create_a_shortcut_once() {
        let log: Log = Arc::default();
        let l = log.clone();
        let existing = Arc::new(Mutex::new(false));
        let e = existing.clone();
        let mut api = MockDriveApi::new();
        api.expect_send().returning(move |request: DriveRequest| {
            l.lock().unwrap().push(request.clone());
            let mut present = e.lock().unwrap();
            match request.method {
                Method::GET if *present => ok_json(json!({
                    "files": [{"id": "s1", "name": "handout.pdf", "mimeType": SHORTCUT_MIME}]
                })),
                Method::GET => ok_json(json!({ "files": [] })),
                _ => {
                    *present = true;
                    ok_json(json!({"id": "s1"}))
                }
            }
        });
        let backend = DriveBackend::with_api(api, "Courses", &options(3));
        let target = PlacedItem {
            folder: FolderRef {
                id: "assignments".into(),
                label: "Bio/Assignments".into(),
            },
            filename: "handout.pdf".into(),
            handle: Some("file-900".into()),
        };
        let folder = FolderRef {
            id: "week-1".into(),
            label: "Bio/Week 1".into(),
        };

        backend.reference(&folder, "handout.pdf", &target).await.unwrap();
        backend.reference(&folder, "handout.pdf", &target).await.unwrap();

        let log = log.lock().unwrap();
        let shortcuts: Vec<&DriveRequest> = log.iter().filter(|r| r.method == Method::POST).collect();
        assert_eq!(shortcuts.len(), 1);
        let DriveBody::Json(body) = &shortcuts[0].body else {
            panic!("shortcut metadata is JSON");
        };
        assert_eq!(body["mimeType"], SHORTCUT_MIME);
        assert_eq!(body["shortcutDetails"]["targetId"], "file-900");
        assert_eq!(body["parents"][0], "week-1");
        // Shortcuts never count as existing output.
        drop(log);
        assert!(backend.existing_metadata(&folder, "handout.pdf").await.unwrap().is_none());
    }

    #[test]
    fn query_values_are_escaped() {
        assert_eq!(escape_query_value(r"O'Brien\notes"), r"O\'Brien\\notes");
        let q = child_query("abc", "Week 1's", true);
        assert_eq!(
            q,
            "name = 'Week 1\\'s' and 'abc' in parents and mimeType = 'application/vnd.google-apps.folder' and trashed = false"
        );
        assert!(child_query("abc", "x", false).contains("mimeType != "));
    }

    #[test]
    fn multipart_body_has_both_parts_and_a_terminator() {
        let body = multipart_body("b0", &json!({"name": "a.pdf"}), b"PDFDATA");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b0\r\nContent-Type: application/json"));
        assert!(text.contains(r#"{"name":"a.pdf"}"#));
        assert!(text.contains("application/octet-stream\r\n\r\nPDFDATA\r\n"));
        assert!(text.ends_with("--b0--\r\n"));
    }

    #[test]
    fn content_ranges_and_progress_headers() {
        assert_eq!(content_range(0, 262143, 600000), "bytes 0-262143/600000");
        assert_eq!(content_range(0, 0, 0), "bytes */0");
        assert_eq!(committed_through("bytes=0-262143"), Some(262143));
        assert_eq!(committed_through("garbage"), None);
    }

    #[test]
    fn drive_file_metadata_normalizes_time_and_size() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"f1","name":"a.pdf","size":"1234","modifiedTime":"2024-11-29T12:00:00.000Z"}"#,
        )
        .unwrap();
        let meta = file.metadata().unwrap();
        assert_eq!(meta.size, 1234);
        assert_eq!(meta.modified_at.timestamp(), 1732881600);
        assert_eq!(meta.handle.as_deref(), Some("f1"));
    }

    #[test]
    fn drive_times_are_rfc3339_utc() {
        let at = parse_timestamp("2024-11-29T12:00:00Z").unwrap();
        assert_eq!(drive_time(at), "2024-11-29T12:00:00.000Z");
    }
}
