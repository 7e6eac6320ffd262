//! # contract: the two seams of the engine
//!
//! This module defines the interfaces the engine is written against, plus the
//! plain data that crosses them:
//!
//! - [`Transport`]: the remote side. Issues one request (retries included) and
//!   streams a download. Pagination is layered on top in
//!   [`crate::transport::paginate`] so every implementor gets it for free.
//! - [`StorageBackend`]: the destination side. Folder provisioning, metadata
//!   lookup for change detection, and placement. Implemented by
//!   [`crate::storage::local::FilesystemBackend`] and
//!   [`crate::storage::drive::DriveBackend`]; the orchestrator never knows which.
//!
//! ## Mocking & Testing
//! Both traits are annotated for `mockall` and the mocks are exported under the
//! `test-export-mocks` feature so integration tests in `tests/` can use them.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::path::Path;

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

use crate::error::{StorageError, TransportError};

pub use reqwest::Method;

/// One completed remote exchange.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: String,
    pub status: u16,
    /// Continuation cursor: the `rel="next"` target of the `Link` header.
    pub next: Option<String>,
    pub body: Bytes,
}

impl Response {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

/// Query parameters as ordered pairs; repeated keys (`include[]`) are allowed.
pub type Params = [(String, String)];

/// Remote content API access with retry and timeout policy applied.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request. `url` may be absolute or relative to the API base.
    async fn request(
        &self,
        method: Method,
        url: &str,
        params: &Params,
    ) -> Result<Response, TransportError>;

    /// Stream the body of `url` into `destination`, returning bytes written.
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, TransportError>;

    /// Page size passed to listing endpoints.
    fn page_size(&self) -> u32;
}

/// A folder in the destination tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderRef {
    /// Backend identity: a path for the filesystem, a file id for Drive.
    pub id: String,
    /// Human-readable path from the root, used in the summary.
    pub label: String,
}

impl FolderRef {
    pub fn child_label(&self, name: &str) -> String {
        if self.label.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.label, name)
        }
    }
}

/// Facts about a previously written destination item.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingOutputMetadata {
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    /// Backend handle of the existing object (Drive file id, local path).
    pub handle: Option<String>,
}

/// Payload for [`StorageBackend::place`].
#[derive(Debug, Clone, Copy)]
pub enum Content<'a> {
    Bytes(&'a [u8]),
    /// A staged local file; the caller owns its cleanup.
    Staged(&'a Path),
}

/// Where an item ended up, so later references can point at it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedItem {
    pub folder: FolderRef,
    pub filename: String,
    pub handle: Option<String>,
}

/// Destination tree operations. Callers must `ensure_folder` before `place`;
/// `place` never creates parents.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The configured root of the mirror.
    async fn root(&self) -> Result<FolderRef, StorageError>;

    /// Return the child folder named exactly `name` (case-sensitive), creating
    /// it when absent.
    async fn ensure_folder(&self, parent: &FolderRef, name: &str)
        -> Result<FolderRef, StorageError>;

    async fn existing_metadata(
        &self,
        folder: &FolderRef,
        filename: &str,
    ) -> Result<Option<ExistingOutputMetadata>, StorageError>;

    /// Write or overwrite `filename` in `folder`. `source_updated_at` becomes
    /// the stored modification time when given; `previous` is the metadata
    /// read during change detection, if the item existed.
    async fn place<'a>(
        &self,
        folder: &FolderRef,
        filename: &str,
        content: Content<'a>,
        source_updated_at: Option<DateTime<Utc>>,
        previous: Option<&'a ExistingOutputMetadata>,
    ) -> Result<PlacedItem, StorageError>;

    /// Read a small object back, `None` when it does not exist.
    async fn read(&self, folder: &FolderRef, filename: &str)
        -> Result<Option<Vec<u8>>, StorageError>;

    /// Whether [`StorageBackend::reference`] creates anything.
    fn supports_references(&self) -> bool;

    /// Make `target` reachable from `folder` under `filename` without copying.
    async fn reference(
        &self,
        folder: &FolderRef,
        filename: &str,
        target: &PlacedItem,
    ) -> Result<(), StorageError>;
}
