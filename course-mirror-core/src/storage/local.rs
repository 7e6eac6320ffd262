use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info};

use super::sanitize_filename;
use crate::contract::{Content, ExistingOutputMetadata, FolderRef, PlacedItem, StorageBackend};
use crate::error::StorageError;
use crate::timestamp::from_system_time;

/// Mirror into a directory tree. Writes go through a temporary file in the
/// target folder and are renamed into place.
pub struct FilesystemBackend {
    root: PathBuf,
}

enum Payload {
    Bytes(Vec<u8>),
    Staged(PathBuf),
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target(folder: &FolderRef, filename: &str) -> PathBuf {
        Path::new(&folder.id).join(sanitize_filename(filename))
    }
}

/// Temp file, copy, stamp, rename. Runs on the blocking pool.
fn write_atomically(
    dir: &Path,
    target: &Path,
    payload: Payload,
    modified: Option<SystemTime>,
) -> Result<(), StorageError> {
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    let written = match payload {
        Payload::Bytes(bytes) => staged.write_all(&bytes),
        Payload::Staged(source) => File::open(&source)
            .and_then(|mut src| std::io::copy(&mut src, staged.as_file_mut()).map(|_| ())),
    };
    written.map_err(|e| StorageError::io(target, e))?;
    staged.flush().map_err(|e| StorageError::io(target, e))?;
    if let Some(at) = modified {
        staged
            .as_file()
            .set_modified(at)
            .map_err(|e| StorageError::io(target, e))?;
    }
    staged
        .persist(target)
        .map_err(|e| StorageError::io(target, e.error))?;
    Ok(())
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn root(&self) -> Result<FolderRef, StorageError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;
        info!(root = %self.root.display(), "Using local storage root");
        Ok(FolderRef {
            id: self.root.display().to_string(),
            label: String::new(),
        })
    }

    async fn ensure_folder(&self, parent: &FolderRef, name: &str) -> Result<FolderRef, StorageError> {
        let name = sanitize_filename(name);
        let path = Path::new(&parent.id).join(&name);
        fs::create_dir_all(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(FolderRef {
            id: path.display().to_string(),
            label: parent.child_label(&name),
        })
    }

    async fn existing_metadata(
        &self,
        folder: &FolderRef,
        filename: &str,
    ) -> Result<Option<ExistingOutputMetadata>, StorageError> {
        let path = Self::target(folder, filename);
        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };
        let modified = meta.modified().map_err(|e| StorageError::io(&path, e))?;
        let modified_at = from_system_time(modified)
            .ok_or_else(|| StorageError::Parse(format!("unrepresentable mtime on {}", path.display())))?;
        Ok(Some(ExistingOutputMetadata {
            size: meta.len(),
            modified_at,
            handle: Some(path.display().to_string()),
        }))
    }

    async fn place<'a>(
        &self,
        folder: &FolderRef,
        filename: &str,
        content: Content<'a>,
        source_updated_at: Option<DateTime<Utc>>,
        _previous: Option<&'a ExistingOutputMetadata>,
    ) -> Result<PlacedItem, StorageError> {
        let dir = PathBuf::from(&folder.id);
        let is_dir = fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            return Err(StorageError::io(
                &dir,
                std::io::Error::new(ErrorKind::NotFound, "destination folder does not exist"),
            ));
        }
        let target = Self::target(folder, filename);
        let payload = match content {
            Content::Bytes(bytes) => Payload::Bytes(bytes.to_vec()),
            Content::Staged(path) => Payload::Staged(path.to_path_buf()),
        };
        let modified = source_updated_at.map(SystemTime::from);
        let path = target.clone();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, payload, modified))
            .await
            .map_err(|e| StorageError::io(&target, std::io::Error::other(e)))??;
        debug!(path = %target.display(), "Wrote file");

        Ok(PlacedItem {
            folder: folder.clone(),
            filename: sanitize_filename(filename),
            handle: Some(target.display().to_string()),
        })
    }

    async fn read(&self, folder: &FolderRef, filename: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = Self::target(folder, filename);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    fn supports_references(&self) -> bool {
        false
    }

    async fn reference(
        &self,
        _folder: &FolderRef,
        _filename: &str,
        _target: &PlacedItem,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}
