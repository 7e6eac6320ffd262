//! Staging remote file content on local disk on its way to storage.

use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::contract::Transport;
use crate::error::TransportError;
use crate::model::FileItem;

/// A downloaded file. The staging file is removed when this is dropped, on
/// every exit path.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    pub bytes: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Download `file` into a fresh staging file under `staging_dir`, or the
/// system temp dir when unset.
pub async fn stage<T: Transport + ?Sized>(
    transport: &T,
    file: &FileItem,
    staging_dir: Option<&Path>,
) -> Result<StagedFile, TransportError> {
    let staged = match staging_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir).await?;
            NamedTempFile::new_in(dir)?
        }
        None => NamedTempFile::new()?,
    };
    let bytes = transport.download(&file.download_url, staged.path()).await?;
    debug!(file_id = file.id, name = %file.name, bytes, path = %staged.path().display(), "Staged file");
    Ok(StagedFile {
        file: staged,
        bytes,
    })
}
