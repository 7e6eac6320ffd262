//! Storage backends: the local filesystem and a Google Drive folder tree, both
//! behind [`crate::contract::StorageBackend`].

pub mod drive;
pub mod local;

pub use drive::DriveBackend;
pub use local::FilesystemBackend;

/// Characters no backend accepts in a name.
const FORBIDDEN: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Make a remote display name safe as a file or folder name. Shared by both
/// backends so names agree across destinations. Empty results become `untitled`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !FORBIDDEN.contains(c) && !c.is_control())
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
