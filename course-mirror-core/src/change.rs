//! Change detection against existing output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::ExistingOutputMetadata;
use crate::model::Page;

/// Sidecar written next to the bundle, recording what was baked into it.
pub const BUNDLE_MANIFEST_NAME: &str = "All Pages.toc.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Unchanged,
    Changed,
    Missing,
}

impl ChangeStatus {
    pub fn needs_write(self) -> bool {
        !matches!(self, ChangeStatus::Unchanged)
    }
}

/// The remote side of a comparison. `size` is `None` for rendered documents,
/// which skips the size phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub size: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn detect(candidate: &Candidate, existing: Option<&ExistingOutputMetadata>) -> ChangeStatus {
    let Some(existing) = existing else {
        return ChangeStatus::Missing;
    };
    if let Some(size) = candidate.size {
        if size != existing.size {
            return ChangeStatus::Changed;
        }
    }
    match candidate.updated_at {
        Some(remote) if remote > existing.modified_at => ChangeStatus::Changed,
        _ => ChangeStatus::Unchanged,
    }
}

/// Forced regeneration turns any existing output into `Changed`.
pub fn detect_forced(
    candidate: &Candidate,
    existing: Option<&ExistingOutputMetadata>,
    force: bool,
) -> ChangeStatus {
    match detect(candidate, existing) {
        ChangeStatus::Unchanged if force => ChangeStatus::Changed,
        status => status,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub key: String,
    pub title: String,
}

/// Ordered page sequence of a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub pages: Vec<BundleEntry>,
}

impl BundleManifest {
    pub fn for_pages(pages: &[Page]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|p| BundleEntry {
                    key: p.key.clone(),
                    title: p.title.clone(),
                })
                .collect(),
        }
    }

    pub fn parse(raw: &[u8]) -> Option<Self> {
        serde_json::from_slice(raw).ok()
    }

    fn keys(&self) -> impl Iterator<Item = &str> {
        self.pages.iter().map(|e| e.key.as_str())
    }
}

/// Bundle-level decision: rebuild when absent, when any page is newer than the
/// bundle, or when the ordered page sequence differs from the manifest. An
/// unreadable or missing manifest counts as a difference.
pub fn detect_bundle(
    pages: &[Page],
    existing: Option<&ExistingOutputMetadata>,
    manifest: Option<&BundleManifest>,
) -> ChangeStatus {
    let Some(existing) = existing else {
        return ChangeStatus::Missing;
    };
    let Some(manifest) = manifest else {
        return ChangeStatus::Changed;
    };
    if !manifest.keys().eq(pages.iter().map(|p| p.key.as_str())) {
        return ChangeStatus::Changed;
    }
    let any_newer = pages.iter().any(|p| {
        detect(
            &Candidate {
                size: None,
                updated_at: p.updated_at,
            },
            Some(existing),
        ) == ChangeStatus::Changed
    });
    if any_newer {
        ChangeStatus::Changed
    } else {
        ChangeStatus::Unchanged
    }
}

/// Newest page timestamp; stamped onto the bundle.
pub fn newest(pages: &[Page]) -> Option<DateTime<Utc>> {
    pages.iter().filter_map(|p| p.updated_at).max()
}
