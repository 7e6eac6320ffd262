//! Remote content model.
//!
//! `Api*` structs mirror the remote JSON closely and are only used at the
//! discovery boundary; everything past it works with the domain types below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::timestamp::RawTimestamp;

/// Root of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub id: u64,
    pub name: String,
    pub code: Option<String>,
    pub access_restricted: bool,
}

/// What kind of thing a summary record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Assignment,
    ModuleFile,
    Page,
    LinkedFile,
    /// The merged all-pages document.
    Bundle,
    /// A whole remote listing (modules, assignments) that could not be read.
    Listing,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemKind::Assignment => "assignment",
            ItemKind::ModuleFile => "module file",
            ItemKind::Page => "page",
            ItemKind::LinkedFile => "linked file",
            ItemKind::Bundle => "pages bundle",
            ItemKind::Listing => "listing",
        };
        f.write_str(s)
    }
}

/// A downloadable file, whether reached from a module or from a body link.
#[derive(Debug, Clone, PartialEq)]
pub struct FileItem {
    pub id: u64,
    pub name: String,
    pub size: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub download_url: String,
}

/// Where a page was discovered. Informational only; never a dedupe key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Provenance {
    pub listing: bool,
    pub module: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Canonical slug; the dedupe key across discovery sources.
    pub key: String,
    pub title: String,
    pub body: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub html_url: Option<String>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RubricRating {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub long_description: Option<String>,
    #[serde(default)]
    pub points: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RubricCriterion {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub long_description: Option<String>,
    #[serde(default)]
    pub points: Option<f64>,
    #[serde(default)]
    pub ratings: Vec<RubricRating>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub points_possible: Option<f64>,
    pub rubric: Vec<RubricCriterion>,
    pub updated_at: Option<DateTime<Utc>>,
    pub html_url: Option<String>,
}

/// A file reference embedded in a rich-text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedFileReference {
    pub file_id: u64,
    pub anchor_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteItem {
    ModuleFile(FileItem),
    Page(Page),
    Assignment(Assignment),
    LinkedFile(FileItem),
}

impl RemoteItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            RemoteItem::ModuleFile(_) => ItemKind::ModuleFile,
            RemoteItem::Page(_) => ItemKind::Page,
            RemoteItem::Assignment(_) => ItemKind::Assignment,
            RemoteItem::LinkedFile(_) => ItemKind::LinkedFile,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RemoteItem::ModuleFile(f) | RemoteItem::LinkedFile(f) => &f.name,
            RemoteItem::Page(p) => &p.title,
            RemoteItem::Assignment(a) => &a.name,
        }
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RemoteItem::ModuleFile(f) | RemoteItem::LinkedFile(f) => f.updated_at,
            RemoteItem::Page(p) => p.updated_at,
            RemoteItem::Assignment(a) => a.updated_at,
        }
    }

    /// Byte size; only files have one.
    pub fn size(&self) -> Option<u64> {
        match self {
            RemoteItem::ModuleFile(f) | RemoteItem::LinkedFile(f) => f.size,
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            RemoteItem::Page(p) => p.body.as_deref(),
            RemoteItem::Assignment(a) => a.description.as_deref(),
            _ => None,
        }
    }
}

// --- Wire shapes ---------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ApiCourse {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub access_restricted_by_date: Option<bool>,
}

impl From<ApiCourse> for Course {
    fn from(c: ApiCourse) -> Self {
        Course {
            id: c.id,
            name: c.name.unwrap_or_else(|| "Unnamed".to_string()),
            code: c.course_code,
            access_restricted: c.access_restricted_by_date.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiModule {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiModuleItem {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content_id: Option<u64>,
    #[serde(default)]
    pub page_url: Option<String>,
    /// API URL of the referenced object.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPage {
    /// The slug.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub updated_at: Option<RawTimestamp>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl ApiPage {
    /// Slug, falling back to the title when the remote omits it.
    pub fn key(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| self.title.clone())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn into_page(self, provenance: Provenance) -> Option<Page> {
        let key = self.key()?;
        Some(Page {
            title: self.title.unwrap_or_else(|| "Untitled Page".to_string()),
            body: self.body,
            updated_at: self.updated_at.as_ref().and_then(RawTimestamp::normalize),
            html_url: self.html_url,
            provenance,
            key,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiAssignment {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_at: Option<RawTimestamp>,
    #[serde(default)]
    pub points_possible: Option<f64>,
    #[serde(default)]
    pub rubric: Option<Vec<RubricCriterion>>,
    #[serde(default)]
    pub updated_at: Option<RawTimestamp>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl ApiAssignment {
    pub fn into_assignment(self) -> Option<Assignment> {
        let name = self.name.filter(|n| !n.trim().is_empty())?;
        Some(Assignment {
            id: self.id,
            name,
            description: self.description,
            due_at: self.due_at.as_ref().and_then(RawTimestamp::normalize),
            points_possible: self.points_possible,
            rubric: self.rubric.unwrap_or_default(),
            updated_at: self.updated_at.as_ref().and_then(RawTimestamp::normalize),
            html_url: self.html_url,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiFile {
    pub id: u64,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<RawTimestamp>,
    /// Download URL.
    #[serde(default)]
    pub url: Option<String>,
}

impl ApiFile {
    /// Files without a name or download URL cannot be mirrored.
    pub fn into_file(self) -> Option<FileItem> {
        let name = self.display_name.or(self.filename)?;
        let download_url = self.url.filter(|u| !u.is_empty())?;
        Some(FileItem {
            id: self.id,
            name,
            size: self.size,
            updated_at: self.updated_at.as_ref().and_then(RawTimestamp::normalize),
            download_url,
        })
    }
}
