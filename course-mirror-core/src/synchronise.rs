//! Course pass orchestration: discover, change-detect, render or fetch, place.
//!
//! [`sync_course`] mirrors one course into a storage backend in a fixed order:
//!   1. the course folder under the backend root (fatal if it cannot be provisioned)
//!   2. assignments, each as `Assignments/<name>/<name>.pdf` plus the files its
//!      description links to
//!   3. module items in module order: files into the course folder, pages as
//!      `<title>/<title>.pdf` plus their linked files
//!   4. the merged `Pages/All Pages.pdf` bundle and its manifest
//!
//! Every item is change-detected against its destination first and only
//! rendered or fetched when stale. Item failures become `Failed` records and
//! the pass moves on; only the conditions in [`SyncError`] stop it.
//!
//! A [`ProcessedIdentitySet`] scoped to the pass makes sure a file reached from
//! several places is fetched at most once.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::change::{
    detect, detect_bundle, detect_forced, newest, BundleManifest, Candidate, ChangeStatus,
    BUNDLE_MANIFEST_NAME,
};
use crate::config::SyncOptions;
use crate::contract::{Content, FolderRef, PlacedItem, StorageBackend, Transport};
use crate::discovery::{extract_linked_files, Discovery};
use crate::download::stage;
use crate::error::SyncError;
use crate::model::{Course, FileItem, ItemKind, Page, RemoteItem};
use crate::render::document::{assignment_document, bundle_document, page_document, Document};
use crate::render::pdf::render_pdf;
use crate::storage::sanitize_filename;
use crate::summary::{SummaryCollector, SyncOutcome};

pub const ASSIGNMENTS_FOLDER: &str = "Assignments";
pub const PAGES_FOLDER: &str = "Pages";
pub const BUNDLE_NAME: &str = "All Pages.pdf";

/// Remote file ids already handled in this pass, with where they ended up.
/// `None` means the file was reached but never placed.
#[derive(Debug, Default)]
pub struct ProcessedIdentitySet {
    seen: HashMap<u64, Option<PlacedItem>>,
}

impl ProcessedIdentitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_id: u64) -> Option<&Option<PlacedItem>> {
        self.seen.get(&file_id)
    }

    pub fn contains(&self, file_id: u64) -> bool {
        self.seen.contains_key(&file_id)
    }

    pub fn record(&mut self, file_id: u64, placed: Option<PlacedItem>) {
        self.seen.insert(file_id, placed);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

fn outcome_for(status: ChangeStatus) -> SyncOutcome {
    match status {
        ChangeStatus::Missing => SyncOutcome::Created,
        ChangeStatus::Changed => SyncOutcome::Updated,
        ChangeStatus::Unchanged => SyncOutcome::SkippedUnchanged,
    }
}

fn record(summary: &mut SummaryCollector, kind: ItemKind, name: &str, destination: &str, outcome: SyncOutcome) {
    match &outcome {
        SyncOutcome::Failed(e) => error!(%kind, name, destination, error = %e, "Item failed"),
        SyncOutcome::Created | SyncOutcome::Updated | SyncOutcome::Referenced => {
            info!(%kind, name, destination, outcome = %outcome, "Item synced")
        }
        SyncOutcome::SkippedUnchanged | SyncOutcome::SkippedDuplicate => {
            debug!(%kind, name, destination, outcome = %outcome, "Item skipped")
        }
    }
    summary.push(kind, name, destination, outcome);
}

struct Pass<'a, T: Transport, S: StorageBackend + ?Sized> {
    discovery: &'a Discovery<T>,
    backend: &'a S,
    options: &'a SyncOptions,
}

impl<'a, T: Transport, S: StorageBackend + ?Sized> Pass<'a, T, S> {
    /// Render-and-place for a generated document.
    #[allow(clippy::too_many_arguments)]
    async fn document(
        &self,
        summary: &mut SummaryCollector,
        kind: ItemKind,
        name: &str,
        folder: &FolderRef,
        filename: &str,
        updated_at: Option<DateTime<Utc>>,
        force: bool,
        build: impl FnOnce() -> Document,
    ) {
        let existing = match self.backend.existing_metadata(folder, filename).await {
            Ok(existing) => existing,
            Err(e) => {
                record(summary, kind, name, &folder.label, SyncOutcome::Failed(e.to_string()));
                return;
            }
        };
        let candidate = Candidate {
            size: None,
            updated_at,
        };
        let status = detect_forced(&candidate, existing.as_ref(), force);
        if !status.needs_write() {
            record(summary, kind, name, &folder.label, SyncOutcome::SkippedUnchanged);
            return;
        }
        let bytes = match render_pdf(&build()) {
            Ok(bytes) => bytes,
            Err(e) => {
                record(summary, kind, name, &folder.label, SyncOutcome::Failed(e.to_string()));
                return;
            }
        };
        let outcome = match self
            .backend
            .place(folder, filename, Content::Bytes(&bytes), updated_at, existing.as_ref())
            .await
        {
            Ok(_) => outcome_for(status),
            Err(e) => SyncOutcome::Failed(e.to_string()),
        };
        record(summary, kind, name, &folder.label, outcome);
    }

    /// Handle a file id seen earlier in the pass. Returns false when it is new.
    async fn duplicate(
        &self,
        summary: &mut SummaryCollector,
        processed: &ProcessedIdentitySet,
        kind: ItemKind,
        file_id: u64,
        name: &str,
        folder: &FolderRef,
    ) -> bool {
        let Some(prior) = processed.get(file_id) else {
            return false;
        };
        let outcome = match prior {
            Some(placed) if self.backend.supports_references() && placed.folder != *folder => {
                match self.backend.reference(folder, &placed.filename, placed).await {
                    Ok(()) => SyncOutcome::Referenced,
                    Err(e) => SyncOutcome::Failed(e.to_string()),
                }
            }
            _ => SyncOutcome::SkippedDuplicate,
        };
        record(summary, kind, name, &folder.label, outcome);
        true
    }

    async fn file(
        &self,
        summary: &mut SummaryCollector,
        processed: &mut ProcessedIdentitySet,
        kind: ItemKind,
        file: &FileItem,
        folder: &FolderRef,
    ) {
        if self.duplicate(summary, processed, kind, file.id, &file.name, folder).await {
            return;
        }
        let filename = sanitize_filename(&file.name);
        let existing = match self.backend.existing_metadata(folder, &filename).await {
            Ok(existing) => existing,
            Err(e) => {
                processed.record(file.id, None);
                record(summary, kind, &file.name, &folder.label, SyncOutcome::Failed(e.to_string()));
                return;
            }
        };
        let candidate = Candidate {
            size: file.size,
            updated_at: file.updated_at,
        };
        let status = detect(&candidate, existing.as_ref());
        if !status.needs_write() {
            processed.record(
                file.id,
                Some(PlacedItem {
                    folder: folder.clone(),
                    filename,
                    handle: existing.and_then(|e| e.handle),
                }),
            );
            record(summary, kind, &file.name, &folder.label, SyncOutcome::SkippedUnchanged);
            return;
        }

        let staging_dir = self.options.staging_dir.as_deref();
        let staged = match stage(self.discovery.transport(), file, staging_dir).await {
            Ok(staged) => staged,
            Err(e) => {
                processed.record(file.id, None);
                record(summary, kind, &file.name, &folder.label, SyncOutcome::Failed(e.to_string()));
                return;
            }
        };
        let placed = self
            .backend
            .place(folder, &filename, Content::Staged(staged.path()), file.updated_at, existing.as_ref())
            .await;
        // The staging file goes away here whatever the outcome.
        drop(staged);
        match placed {
            Ok(placed) => {
                processed.record(file.id, Some(placed));
                record(summary, kind, &file.name, &folder.label, outcome_for(status));
            }
            Err(e) => {
                processed.record(file.id, None);
                record(summary, kind, &file.name, &folder.label, SyncOutcome::Failed(e.to_string()));
            }
        }
    }

    /// Place every file a body links to into `folder`. References that are gone
    /// or not downloadable are skipped; other lookup failures are recorded.
    async fn linked_files(
        &self,
        summary: &mut SummaryCollector,
        processed: &mut ProcessedIdentitySet,
        folder: &FolderRef,
        body: Option<&str>,
    ) {
        let Some(body) = body else {
            return;
        };
        for reference in extract_linked_files(body) {
            let label = if reference.anchor_text.is_empty() {
                format!("file {}", reference.file_id)
            } else {
                reference.anchor_text.clone()
            };
            if self
                .duplicate(summary, processed, ItemKind::LinkedFile, reference.file_id, &label, folder)
                .await
            {
                continue;
            }
            match self.discovery.file_metadata(reference.file_id).await {
                Ok(Some(file)) => {
                    self.file(summary, processed, ItemKind::LinkedFile, &file, folder).await
                }
                Ok(None) => debug!(file_id = reference.file_id, "Linked file not downloadable, skipped"),
                Err(e) if matches!(e.status(), Some(403) | Some(404)) => {
                    debug!(file_id = reference.file_id, error = %e, "Linked file unresolvable, skipped")
                }
                Err(e) => {
                    processed.record(reference.file_id, None);
                    record(summary, ItemKind::LinkedFile, &label, &folder.label, SyncOutcome::Failed(e.to_string()));
                }
            }
        }
    }

    async fn bundle(&self, summary: &mut SummaryCollector, course: &Course, course_folder: &FolderRef, pages: &[Page]) {
        if pages.is_empty() {
            debug!(course_id = course.id, "No pages, no bundle");
            return;
        }
        let folder = match self.backend.ensure_folder(course_folder, PAGES_FOLDER).await {
            Ok(folder) => folder,
            Err(e) => {
                let destination = course_folder.child_label(PAGES_FOLDER);
                record(summary, ItemKind::Bundle, BUNDLE_NAME, &destination, SyncOutcome::Failed(e.to_string()));
                return;
            }
        };
        let existing = match self.backend.existing_metadata(&folder, BUNDLE_NAME).await {
            Ok(existing) => existing,
            Err(e) => {
                record(summary, ItemKind::Bundle, BUNDLE_NAME, &folder.label, SyncOutcome::Failed(e.to_string()));
                return;
            }
        };
        let manifest = match self.backend.read(&folder, BUNDLE_MANIFEST_NAME).await {
            Ok(raw) => raw.and_then(|raw| BundleManifest::parse(&raw)),
            Err(e) => {
                warn!(error = %e, "Bundle manifest unreadable, rebuilding");
                None
            }
        };
        let status = detect_bundle(pages, existing.as_ref(), manifest.as_ref());
        if !status.needs_write() {
            record(summary, ItemKind::Bundle, BUNDLE_NAME, &folder.label, SyncOutcome::SkippedUnchanged);
            return;
        }

        let doc = bundle_document(course, pages);
        let bytes = match render_pdf(&doc) {
            Ok(bytes) => bytes,
            Err(e) => {
                record(summary, ItemKind::Bundle, BUNDLE_NAME, &folder.label, SyncOutcome::Failed(e.to_string()));
                return;
            }
        };
        let stamped = newest(pages);
        if let Err(e) = self
            .backend
            .place(&folder, BUNDLE_NAME, Content::Bytes(&bytes), stamped, existing.as_ref())
            .await
        {
            record(summary, ItemKind::Bundle, BUNDLE_NAME, &folder.label, SyncOutcome::Failed(e.to_string()));
            return;
        }
        info!(course_id = course.id, pages = pages.len(), "Rebuilt pages bundle");
        record(summary, ItemKind::Bundle, BUNDLE_NAME, &folder.label, outcome_for(status));

        // A stale or missing manifest only costs a rebuild next run.
        let manifest = BundleManifest::for_pages(pages);
        let written = match serde_json::to_vec_pretty(&manifest) {
            Ok(raw) => {
                let previous = self
                    .backend
                    .existing_metadata(&folder, BUNDLE_MANIFEST_NAME)
                    .await
                    .ok()
                    .flatten();
                self.backend
                    .place(&folder, BUNDLE_MANIFEST_NAME, Content::Bytes(&raw), None, previous.as_ref())
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = written {
            warn!(error = %e, "Could not write bundle manifest");
        }
    }
}

/// Mirror one course into `backend`.
///
/// Returns the per-item summary. `Err` only for an auth refusal on the course
/// fetch or when the course folder cannot be provisioned.
pub async fn sync_course<T, S>(
    discovery: &Discovery<T>,
    course: &Course,
    backend: &S,
    options: &SyncOptions,
) -> Result<SummaryCollector, SyncError>
where
    T: Transport,
    S: StorageBackend + ?Sized,
{
    let course = match discovery.fetch_course(course.id).await {
        Ok(fetched) => fetched,
        Err(SyncError::Remote(e)) => {
            warn!(course_id = course.id, error = %e, "Course fetch failed, continuing with known details");
            course.clone()
        }
        Err(fatal) => return Err(fatal),
    };
    info!(course_id = course.id, course = %course.name, "Syncing course");

    let course_folder = match backend.root().await {
        Ok(root) => backend.ensure_folder(&root, &course.name).await,
        Err(e) => Err(e),
    }
    .map_err(|source| SyncError::Destination {
        folder: course.name.clone(),
        source,
    })?;

    let mut summary = SummaryCollector::new();
    let mut processed = ProcessedIdentitySet::new();
    let pass = Pass {
        discovery,
        backend,
        options,
    };

    let discovered = discovery.discover(&course).await;
    for failure in &discovered.failures {
        record(
            &mut summary,
            failure.kind,
            &failure.name,
            &course_folder.label,
            SyncOutcome::Failed(failure.error.clone()),
        );
    }

    if !discovered.assignments.is_empty() {
        match backend.ensure_folder(&course_folder, ASSIGNMENTS_FOLDER).await {
            Ok(assignments_folder) => {
                for assignment in &discovered.assignments {
                    let folder = match backend.ensure_folder(&assignments_folder, &assignment.name).await {
                        Ok(folder) => folder,
                        Err(e) => {
                            let destination = assignments_folder.child_label(&sanitize_filename(&assignment.name));
                            record(&mut summary, ItemKind::Assignment, &assignment.name, &destination, SyncOutcome::Failed(e.to_string()));
                            continue;
                        }
                    };
                    let filename = format!("{}.pdf", sanitize_filename(&assignment.name));
                    pass.document(
                        &mut summary,
                        ItemKind::Assignment,
                        &assignment.name,
                        &folder,
                        &filename,
                        assignment.updated_at,
                        options.force_regenerate_assignments,
                        || assignment_document(assignment),
                    )
                    .await;
                    pass.linked_files(&mut summary, &mut processed, &folder, assignment.description.as_deref())
                        .await;
                }
            }
            Err(e) => {
                let destination = course_folder.child_label(ASSIGNMENTS_FOLDER);
                record(&mut summary, ItemKind::Listing, ASSIGNMENTS_FOLDER, &destination, SyncOutcome::Failed(e.to_string()));
            }
        }
    }

    let mut rendered_pages: HashSet<&str> = HashSet::new();
    for item in &discovered.module_items {
        match item {
            RemoteItem::ModuleFile(file) => {
                pass.file(&mut summary, &mut processed, ItemKind::ModuleFile, file, &course_folder)
                    .await
            }
            RemoteItem::Page(page) => {
                if !rendered_pages.insert(page.key.as_str()) {
                    let destination = course_folder.child_label(&sanitize_filename(&page.title));
                    record(&mut summary, ItemKind::Page, &page.title, &destination, SyncOutcome::SkippedDuplicate);
                    continue;
                }
                let folder = match backend.ensure_folder(&course_folder, &page.title).await {
                    Ok(folder) => folder,
                    Err(e) => {
                        let destination = course_folder.child_label(&sanitize_filename(&page.title));
                        record(&mut summary, ItemKind::Page, &page.title, &destination, SyncOutcome::Failed(e.to_string()));
                        continue;
                    }
                };
                let filename = format!("{}.pdf", sanitize_filename(&page.title));
                pass.document(
                    &mut summary,
                    ItemKind::Page,
                    &page.title,
                    &folder,
                    &filename,
                    page.updated_at,
                    false,
                    || page_document(page),
                )
                .await;
                pass.linked_files(&mut summary, &mut processed, &folder, page.body.as_deref())
                    .await;
            }
            RemoteItem::Assignment(_) | RemoteItem::LinkedFile(_) => {}
        }
    }

    pass.bundle(&mut summary, &course, &course_folder, &discovered.pages).await;

    let counts = summary.counts();
    info!(
        course_id = course.id,
        created = counts.created,
        updated = counts.updated,
        unchanged = counts.unchanged,
        duplicate = counts.duplicate,
        referenced = counts.referenced,
        failed = counts.failed,
        files_seen = processed.len(),
        "Course sync complete"
    );
    Ok(summary)
}
