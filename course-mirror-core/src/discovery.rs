//! Content discovery: courses, modules, pages (two sources, merged), assignments,
//! and file references embedded in rich-text bodies.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{debug, info, warn};

use crate::contract::{Method, Transport};
use crate::error::{SyncError, TransportError};
use crate::model::{
    ApiAssignment, ApiCourse, ApiFile, ApiModule, ApiModuleItem, ApiPage, Assignment, Course,
    FileItem, ItemKind, LinkedFileReference, Page, Provenance, RemoteItem,
};
use crate::transport::collect_all;

/// Something discovery could not fetch; recorded as a failed outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryFailure {
    pub kind: ItemKind,
    pub name: String,
    pub error: String,
}

/// Everything found for one course.
#[derive(Debug, Default)]
pub struct Discovered {
    pub assignments: Vec<Assignment>,
    /// Module files and module pages, in module order.
    pub module_items: Vec<RemoteItem>,
    /// Listing and module pages merged by slug.
    pub pages: Vec<Page>,
    pub failures: Vec<DiscoveryFailure>,
}

pub struct Discovery<T: Transport> {
    transport: T,
    web_base: Option<String>,
}

impl<T: Transport> Discovery<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            web_base: None,
        }
    }

    /// Site root used to build a "view original" link for pages the API
    /// returns without one.
    pub fn with_web_base(mut self, base_url: &str) -> Self {
        let base = base_url.trim().trim_end_matches('/');
        self.web_base = (!base.is_empty()).then(|| base.to_string());
        self
    }

    fn page_link(&self, course: &Course, page: &Page) -> Option<String> {
        self.web_base
            .as_ref()
            .map(|base| format!("{base}/courses/{}/pages/{}", course.id, page.key))
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Every course visible to the token, minus date-restricted ones.
    pub async fn list_courses(&self) -> Result<Vec<Course>, TransportError> {
        let courses: Vec<ApiCourse> = collect_all(&self.transport, "/api/v1/courses", &[]).await?;
        let courses: Vec<Course> = courses
            .into_iter()
            .map(Course::from)
            .filter(|c| !c.access_restricted)
            .collect();
        info!(count = courses.len(), "Listed available courses");
        Ok(courses)
    }

    /// The session-establishing call. Refused credentials here are fatal.
    pub async fn fetch_course(&self, course_id: u64) -> Result<Course, SyncError> {
        let url = format!("/api/v1/courses/{course_id}");
        let response = self
            .transport
            .request(Method::GET, &url, &[])
            .await
            .map_err(|e| {
                if e.is_auth() {
                    SyncError::Auth(e)
                } else {
                    SyncError::Remote(e)
                }
            })?;
        let course: ApiCourse = response.json().map_err(SyncError::Remote)?;
        Ok(course.into())
    }

    /// File metadata by id. `Ok(None)` when the file exists but cannot be mirrored.
    pub async fn file_metadata(&self, file_id: u64) -> Result<Option<FileItem>, TransportError> {
        self.file_at(&format!("/api/v1/files/{file_id}")).await
    }

    async fn file_at(&self, url: &str) -> Result<Option<FileItem>, TransportError> {
        let response = self.transport.request(Method::GET, url, &[]).await?;
        let file: ApiFile = response.json()?;
        Ok(file.into_file())
    }

    pub async fn assignments(&self, course: &Course) -> Result<Vec<Assignment>, TransportError> {
        let url = format!("/api/v1/courses/{}/assignments", course.id);
        let params = [("include[]".to_string(), "rubric".to_string())];
        let raw: Vec<ApiAssignment> = collect_all(&self.transport, &url, &params).await?;
        Ok(raw.into_iter().filter_map(ApiAssignment::into_assignment).collect())
    }

    /// Pages from the listing endpoint. Failures are suppressed and read as empty.
    pub async fn listed_pages(&self, course: &Course) -> Vec<Page> {
        let url = format!("/api/v1/courses/{}/pages", course.id);
        let params = [("include[]".to_string(), "body".to_string())];
        match collect_all::<ApiPage, _>(&self.transport, &url, &params).await {
            Ok(pages) => pages
                .into_iter()
                .filter_map(|p| {
                    p.into_page(Provenance {
                        listing: true,
                        module: false,
                    })
                })
                .collect(),
            Err(e) => {
                warn!(course_id = course.id, error = %e, "Page listing unavailable, treating as empty");
                Vec::new()
            }
        }
    }

    async fn module_page(&self, course: &Course, item: &ApiModuleItem) -> Result<Option<Page>, TransportError> {
        let url = match (&item.page_url, &item.url) {
            (Some(slug), _) => format!("/api/v1/courses/{}/pages/{}", course.id, slug),
            (None, Some(url)) => url.clone(),
            (None, None) => return Ok(None),
        };
        let response = self.transport.request(Method::GET, &url, &[]).await?;
        let mut raw: ApiPage = response.json()?;
        if raw.url.is_none() {
            raw.url = item.page_url.clone();
        }
        if raw.title.is_none() {
            raw.title = item.title.clone();
        }
        Ok(raw.into_page(Provenance {
            listing: false,
            module: true,
        }))
    }

    async fn module_file(&self, item: &ApiModuleItem) -> Result<Option<FileItem>, TransportError> {
        match (&item.url, item.content_id) {
            (Some(url), _) => self.file_at(url).await,
            (None, Some(id)) => self.file_metadata(id).await,
            (None, None) => Ok(None),
        }
    }

    /// Walk every module's items. Item-level failures are collected, not raised.
    pub async fn modules(
        &self,
        course: &Course,
    ) -> Result<(Vec<RemoteItem>, Vec<DiscoveryFailure>), TransportError> {
        let modules_url = format!("/api/v1/courses/{}/modules", course.id);
        let modules: Vec<ApiModule> = collect_all(&self.transport, &modules_url, &[]).await?;
        let mut items = Vec::new();
        let mut failures = Vec::new();

        for module in modules {
            let module_name = module.name.clone().unwrap_or_else(|| format!("module {}", module.id));
            let items_url = format!("/api/v1/courses/{}/modules/{}/items", course.id, module.id);
            let module_items: Vec<ApiModuleItem> =
                match collect_all(&self.transport, &items_url, &[]).await {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(module = %module_name, error = %e, "Could not list module items");
                        failures.push(DiscoveryFailure {
                            kind: ItemKind::Listing,
                            name: module_name,
                            error: e.to_string(),
                        });
                        continue;
                    }
                };
            debug!(module = %module_name, count = module_items.len(), "Module items listed");

            for item in module_items {
                let name = item.title.clone().unwrap_or_else(|| format!("item {}", item.id));
                match item.kind.as_str() {
                    "File" => match self.module_file(&item).await {
                        Ok(Some(file)) => items.push(RemoteItem::ModuleFile(file)),
                        Ok(None) => debug!(item = %name, "Module file not downloadable, skipped"),
                        Err(e) => failures.push(DiscoveryFailure {
                            kind: ItemKind::ModuleFile,
                            name,
                            error: e.to_string(),
                        }),
                    },
                    "Page" => match self.module_page(course, &item).await {
                        Ok(Some(page)) => items.push(RemoteItem::Page(page)),
                        Ok(None) => debug!(item = %name, "Module page has no slug, skipped"),
                        Err(e) => failures.push(DiscoveryFailure {
                            kind: ItemKind::Page,
                            name,
                            error: e.to_string(),
                        }),
                    },
                    other => debug!(item = %name, kind = other, "Ignoring module item type"),
                }
            }
        }
        Ok((items, failures))
    }

    /// Full discovery for one course.
    pub async fn discover(&self, course: &Course) -> Discovered {
        let mut found = Discovered::default();

        match self.assignments(course).await {
            Ok(assignments) => found.assignments = assignments,
            Err(e) => {
                warn!(course_id = course.id, error = %e, "Could not list assignments");
                found.failures.push(DiscoveryFailure {
                    kind: ItemKind::Listing,
                    name: "assignments".to_string(),
                    error: e.to_string(),
                });
            }
        }

        match self.modules(course).await {
            Ok((items, failures)) => {
                found.module_items = items;
                found.failures.extend(failures);
            }
            Err(e) => {
                warn!(course_id = course.id, error = %e, "Could not list modules");
                found.failures.push(DiscoveryFailure {
                    kind: ItemKind::Listing,
                    name: "modules".to_string(),
                    error: e.to_string(),
                });
            }
        }

        let listed = self.listed_pages(course).await;
        let module_pages: Vec<Page> = found
            .module_items
            .iter()
            .filter_map(|item| match item {
                RemoteItem::Page(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        found.pages = merge_pages(listed, module_pages);
        for page in &mut found.pages {
            if page.html_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                page.html_url = self.page_link(course, page);
            }
        }

        // Module pages pick up the merged view so both uses agree on names and timestamps.
        let merged: HashMap<&str, &Page> = found.pages.iter().map(|p| (p.key.as_str(), p)).collect();
        for item in &mut found.module_items {
            if let RemoteItem::Page(page) = item {
                if let Some(m) = merged.get(page.key.as_str()) {
                    page.title = m.title.clone();
                    page.updated_at = m.updated_at;
                    page.provenance = m.provenance;
                    if page.body.is_none() {
                        page.body = m.body.clone();
                    }
                    if page.html_url.is_none() {
                        page.html_url = m.html_url.clone();
                    }
                }
            }
        }

        info!(
            course_id = course.id,
            assignments = found.assignments.len(),
            module_items = found.module_items.len(),
            pages = found.pages.len(),
            failures = found.failures.len(),
            "Discovery complete"
        );
        found
    }
}

/// Union listing and module pages by slug.
///
/// Listing order comes first, then module-only pages in discovery order. On a
/// shared key the listing title and `updated_at` win; the module flag is kept.
pub fn merge_pages(listing: Vec<Page>, module_pages: Vec<Page>) -> Vec<Page> {
    let mut merged: Vec<Page> = Vec::with_capacity(listing.len() + module_pages.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for mut page in listing {
        if index.contains_key(&page.key) {
            continue;
        }
        page.provenance.listing = true;
        index.insert(page.key.clone(), merged.len());
        merged.push(page);
    }

    for mut page in module_pages {
        match index.get(&page.key) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.provenance.module = true;
                if existing.updated_at.is_none() {
                    existing.updated_at = page.updated_at;
                }
                if existing.body.is_none() {
                    existing.body = page.body.take();
                }
                if existing.html_url.is_none() {
                    existing.html_url = page.html_url.take();
                }
            }
            None => {
                page.provenance.module = true;
                index.insert(page.key.clone(), merged.len());
                merged.push(page);
            }
        }
    }
    merged
}

fn file_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/files/(\d+)").expect("static regex is valid"))
}

fn file_id_in(target: &str) -> Option<u64> {
    file_link_pattern()
        .captures(target)
        .and_then(|c| c[1].parse().ok())
}

/// File references in `body`, deduped by id in document order.
pub fn extract_linked_files(body: &str) -> Vec<LinkedFileReference> {
    let fragment = Html::parse_fragment(body);
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for node in fragment.root_element().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let el = element.value();
        let target = match el.name() {
            "a" => el.attr("href"),
            "img" | "iframe" | "embed" | "source" => el.attr("src"),
            "object" => el.attr("data"),
            _ => None,
        };
        let Some(file_id) = target.and_then(file_id_in) else {
            continue;
        };
        if !seen.insert(file_id) {
            continue;
        }
        let text: String = element.text().collect::<Vec<_>>().join(" ");
        let anchor_text = match text.split_whitespace().collect::<Vec<_>>().join(" ") {
            t if t.is_empty() => el.attr("alt").or(el.attr("title")).unwrap_or_default().to_string(),
            t => t,
        };
        refs.push(LinkedFileReference {
            file_id,
            anchor_text,
        });
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockTransport, Response};
    use crate::timestamp::parse_timestamp;

    fn page(key: &str, title: &str, updated: Option<&str>, body: Option<&str>) -> Page {
        Page {
            key: key.into(),
            title: title.into(),
            body: body.map(str::to_string),
            updated_at: updated.and_then(parse_timestamp),
            html_url: None,
            provenance: Provenance::default(),
        }
    }

    fn ok(url: &str, body: &str) -> Result<Response, TransportError> {
        Ok(Response {
            url: url.to_string(),
            status: 200,
            next: None,
            body: bytes::Bytes::from(body.to_string()),
        })
    }

    fn course() -> Course {
        Course {
            id: 9,
            name: "Biology".into(),
            code: None,
            access_restricted: false,
        }
    }

    #[test]
    fn merge_keeps_each_slug_once_in_listing_then_module_order() {
        let listing = vec![
            page("intro", "Intro", Some("2024-01-02T00:00:00Z"), Some("<p>l</p>")),
            page("both", "Both (listing)", Some("2024-03-01T00:00:00Z"), None),
        ];
        let modules = vec![
            page("module-only", "Module Only", None, Some("<p>m</p>")),
            page("both", "Both (module)", Some("2024-01-01T00:00:00Z"), Some("<p>mb</p>")),
        ];
        let merged = merge_pages(listing, modules);
        let keys: Vec<&str> = merged.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["intro", "both", "module-only"]);

        let both = &merged[1];
        assert_eq!(both.title, "Both (listing)");
        assert_eq!(both.updated_at, parse_timestamp("2024-03-01T00:00:00Z"));
        assert_eq!(both.body.as_deref(), Some("<p>mb</p>"));
        assert!(both.provenance.listing && both.provenance.module);
        assert!(!merged[0].provenance.module);
        assert!(!merged[2].provenance.listing);
    }

    #[test]
    fn duplicate_module_references_keep_first_seen_title() {
        let merged = merge_pages(
            vec![],
            vec![page("p", "First", None, None), page("p", "Second", None, None)],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "First");
    }

    #[test]
    fn linked_files_are_found_in_links_and_embeds() {
        let body = r#"
            <p>See <a href="https://lms.example/courses/9/files/101/download">the slides</a>.</p>
            <img src="/courses/9/files/202/preview" alt="diagram">
            <a href="/courses/9/files/101?wrap=1">again</a>
            <object data="/files/303"></object>
            <a href="https://example.com/files/abc">not a file id</a>
            <a href="/courses/9/pages/intro">page</a>
        "#;
        let refs = extract_linked_files(body);
        let ids: Vec<u64> = refs.iter().map(|r| r.file_id).collect();
        assert_eq!(ids, vec![101, 202, 303]);
        assert_eq!(refs[0].anchor_text, "the slides");
        assert_eq!(refs[1].anchor_text, "diagram");
    }

    #[test]
    fn overflowing_file_ids_are_skipped() {
        let refs = extract_linked_files(r#"<a href="/files/99999999999999999999999">x</a>"#);
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn auth_refusal_on_course_fetch_is_fatal() {
        let mut transport = MockTransport::new();
        transport.expect_request().returning(|_, url, _| {
            Err(TransportError::Status {
                status: 401,
                url: url.to_string(),
                message: "unauthorized".into(),
            })
        });
        let discovery = Discovery::new(transport);
        let err = discovery.fetch_course(9).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }

    #[tokio::test]
    async fn restricted_courses_are_filtered() {
        let mut transport = MockTransport::new();
        transport.expect_page_size().return_const(100u32);
        transport.expect_request().returning(|_, url, _| {
            ok(
                url,
                r#"[{"id":1,"name":"Open"},{"id":2,"name":"Old","access_restricted_by_date":true}]"#,
            )
        });
        let courses = Discovery::new(transport).list_courses().await.unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].name, "Open");
    }

    #[tokio::test]
    async fn page_listing_failure_is_suppressed() {
        let mut transport = MockTransport::new();
        transport.expect_page_size().return_const(100u32);
        transport.expect_request().returning(|_, url, _| {
            Err(TransportError::Status {
                status: 404,
                url: url.to_string(),
                message: "disabled".into(),
            })
        });
        let pages = Discovery::new(transport).listed_pages(&course()).await;
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn module_walk_emits_files_and_pages_and_records_failures() {
        let mut transport = MockTransport::new();
        transport.expect_page_size().return_const(100u32);
        transport.expect_request().returning(|_, url, _| match url {
            "/api/v1/courses/9/modules" => ok(url, r#"[{"id":1,"name":"Week 1"}]"#),
            "/api/v1/courses/9/modules/1/items" => ok(
                url,
                r#"[
                    {"id":10,"title":"Syllabus","type":"File","content_id":55},
                    {"id":11,"title":"Intro","type":"Page","page_url":"intro"},
                    {"id":12,"title":"Quiz","type":"Quiz"},
                    {"id":13,"title":"Broken","type":"Page","page_url":"broken"}
                ]"#,
            ),
            "/api/v1/files/55" => ok(
                url,
                r#"{"id":55,"display_name":"syllabus.pdf","size":10,"url":"https://lms/dl/55"}"#,
            ),
            "/api/v1/courses/9/pages/intro" => ok(
                url,
                r#"{"url":"intro","title":"Intro","body":"<p>hi</p>","updated_at":"2024-11-29T12:00:00Z"}"#,
            ),
            _ => Err(TransportError::Status {
                status: 500,
                url: url.to_string(),
                message: String::new(),
            }),
        });
        let (items, failures) = Discovery::new(transport).modules(&course()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind(), ItemKind::ModuleFile);
        assert_eq!(items[1].name(), "Intro");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "Broken");
    }

    #[tokio::test]
    async fn pages_without_a_link_get_one_from_the_web_base() {
        let mut transport = MockTransport::new();
        transport.expect_page_size().return_const(100u32);
        transport.expect_request().returning(|_, url, _| match url {
            "/api/v1/courses/9/pages" => ok(
                url,
                r#"[
                    {"url":"intro","title":"Intro","html_url":"https://lms.example/courses/9/pages/intro"},
                    {"url":"schedule","title":"Schedule"}
                ]"#,
            ),
            _ => ok(url, "[]"),
        });
        let found = Discovery::new(transport)
            .with_web_base("https://lms.example/")
            .discover(&course())
            .await;
        let links: Vec<Option<&str>> = found.pages.iter().map(|p| p.html_url.as_deref()).collect();
        assert_eq!(
            links,
            vec![
                Some("https://lms.example/courses/9/pages/intro"),
                Some("https://lms.example/courses/9/pages/schedule"),
            ]
        );
    }

    #[tokio::test]
    async fn without_a_web_base_missing_links_stay_missing() {
        let mut transport = MockTransport::new();
        transport.expect_page_size().return_const(100u32);
        transport.expect_request().returning(|_, url, _| match url {
            "/api/v1/courses/9/pages" => ok(url, r#"[{"url":"schedule","title":"Schedule"}]"#),
            _ => ok(url, "[]"),
        });
        let found = Discovery::new(transport).discover(&course()).await;
        assert_eq!(found.pages[0].html_url, None);
    }
}
