//! CLI glue for course-mirror: argument parsing, wiring of transport and
//! backend from config, and the per-course loop. Business logic lives in
//! `course-mirror-core`.
//!
//! For programmatic or integration use, call [`run`] with a constructed [`Cli`].

use crate::load_config::{load_config, CliConfig, StorageSection};
use crate::report::render_summary;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use course_mirror_core::contract::{StorageBackend, Transport};
use course_mirror_core::discovery::Discovery;
use course_mirror_core::error::SyncError;
use course_mirror_core::model::Course;
use course_mirror_core::storage::{DriveBackend, FilesystemBackend};
use course_mirror_core::transport::HttpTransport;
use course_mirror_core::{sync_course, SyncOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};

/// Mirror learning-management courses into a folder tree.
#[derive(Parser)]
#[clap(
    name = "course-mirror",
    version,
    about = "Mirror course assignments, pages and files into a local folder or Google Drive"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mirror every configured course using the given config file
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    info!("trace_initialised");
    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(config)?;
            info!(command = "sync", "Starting course mirror");
            sync(config).await
        }
    }
}

fn build_backend(config: &CliConfig, transport: &HttpTransport) -> Result<Box<dyn StorageBackend>> {
    let backend: Box<dyn StorageBackend> = match &config.storage {
        StorageSection::Local { root_dir } => Box::new(FilesystemBackend::new(root_dir)),
        StorageSection::GoogleDrive { root_folder_name } => {
            let token = config
                .drive_token
                .as_deref()
                .ok_or_else(|| anyhow!("google_drive storage needs an access token"))?;
            Box::new(DriveBackend::new(
                transport.client(),
                token,
                root_folder_name,
                &config.options.performance,
            ))
        }
    };
    Ok(backend)
}

/// Courses ready to sync, plus configured ids whose details could not be
/// fetched.
pub struct ResolvedCourses {
    pub courses: Vec<Course>,
    pub unresolved: Vec<(u64, SyncError)>,
}

/// Fetch the details of each configured id; no ids means every available
/// course. Refused credentials stop the run. Any other fetch failure only
/// takes that course out, before anything is written for it.
pub async fn resolve_courses<T: Transport>(
    discovery: &Discovery<T>,
    ids: &[u64],
) -> Result<ResolvedCourses> {
    if ids.is_empty() {
        let courses = discovery
            .list_courses()
            .await
            .context("Failed to list available courses")?;
        return Ok(ResolvedCourses {
            courses,
            unresolved: Vec::new(),
        });
    }
    let mut resolved = ResolvedCourses {
        courses: Vec::new(),
        unresolved: Vec::new(),
    };
    for &id in ids {
        match discovery.fetch_course(id).await {
            Ok(course) => resolved.courses.push(course),
            Err(e @ SyncError::Auth(_)) => {
                error!(course_id = id, error = %e, "Credentials refused, stopping");
                return Err(e).context(format!("course {id}"));
            }
            Err(e) => {
                error!(course_id = id, error = %e, "Could not fetch course details");
                resolved.unresolved.push((id, e));
            }
        }
    }
    Ok(resolved)
}

/// Resolve and mirror every course, writing the per-course report to `out`.
/// `Err` when credentials are refused or any course failed outright.
pub async fn sync_courses<T: Transport>(
    discovery: &Discovery<T>,
    backend: &dyn StorageBackend,
    options: &SyncOptions,
    ids: &[u64],
    out: &mut impl Write,
) -> Result<()> {
    let resolved = resolve_courses(discovery, ids).await?;
    info!(
        count = resolved.courses.len(),
        unresolved = resolved.unresolved.len(),
        "Resolved courses"
    );

    let mut failed_courses = Vec::new();
    for (id, e) in &resolved.unresolved {
        writeln!(out, "== course {id} ==\n  FAILED: {e}")?;
        failed_courses.push(*id);
    }
    for course in &resolved.courses {
        match sync_course(discovery, course, backend, options).await {
            Ok(summary) => {
                write!(out, "{}", render_summary(course, &summary))?;
            }
            Err(e @ SyncError::Auth(_)) => {
                error!(course_id = course.id, error = %e, "Credentials refused, stopping");
                return Err(e).context(format!("course {}", course.id));
            }
            Err(e) => {
                error!(course_id = course.id, error = %e, "Course sync failed");
                writeln!(out, "== {} ==\n  FAILED: {e}", course.name)?;
                failed_courses.push(course.id);
            }
        }
    }

    if failed_courses.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("sync failed for courses {:?}", failed_courses))
    }
}

async fn sync(config: CliConfig) -> Result<()> {
    config.options.trace_loaded();
    let transport = HttpTransport::new(
        &config.remote.base_url,
        &config.remote_token,
        &config.options.performance,
    )
    .context("Failed to build HTTP transport")?;
    let backend = build_backend(&config, &transport)?;
    let discovery = Discovery::new(transport).with_web_base(&config.remote.base_url);

    sync_courses(
        &discovery,
        backend.as_ref(),
        &config.options,
        &config.remote.courses,
        &mut std::io::stdout(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_mirror_core::contract::{MockTransport, Response};
    use course_mirror_core::error::TransportError;
    use tempfile::tempdir;

    fn ok(url: &str, body: &str) -> Result<Response, TransportError> {
        Ok(Response {
            url: url.to_string(),
            status: 200,
            next: None,
            body: body.as_bytes().to_vec().into(),
        })
    }

    fn failing(url: &str, status: u16) -> Result<Response, TransportError> {
        Err(TransportError::Status {
            status,
            url: url.to_string(),
            message: String::new(),
        })
    }

    /// Course 42 exists with an empty syllabus; course 7 cannot be fetched.
    fn remote(course_7_status: u16) -> MockTransport {
        let mut transport = MockTransport::new();
        transport.expect_page_size().return_const(100u32);
        transport.expect_request().returning(move |_, url, _| match url {
            "/api/v1/courses/42" => ok(url, r#"{"id":42,"name":"Biology 101"}"#),
            "/api/v1/courses/7" => failing(url, course_7_status),
            "/api/v1/courses/42/pages" => ok(url, r#"[{"url":"intro","title":"Intro","body":"<p>Hello</p>","updated_at":"2024-11-29T12:00:00Z"}]"#),
            _ => ok(url, "[]"),
        });
        transport
    }

    #[tokio::test]
    async fn reports_use_the_fetched_course_name() {
        let root = tempdir().unwrap();
        let backend = FilesystemBackend::new(root.path());
        let discovery = Discovery::new(remote(500));
        let mut out = Vec::new();

        sync_courses(&discovery, &backend, &SyncOptions::default(), &[42], &mut out)
            .await
            .unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("== Biology 101 =="), "{out}");
        assert!(!out.contains("course 42"));
        assert!(root.path().join("Biology 101").join("Pages").join("All Pages.pdf").is_file());
    }

    #[tokio::test]
    async fn unfetchable_course_fails_without_touching_storage() {
        let root = tempdir().unwrap();
        let backend = FilesystemBackend::new(root.path());
        let discovery = Discovery::new(remote(500));
        let mut out = Vec::new();

        let err = sync_courses(&discovery, &backend, &SyncOptions::default(), &[7, 42], &mut out)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("[7]"));
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("== course 7 ==\n  FAILED"));
        assert!(out.contains("== Biology 101 =="));
        assert!(!root.path().join("course 7").exists());
    }

    #[tokio::test]
    async fn refused_credentials_stop_resolution() {
        let discovery = Discovery::new(remote(401));
        let resolved = resolve_courses(&discovery, &[42, 7]).await;
        assert!(resolved.is_err());
    }
}
