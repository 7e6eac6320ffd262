//! `load_config`: reads the YAML config file and pulls secrets from the
//! environment. This is the only place untrusted YAML is parsed.
//!
//! Tokens never appear in the file:
//! - `CANVAS_API_TOKEN` is always required
//! - `GOOGLE_DRIVE_ACCESS_TOKEN` is required for the `google_drive` backend
//!
//! All errors are `anyhow` with context, surfaced at the CLI boundary.

use anyhow::{bail, Context, Result};
use course_mirror_core::config::{PerformanceOptions, SyncOptions};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const REMOTE_TOKEN_VAR: &str = "CANVAS_API_TOKEN";
pub const DRIVE_TOKEN_VAR: &str = "GOOGLE_DRIVE_ACCESS_TOKEN";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteSection {
    pub base_url: String,
    /// Course ids to mirror; empty means every available course.
    #[serde(default)]
    pub courses: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageSection {
    Local {
        root_dir: PathBuf,
    },
    GoogleDrive {
        #[serde(default = "default_root_folder_name")]
        root_folder_name: String,
    },
}

fn default_root_folder_name() -> String {
    "Courses".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub force_regenerate_assignments: bool,
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    remote: RemoteSection,
    storage: StorageSection,
    #[serde(default)]
    performance: PerformanceOptions,
    #[serde(default)]
    sync: SyncSection,
}

/// Loaded config plus secrets. No `Debug`: it holds tokens.
pub struct CliConfig {
    pub remote: RemoteSection,
    pub storage: StorageSection,
    pub options: SyncOptions,
    pub remote_token: String,
    pub drive_token: Option<String>,
}

fn required_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("environment variable {var} must be set"),
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");

    if raw.remote.base_url.trim().is_empty() {
        bail!("remote.base_url must not be empty");
    }

    let remote_token = required_env(REMOTE_TOKEN_VAR).context("remote API token missing")?;
    let drive_token = match raw.storage {
        StorageSection::GoogleDrive { .. } => {
            Some(required_env(DRIVE_TOKEN_VAR).context("google_drive storage needs an access token")?)
        }
        StorageSection::Local { .. } => None,
    };

    Ok(CliConfig {
        remote: raw.remote,
        storage: raw.storage,
        options: SyncOptions {
            performance: raw.performance,
            force_regenerate_assignments: raw.sync.force_regenerate_assignments,
            staging_dir: raw.sync.staging_dir,
        },
        remote_token,
        drive_token,
    })
}
