use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Drive rejects resumable chunks that are not a multiple of 256 KiB.
pub const UPLOAD_CHUNK_GRANULARITY: u64 = 256 * 1024;

/// Tuning knobs for the transport and the cloud backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceOptions {
    pub request_timeout_secs: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Seconds; the n-th retry sleeps `backoff_factor * 2^(n-1)`.
    pub backoff_factor: f64,
    /// Passed to listing endpoints as `per_page`.
    pub page_size: u32,
    /// Idle connections kept per host in the shared pool.
    pub pool_size: usize,
    pub upload_chunk_size_mb: u64,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self {
            request_timeout_secs: 20,
            max_retries: 3,
            backoff_factor: 0.5,
            page_size: 100,
            pool_size: 20,
            upload_chunk_size_mb: 8,
        }
    }
}

impl PerformanceOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Upload chunk size in bytes, floored to 256 KiB and rounded down to a
    /// multiple of it.
    pub fn upload_chunk_bytes(&self) -> u64 {
        let requested = self.upload_chunk_size_mb.saturating_mul(1024 * 1024);
        let rounded = requested - requested % UPLOAD_CHUNK_GRANULARITY;
        rounded.max(UPLOAD_CHUNK_GRANULARITY)
    }

    pub fn trace_loaded(&self) {
        info!(
            timeout_secs = self.request_timeout_secs,
            max_retries = self.max_retries,
            backoff_factor = self.backoff_factor,
            page_size = self.page_size,
            pool_size = self.pool_size,
            chunk_mb = self.upload_chunk_size_mb,
            "Loaded performance options"
        );
    }
}

/// Everything a course pass needs beyond the remote and the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub performance: PerformanceOptions,
    /// Re-render assignment documents even when the remote reports no change.
    pub force_regenerate_assignments: bool,
    /// Where download staging files live; the system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
}

impl SyncOptions {
    pub fn trace_loaded(&self) {
        self.performance.trace_loaded();
        info!(
            force_regenerate_assignments = self.force_regenerate_assignments,
            staging_dir = ?self.staging_dir,
            "Loaded sync options"
        );
        debug!(?self, "Sync options loaded (full debug)");
    }
}
