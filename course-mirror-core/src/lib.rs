#![doc = "course-mirror-core: core engine for course-mirror."]

//! Discovery of remote course content, change detection against a destination,
//! PDF rendering of rich-text items and placement into a storage backend.
//! The CLI crate wires these together from a config file; everything here is
//! usable on its own.
//!
//! # Usage
//! Build a [`transport::HttpTransport`], wrap it in a [`discovery::Discovery`],
//! pick a backend from [`storage`] and call [`sync_course`] once per course.

pub mod change;
pub mod config;
pub mod contract;
pub mod discovery;
pub mod download;
pub mod error;
pub mod model;
pub mod render;
pub mod storage;
pub mod summary;
pub mod synchronise;
pub mod timestamp;
pub mod transport;

pub use config::{PerformanceOptions, SyncOptions};
pub use discovery::Discovery;
pub use error::SyncError;
pub use summary::{SummaryCollector, SyncOutcome};
pub use synchronise::sync_course;
