//! Render worker for rmix.
//!
//! This crate provides:
//! - Batch admission against a clip catalog
//! - A bounded job executor with graceful shutdown
//! - Worker configuration, structured job logging and metrics

pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod submit;

pub use catalog::{ClipCatalog, FsClipCatalog};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use submit::{wait_for_terminal, BatchSubmitter};
