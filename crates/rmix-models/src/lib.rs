//! Shared data models for the rmix renderer.
//!
//! This crate provides Serde-serializable types for:
//! - Clips and clip combinations
//! - Text overlay and audio mix settings
//! - Encoding configuration
//! - Render jobs, job state and job results
//! - Batch requests and output naming

pub mod batch;
pub mod clip;
pub mod encoding;
pub mod error;
pub mod job;
pub mod settings;

// Re-export common types
pub use batch::{BatchId, BatchRequest, BatchSubmission, OutputLayout, SkippedCombination};
pub use clip::{Clip, ClipId, ClipKind, Combination, TrimWindow};
pub use encoding::EncodingConfig;
pub use error::{ModelError, ModelResult};
pub use job::{JobId, JobResult, JobSnapshot, JobState, RenderJob};
pub use settings::{AudioSettings, TextAlign, TextPosition, TextSettings};
