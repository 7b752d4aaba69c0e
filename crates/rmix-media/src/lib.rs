//! FFmpeg-backed media composition for rmix.
//!
//! This crate provides:
//! - Data-described stage invocations and an FFmpeg command builder
//! - A subprocess stage runner with bounded diagnostics and deadlines
//! - Hook text layout and the filter graphs built from it
//! - The reaction + demo composition pipeline

pub mod artifacts;
pub mod command;
pub mod error;
pub mod filters;
pub mod layout;
pub mod pipeline;
pub mod probe;
pub mod runner;

pub use artifacts::ArtifactScope;
pub use command::{FfmpegCommand, FfmpegInput, Stage, StageInvocation};
pub use error::{MediaError, MediaResult, PipelineError};
pub use layout::{layout_text, TextLayout};
pub use pipeline::{CompositionPipeline, PipelineConfig, RenderOutput, DEFAULT_REACTION_SECONDS};
pub use probe::{FfprobeProbe, MediaInfo, MediaProbe};
pub use runner::{check_binary, FfmpegRunner, StageRunner};
