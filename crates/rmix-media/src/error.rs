//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::command::Stage;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors from running a single subprocess stage.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{program} not found in PATH")]
    BinaryNotFound { program: String },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} stage exited with {}: {diagnostics}", describe_exit(.exit_code))]
    StageFailed {
        stage: Stage,
        exit_code: Option<i32>,
        /// Tail of the subprocess stderr
        diagnostics: String,
    },

    #[error("{stage} stage produced no output at {}", .path.display())]
    MissingOutput { stage: Stage, path: PathBuf },

    #[error("{stage} stage timed out after {secs} seconds")]
    Timeout { stage: Stage, secs: u64 },

    #[error("FFprobe command failed: {0}")]
    ProbeFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl MediaError {
    /// Create a stage failure error.
    pub fn stage_failed(stage: Stage, exit_code: Option<i32>, diagnostics: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            exit_code,
            diagnostics: diagnostics.into(),
        }
    }

    /// Create a probe failure error.
    pub fn probe_failed(message: impl Into<String>) -> Self {
        Self::ProbeFailed(message.into())
    }

    /// Subprocess ran but failed; running it again may succeed.
    ///
    /// Spawn failures and missing binaries are environment problems and are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediaError::StageFailed { .. }
                | MediaError::MissingOutput { .. }
                | MediaError::Timeout { .. }
                | MediaError::ProbeFailed(_)
                | MediaError::Io(_)
        )
    }
}

/// Errors from one composition pipeline invocation, tagged by the step that
/// aborted it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing asset: {}", .0.display())]
    MissingAsset(PathBuf),

    #[error("probing input failed: {0}")]
    Probe(#[source] MediaError),

    #[error("reaction stage failed: {0}")]
    ReactionStageFailed(#[source] MediaError),

    #[error("demo stage failed: {0}")]
    DemoStageFailed(#[source] MediaError),

    #[error("concatenation failed: {0}")]
    ConcatFailed(#[source] MediaError),

    #[error("audio mix stage failed: {0}")]
    MixStageFailed(#[source] MediaError),

    #[error("artifact handling failed: {0}")]
    Artifact(#[from] std::io::Error),
}

impl PipelineError {
    /// The stage that failed, when the failure came from a subprocess.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::ReactionStageFailed(_) => Some(Stage::Reaction),
            PipelineError::DemoStageFailed(_) => Some(Stage::Demo),
            PipelineError::ConcatFailed(_) => Some(Stage::Concat),
            PipelineError::MixStageFailed(_) => Some(Stage::Mix),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::MissingAsset(_) => false,
            PipelineError::Artifact(_) => true,
            PipelineError::Probe(e)
            | PipelineError::ReactionStageFailed(e)
            | PipelineError::DemoStageFailed(e)
            | PipelineError::ConcatFailed(e)
            | PipelineError::MixStageFailed(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_message() {
        let err = MediaError::stage_failed(Stage::Reaction, Some(1), "Invalid argument");
        assert_eq!(
            err.to_string(),
            "reaction stage exited with status 1: Invalid argument"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_spawn_failure_not_retryable() {
        let err = MediaError::SpawnFailed {
            program: "ffmpeg".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!err.is_retryable());
        assert!(!PipelineError::ReactionStageFailed(err).is_retryable());
    }

    #[test]
    fn test_pipeline_error_tags() {
        let err = PipelineError::ReactionStageFailed(MediaError::stage_failed(Stage::Reaction, None, ""));
        assert!(err.to_string().starts_with("reaction stage failed"));
        assert_eq!(err.stage(), Some(Stage::Reaction));
        assert!(!PipelineError::MissingAsset(PathBuf::from("/x")).is_retryable());
    }
}
