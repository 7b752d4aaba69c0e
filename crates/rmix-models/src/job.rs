//! Job definitions for render scheduling.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::batch::BatchId;
use crate::clip::{Clip, TrimWindow};
use crate::error::{ModelError, ModelResult};
use crate::settings::{AudioSettings, TextSettings};

/// Progress reported when a job is admitted.
pub const PROGRESS_ADMITTED: u8 = 0;
/// Progress reported once a worker picked the job up.
pub const PROGRESS_DISPATCHED: u8 = 10;
/// Progress reported at any terminal state.
pub const PROGRESS_DONE: u8 = 100;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Admitted, waiting for a worker slot
    #[default]
    Waiting,
    /// Owned by exactly one worker
    Active,
    /// Output produced
    Completed,
    /// Terminal failure
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Transitions are monotonic: waiting -> active -> {completed | failed}.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Waiting, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(ModelError::invalid_state(format!("unknown job state '{other}'"))),
        }
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn success(output_path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            success: true,
            output_path: Some(output_path.into()),
            url: Some(url.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output_path: None,
            url: None,
            error: Some(error.into()),
        }
    }
}

/// Point-in-time view of a job record, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Number of times a worker started this job
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// A freshly admitted record.
    pub fn waiting(id: JobId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Waiting,
            progress: PROGRESS_ADMITTED,
            result: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a state/progress update.
    ///
    /// Rejects non-monotonic transitions. Progress never decreases and is
    /// pinned to 100 once the job is terminal.
    pub fn advance(&mut self, state: JobState, progress: u8, result: Option<JobResult>) -> ModelResult<()> {
        if state != self.state && !self.state.can_transition_to(state) {
            return Err(ModelError::invalid_state(format!(
                "job {}: {} -> {} is not allowed",
                self.id, self.state, state
            )));
        }
        if state == self.state && self.state.is_terminal() {
            return Err(ModelError::invalid_state(format!(
                "job {} is already {}",
                self.id, self.state
            )));
        }

        if self.state == JobState::Waiting && state == JobState::Active {
            self.attempts += 1;
        }
        self.state = state;
        self.progress = if state.is_terminal() {
            PROGRESS_DONE
        } else {
            self.progress.max(progress.min(PROGRESS_DONE))
        };
        if result.is_some() {
            self.result = result;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Everything a worker needs to render one combination.
///
/// Clips are resolved at admission so workers never consult the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Batch the job belongs to
    pub batch_id: BatchId,
    /// Position of the combination within the batch
    pub index: usize,
    pub reaction: Clip,
    pub demo: Clip,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music: Option<Clip>,
    /// Hook text burned into the reaction segment
    pub hook: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_trim: Option<TrimWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_trim: Option<TrimWindow>,
    #[serde(default)]
    pub text: TextSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    /// Final output location
    pub output_path: PathBuf,
    /// Public URL of the output
    pub output_url: String,
    pub created_at: DateTime<Utc>,
}

impl RenderJob {
    /// Stem shared by the output file and the job's temp namespace.
    pub fn artifact_stem(&self) -> String {
        self.output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}_{}", self.batch_id, self.index))
    }
}
