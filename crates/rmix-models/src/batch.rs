//! Batch requests and output naming.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::clip::Combination;
use crate::error::{ModelError, ModelResult};
use crate::job::JobId;
use crate::settings::{AudioSettings, TextSettings};

/// Default container extension for rendered outputs.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Identifier grouping the outputs of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Generate a new random batch ID (12 hex characters).
    pub fn new() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(raw[..12].to_string())
    }

    /// Create from a caller-provided string, rejecting anything that is not a
    /// plain file-name fragment.
    pub fn parse(s: impl Into<String>) -> ModelResult<Self> {
        let s = s.into();
        let valid = !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(s))
        } else {
            Err(ModelError::invalid_id(format!("batch id '{s}'")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A caller's submission: combinations plus shared settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    pub combinations: Vec<Combination>,
    /// Hook texts referenced by `Combination::hook_index`
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub text: TextSettings,
    #[serde(default)]
    pub audio: AudioSettings,
}

impl BatchRequest {
    pub fn new(combinations: Vec<Combination>, hooks: Vec<String>) -> Self {
        Self {
            batch_id: None,
            combinations,
            hooks,
            text: TextSettings::default(),
            audio: AudioSettings::default(),
        }
    }

    pub fn with_batch_id(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_text(mut self, text: TextSettings) -> Self {
        self.text = text;
        self
    }

    pub fn with_audio(mut self, audio: AudioSettings) -> Self {
        self.audio = audio;
        self
    }

    /// Validate batch-wide settings. Per-combination problems are not
    /// errors here; they cause the combination to be skipped.
    pub fn check(&self) -> ModelResult<()> {
        self.text.check()?;
        self.audio.check()?;
        if let Some(batch_id) = &self.batch_id {
            BatchId::parse(batch_id.as_str())?;
        }
        Ok(())
    }
}

/// A combination that was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SkippedCombination {
    pub index: usize,
    pub reason: String,
}

/// Result of a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchSubmission {
    pub batch_id: BatchId,
    /// (combination index, job id) for every admitted combination
    pub jobs: Vec<(usize, JobId)>,
    pub skipped: Vec<SkippedCombination>,
}

impl BatchSubmission {
    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|(_, id)| id.clone()).collect()
    }
}

/// Where outputs land and how they are addressed.
///
/// Files are named `{batchId}_{index}.{ext}` inside a per-batch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub url_prefix: String,
    pub extension: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into(),
            extension: OUTPUT_EXTENSION.to_string(),
        }
    }

    pub fn file_name(&self, batch_id: &BatchId, index: usize) -> String {
        format!("{}_{}.{}", batch_id, index, self.extension)
    }

    pub fn batch_dir(&self, batch_id: &BatchId) -> PathBuf {
        self.root.join(batch_id.as_str())
    }

    pub fn output_path(&self, batch_id: &BatchId, index: usize) -> PathBuf {
        self.batch_dir(batch_id).join(self.file_name(batch_id, index))
    }

    pub fn output_url(&self, batch_id: &BatchId, index: usize) -> String {
        format!(
            "{}/{}/{}",
            self.url_prefix.trim_end_matches('/'),
            batch_id,
            self.file_name(batch_id, index)
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
