//! Source clips and the combinations that reference them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use validator::Validate;

use crate::error::{ModelError, ModelResult};

/// Identifier of an uploaded clip, as handed out by the upload subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ClipId(pub String);

impl ClipId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id can be used as a single path component.
    pub fn is_path_safe(&self) -> bool {
        let id = self.0.as_str();
        !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\', '\0'])
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClipId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What a clip is used for in a composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Reaction,
    Demo,
    Music,
}

impl ClipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipKind::Reaction => "reaction",
            ClipKind::Demo => "demo",
            ClipKind::Music => "music",
        }
    }

    /// Directory name used by the upload subsystem for this kind.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ClipKind::Reaction => "reactions",
            ClipKind::Demo => "demos",
            ClipKind::Music => "music",
        }
    }
}

impl fmt::Display for ClipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable reference to a source media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    pub id: ClipId,
    pub kind: ClipKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hint: Option<f64>,
}

impl Clip {
    pub fn new(id: impl Into<ClipId>, kind: ClipKind, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind,
            path: path.into(),
            duration_hint: None,
        }
    }

    pub fn with_duration_hint(mut self, seconds: f64) -> Self {
        self.duration_hint = Some(seconds);
        self
    }
}

impl From<String> for ClipId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Start offset plus optional duration, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrimWindow {
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub start: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(exclusive_min = 0.0))]
    pub duration: Option<f64>,
}

impl TrimWindow {
    pub fn new(start: f64, duration: Option<f64>) -> Self {
        Self { start, duration }
    }

    pub fn check(&self) -> ModelResult<()> {
        self.validate()?;
        Ok(())
    }
}

/// One requested pairing of reaction + demo (+ optional music + hook).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Combination {
    pub reaction_id: ClipId,
    pub demo_id: ClipId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_id: Option<ClipId>,
    /// Index into the batch's hook list
    pub hook_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_trim: Option<TrimWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_trim: Option<TrimWindow>,
}

impl Combination {
    pub fn new(reaction_id: impl Into<ClipId>, demo_id: impl Into<ClipId>, hook_index: usize) -> Self {
        Self {
            reaction_id: reaction_id.into(),
            demo_id: demo_id.into(),
            music_id: None,
            hook_index,
            reaction_trim: None,
            demo_trim: None,
        }
    }

    pub fn with_music(mut self, music_id: impl Into<ClipId>) -> Self {
        self.music_id = Some(music_id.into());
        self
    }

    pub fn with_reaction_trim(mut self, trim: TrimWindow) -> Self {
        self.reaction_trim = Some(trim);
        self
    }

    pub fn with_demo_trim(mut self, trim: TrimWindow) -> Self {
        self.demo_trim = Some(trim);
        self
    }

    /// Validate the trim windows and clip ids of this combination.
    pub fn check(&self) -> ModelResult<()> {
        for id in [Some(&self.reaction_id), Some(&self.demo_id), self.music_id.as_ref()]
            .into_iter()
            .flatten()
        {
            if !id.is_path_safe() {
                return Err(ModelError::invalid_id(id.as_str()));
            }
        }
        if let Some(trim) = &self.reaction_trim {
            trim.check()?;
        }
        if let Some(trim) = &self.demo_trim {
            trim.check()?;
        }
        Ok(())
    }
}
