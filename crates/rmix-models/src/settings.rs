//! Text overlay and audio mix settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::error::ModelResult;

/// Default share of the frame width available to hook text.
pub const DEFAULT_MAX_WIDTH_PERCENT: u8 = 60;
/// Default hook font size in pixels.
pub const DEFAULT_FONT_SIZE: u32 = 38;
/// Default music gain relative to the program audio.
pub const DEFAULT_MUSIC_VOLUME: f64 = 0.3;

/// Horizontal alignment of the hook text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

impl TextAlign {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextAlign::Left => "left",
            TextAlign::Center => "center",
            TextAlign::Right => "right",
        }
    }
}

impl fmt::Display for TextAlign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Vertical placement of the hook text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextPosition {
    Top,
    #[default]
    Center,
    Bottom,
}

impl TextPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextPosition::Top => "top",
            TextPosition::Center => "center",
            TextPosition::Bottom => "bottom",
        }
    }
}

impl fmt::Display for TextPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hook text styling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TextSettings {
    /// Share of the frame width the text may occupy (20-100)
    #[serde(default = "default_max_width_percent")]
    #[validate(range(min = 20, max = 100))]
    pub max_width_percent: u8,

    /// Font size in pixels (16-80)
    #[serde(default = "default_font_size")]
    #[validate(range(min = 16, max = 80))]
    pub font_size: u32,

    /// Horizontal alignment
    #[serde(default)]
    pub align: TextAlign,

    /// Vertical placement
    #[serde(default)]
    pub position: TextPosition,
}

fn default_max_width_percent() -> u8 {
    DEFAULT_MAX_WIDTH_PERCENT
}

fn default_font_size() -> u32 {
    DEFAULT_FONT_SIZE
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            max_width_percent: DEFAULT_MAX_WIDTH_PERCENT,
            font_size: DEFAULT_FONT_SIZE,
            align: TextAlign::default(),
            position: TextPosition::default(),
        }
    }
}

impl TextSettings {
    /// Validate ranges, returning a model error on the first violation set.
    pub fn check(&self) -> ModelResult<()> {
        self.validate()?;
        Ok(())
    }
}

/// Background music settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    /// Music gain against full-gain program audio (0.0-1.0)
    #[serde(default = "default_music_volume")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub music_volume: f64,
}

fn default_music_volume() -> f64 {
    DEFAULT_MUSIC_VOLUME
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            music_volume: DEFAULT_MUSIC_VOLUME,
        }
    }
}

impl AudioSettings {
    pub fn check(&self) -> ModelResult<()> {
        self.validate()?;
        Ok(())
    }
}
