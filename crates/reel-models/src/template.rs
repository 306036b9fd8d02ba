//! Video templates and background music tracks.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::encoding::EncodingConfig;

/// Unique identifier for a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TemplateId(pub String);

impl TemplateId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a music track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MusicId(pub String);

impl MusicId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MusicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How one scene hands over to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    #[default]
    Cut,
    /// Short fade in and out on every scene
    Fade,
}

/// Fixed set of tonal adjustments applied to still frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TonalPreset {
    /// Boosted saturation and slight brightness lift
    Vivid,
    /// Reduced saturation
    Muted,
    /// Brightness lift
    Bright,
    /// Orange tint
    Warm,
    /// Blue tint
    Cool,
    /// Grayscale
    Mono,
    /// Brown tint over grayscale
    Sepia,
}

impl TonalPreset {
    pub const ALL: &'static [TonalPreset] = &[
        TonalPreset::Vivid,
        TonalPreset::Muted,
        TonalPreset::Bright,
        TonalPreset::Warm,
        TonalPreset::Cool,
        TonalPreset::Mono,
        TonalPreset::Sepia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TonalPreset::Vivid => "vivid",
            TonalPreset::Muted => "muted",
            TonalPreset::Bright => "bright",
            TonalPreset::Warm => "warm",
            TonalPreset::Cool => "cool",
            TonalPreset::Mono => "mono",
            TonalPreset::Sepia => "sepia",
        }
    }
}

/// Layout and timing of a composed video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoTemplate {
    pub id: TemplateId,
    pub name: String,

    /// Output width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Output height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Display time of one scene in seconds
    #[serde(default = "default_scene_duration")]
    pub scene_duration_secs: f64,

    #[serde(default)]
    pub transition: TransitionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tonal_preset: Option<TonalPreset>,

    #[serde(default)]
    pub encoding: EncodingConfig,
}

fn default_width() -> u32 {
    1080
}
fn default_height() -> u32 {
    1920
}
fn default_fps() -> u32 {
    30
}
fn default_scene_duration() -> f64 {
    3.0
}

impl VideoTemplate {
    /// Portrait 1080x1920 template with default timing.
    pub fn new(id: TemplateId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            scene_duration_secs: default_scene_duration(),
            transition: TransitionKind::Cut,
            tonal_preset: None,
            encoding: EncodingConfig::default(),
        }
    }

    pub fn with_scene_duration(mut self, secs: f64) -> Self {
        self.scene_duration_secs = secs;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Checks the settings a render cannot proceed without.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("template {} has zero resolution", self.id));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(format!(
                "template {} resolution {}x{} must be even",
                self.id, self.width, self.height
            ));
        }
        if self.fps == 0 {
            return Err(format!("template {} has zero fps", self.id));
        }
        if !(self.scene_duration_secs.is_finite() && self.scene_duration_secs > 0.0) {
            return Err(format!("template {} scene duration must be positive", self.id));
        }
        Ok(())
    }
}

/// A background music track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MusicTrack {
    pub id: MusicId,
    #[serde(default)]
    pub title: String,
    /// Local path or http(s) URL of the audio file
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}
