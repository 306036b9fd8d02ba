//! Composition inputs, scenes and outputs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::product::{ImageRef, ProductId};
use crate::template::{MusicId, TemplateId, TransitionKind};

/// Input to the video composition pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompositionRequest {
    pub product_id: ProductId,
    pub template_id: TemplateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_id: Option<MusicId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_text: Option<String>,
}

impl CompositionRequest {
    pub fn new(product_id: ProductId, template_id: TemplateId) -> Self {
        Self {
            product_id,
            template_id,
            music_id: None,
            narration_text: None,
        }
    }

    pub fn with_music(mut self, music_id: MusicId) -> Self {
        self.music_id = Some(music_id);
        self
    }

    pub fn with_narration(mut self, text: impl Into<String>) -> Self {
        self.narration_text = Some(text.into());
        self
    }

    /// Narration text if present and not blank.
    pub fn narration(&self) -> Option<&str> {
        self.narration_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// One timed visual unit of a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub image: ImageRef,
    /// Overlay text, empty when the scene has no key point
    pub text: String,
    pub duration_secs: f64,
    pub transition: TransitionKind,
}

/// Result of a successful composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompositionOutput {
    /// Local path or object URL of the video
    pub file_location: String,
    pub file_size: u64,
    pub thumbnail_location: String,
    /// Duration of the rendered video
    pub duration_secs: f64,
    /// Wall time spent rendering
    pub render_secs: f64,
    /// Object key when stored remotely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
}
