//! Shared types used across modules
//!
//! Inbound annotation candidates and the review contexts that accompany them.
//! Field names serialize in camelCase to match the JSON produced by the
//! upstream vision pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest coordinate magnitude accepted in an annotation box
///
/// Keeps every sum, difference and running mean over boxes finite.
pub const MAX_COORDINATE: f64 = 1.0e9;

/// Axis-aligned bounding box of an annotated feature
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Center point of the box
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn diagonal(&self) -> f64 {
        (self.width * self.width + self.height * self.height).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Coordinates finite and within [`MAX_COORDINATE`], no negative extent
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite() && v.abs() <= MAX_COORDINATE)
            && self.width >= 0.0
            && self.height >= 0.0
    }

    /// Delta that moves `self` onto `target`
    pub fn delta_to(&self, target: &BoundingBox) -> BoxDelta {
        BoxDelta {
            dx: target.x - self.x,
            dy: target.y - self.y,
            d_width: target.width - self.width,
            d_height: target.height - self.height,
        }
    }
}

/// Positional/size difference between two boxes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxDelta {
    pub dx: f64,
    pub dy: f64,
    pub d_width: f64,
    pub d_height: f64,
}

impl BoxDelta {
    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0 && self.d_width == 0.0 && self.d_height == 0.0
    }
}

/// An annotation candidate produced by the AI vision service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Feature label; this is the name patterns are keyed by
    pub spanish_term: String,
    #[serde(default)]
    pub english_term: Option<String>,
    pub bounding_box: BoundingBox,
    #[serde(default, rename = "type")]
    pub annotation_type: Option<String>,
    #[serde(default)]
    pub difficulty_level: Option<u8>,
    #[serde(default)]
    pub pronunciation: Option<String>,
    pub confidence: f64,
}

/// Why an annotation cannot be learned from
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnnotationError {
    #[error("annotation has an empty feature name")]
    EmptyFeatureName,

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("bounding box {0:?} is not a valid box")]
    InvalidBoundingBox(BoundingBox),
}

impl Annotation {
    pub fn new(spanish_term: impl Into<String>, bounding_box: BoundingBox, confidence: f64) -> Self {
        Self {
            spanish_term: spanish_term.into(),
            english_term: None,
            bounding_box,
            annotation_type: None,
            difficulty_level: None,
            pronunciation: None,
            confidence,
        }
    }

    /// Check that the annotation carries usable evidence
    pub fn validate(&self) -> Result<(), AnnotationError> {
        if self.spanish_term.trim().is_empty() {
            return Err(AnnotationError::EmptyFeatureName);
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(AnnotationError::ConfidenceOutOfRange(self.confidence));
        }
        if !self.bounding_box.is_valid() {
            return Err(AnnotationError::InvalidBoundingBox(self.bounding_box));
        }
        Ok(())
    }
}

/// Context for a batch of raw observations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningContext {
    pub species: String,
    /// Prompt that produced the batch, if known
    pub prompt: Option<String>,
}

impl LearningContext {
    pub fn new(species: impl Into<String>) -> Self {
        Self {
            species: species.into(),
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalContext {
    pub species: String,
    pub image_id: String,
    pub reviewer_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionContext {
    pub species: String,
    pub image_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionContext {
    pub species: String,
    pub image_id: String,
    pub reviewer_id: String,
}

/// Input for prompt enhancement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    pub species: String,
    /// Features the prompt asks for; empty means every known feature
    #[serde(default)]
    pub target_features: Vec<String>,
}
