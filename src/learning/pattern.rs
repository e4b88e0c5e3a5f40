//! Learned pattern model
//!
//! One `LearnedPattern` per (normalized feature, species) pair. All numeric
//! adaptation rules live here as plain methods so they can be exercised
//! without a store or a runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::LearningConfig;
use crate::types::{Annotation, BoundingBox, BoxDelta, MAX_COORDINATE};

/// Leading articles dropped from feature names ("el pico" -> "pico")
const ARTICLES: &[&str] = &["el", "la", "los", "las", "un", "una", "unos", "unas"];

/// Canonical feature label used in pattern keys
///
/// `:` separates feature from species in keys, so it is treated as
/// whitespace here.
pub fn normalize_feature_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase().replace(':', " ");
    let words: Vec<&str> = lowered.split_whitespace().collect();

    match words.split_first() {
        Some((first, rest)) if !rest.is_empty() && ARTICLES.contains(first) => rest.join(" "),
        _ => words.join(" "),
    }
}

/// Composite key: `normalize(feature) + ":" + species`
///
/// Normalized features never contain `:`, so the first `:` always ends the
/// feature part and distinct pairs never share a key.
pub fn pattern_key(feature_name: &str, species: &str) -> String {
    join_key(&normalize_feature_name(feature_name), species)
}

fn join_key(feature_type: &str, species: &str) -> String {
    format!("{}:{}", feature_type, species)
}

/// Ranking used by recommendations and analytics: more evidence first, then
/// higher confidence, then feature name for a stable order
pub(crate) fn by_evidence(a: &LearnedPattern, b: &LearnedPattern) -> Ordering {
    b.observation_count
        .cmp(&a.observation_count)
        .then_with(|| {
            b.average_confidence
                .partial_cmp(&a.average_confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.feature_type.cmp(&b.feature_type))
        .then_with(|| a.species_context.cmp(&b.species_context))
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Running summary of the boxes seen for a feature
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxSummary {
    /// Running mean over every folded box
    pub average: BoundingBox,
    /// Most recent boxes, oldest first
    #[serde(default)]
    pub samples: Vec<BoundingBox>,
    #[serde(default)]
    pub sample_count: u64,
}

impl BoxSummary {
    fn seeded(bbox: BoundingBox) -> Self {
        Self {
            average: bbox,
            samples: vec![bbox],
            sample_count: 1,
        }
    }

    pub fn fold(&mut self, bbox: BoundingBox, max_samples: usize) {
        self.sample_count += 1;
        let n = self.sample_count as f64;
        let avg = &mut self.average;
        avg.x += (bbox.x - avg.x) / n;
        avg.y += (bbox.y - avg.y) / n;
        avg.width += (bbox.width - avg.width) / n;
        avg.height += (bbox.height - avg.height) / n;

        self.samples.push(bbox);
        if self.samples.len() > max_samples {
            let excess = self.samples.len() - max_samples;
            self.samples.drain(..excess);
        }
    }
}

/// Average correction applied by reviewers to AI-detected boxes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionAdjustment {
    pub dx: f64,
    pub dy: f64,
    pub d_width: f64,
    pub d_height: f64,
    pub sample_count: u64,
}

impl PositionAdjustment {
    fn fold(&mut self, delta: &BoxDelta) {
        self.sample_count += 1;
        let n = self.sample_count as f64;
        self.dx += (delta.dx - self.dx) / n;
        self.dy += (delta.dy - self.dy) / n;
        self.d_width += (delta.d_width - self.d_width) / n;
        self.d_height += (delta.d_height - self.d_height) / n;
    }

    pub fn delta(&self) -> BoxDelta {
        BoxDelta {
            dx: self.dx,
            dy: self.dy,
            d_width: self.d_width,
            d_height: self.d_height,
        }
    }
}

/// Open metadata bag; unknown persisted keys are kept in `extra`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMetadata {
    #[serde(default)]
    pub rejection_reasons: BTreeMap<String, u32>,
    #[serde(default)]
    pub approvals: u64,
    #[serde(default)]
    pub corrections: u64,
    /// Feature name as first seen, before normalization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The unit of learned knowledge for one (species, feature) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedPattern {
    pub id: String,
    pub feature_type: String,
    pub species_context: String,
    #[serde(default)]
    pub successful_prompts: Vec<String>,
    #[serde(default)]
    pub common_bounding_boxes: BoxSummary,
    pub average_confidence: f64,
    pub observation_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_adjustment: Option<PositionAdjustment>,
    #[serde(default)]
    pub metadata: PatternMetadata,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl LearnedPattern {
    /// Pattern with no evidence yet
    pub fn new(feature_name: &str, species: &str) -> Self {
        let now = Utc::now();
        let feature_type = normalize_feature_name(feature_name);
        Self {
            id: join_key(&feature_type, species),
            feature_type,
            species_context: species.to_string(),
            successful_prompts: Vec::new(),
            common_bounding_boxes: BoxSummary::default(),
            average_confidence: 0.0,
            observation_count: 0,
            position_adjustment: None,
            metadata: PatternMetadata {
                display_name: Some(feature_name.trim().to_string()),
                ..Default::default()
            },
            created_at: now,
            last_updated: now,
        }
    }

    /// New pattern seeded from one annotation
    pub fn seed(annotation: &Annotation, species: &str) -> Self {
        let mut pattern = Self::new(&annotation.spanish_term, species);
        pattern.common_bounding_boxes = BoxSummary::seeded(annotation.bounding_box);
        pattern.average_confidence = clamp_unit(annotation.confidence);
        pattern.observation_count = 1;
        pattern
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Fold in one qualifying observation
    pub fn observe(&mut self, annotation: &Annotation, config: &LearningConfig) {
        let n = self.observation_count as f64;
        self.average_confidence =
            clamp_unit((self.average_confidence * n + annotation.confidence) / (n + 1.0));
        self.observation_count += 1;
        self.common_bounding_boxes
            .fold(annotation.bounding_box, config.max_box_samples);
        self.touch();
    }

    /// Remember a prompt that produced good output; most recent last
    pub fn record_prompt(&mut self, prompt: &str, max_prompts: usize) {
        let prompt = prompt.trim();
        if prompt.is_empty() || max_prompts == 0 {
            return;
        }
        self.successful_prompts.retain(|p| p != prompt);
        self.successful_prompts.push(prompt.to_string());
        if self.successful_prompts.len() > max_prompts {
            let excess = self.successful_prompts.len() - max_prompts;
            self.successful_prompts.drain(..excess);
        }
    }

    /// Reviewer approval: move confidence toward 1.0
    pub fn approve(&mut self, annotation: &Annotation, config: &LearningConfig) {
        let avg = self.average_confidence;
        self.average_confidence = clamp_unit(avg + (1.0 - avg) * config.approval_boost);
        self.observation_count += 1;
        self.common_bounding_boxes
            .fold(annotation.bounding_box, config.max_box_samples);
        self.metadata.approvals += 1;
        self.touch();
    }

    /// Reviewer rejection: move confidence toward 0.0 and count the reason
    pub fn reject(&mut self, reason: &str, config: &LearningConfig) {
        let avg = self.average_confidence;
        self.average_confidence = clamp_unit(avg - avg * config.rejection_penalty);
        *self
            .metadata
            .rejection_reasons
            .entry(reason.to_string())
            .or_insert(0) += 1;
        self.touch();
    }

    /// Reviewer correction: weighted confidence update plus position learning
    ///
    /// Returns whether the position adjustment changed.
    pub fn correct(
        &mut self,
        original: &Annotation,
        corrected: &Annotation,
        config: &LearningConfig,
    ) -> bool {
        let n = self.observation_count as f64;
        let w = config.correction_weight;
        self.average_confidence =
            clamp_unit((self.average_confidence * n + corrected.confidence * w) / (n + w));
        self.observation_count += 1;
        self.common_bounding_boxes
            .fold(corrected.bounding_box, config.max_box_samples);
        self.metadata.corrections += 1;
        self.touch();

        let delta = original.bounding_box.delta_to(&corrected.bounding_box);
        if delta.is_zero() {
            return false;
        }
        self.position_adjustment
            .get_or_insert_with(PositionAdjustment::default)
            .fold(&delta);
        true
    }

    /// Reason with the most rejections, if any
    pub fn dominant_rejection(&self) -> Option<(&str, u32)> {
        self.metadata
            .rejection_reasons
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(reason, count)| (reason.as_str(), *count))
    }

    pub fn total_rejections(&self) -> u32 {
        self.metadata.rejection_reasons.values().sum()
    }

    /// Store key derived from the pattern's own fields
    pub fn key(&self) -> String {
        join_key(&self.feature_type, &self.species_context)
    }

    /// Every number is one the learning rules could have produced: finite,
    /// boxes within the accepted coordinate range
    pub fn values_in_range(&self) -> bool {
        let boxes = &self.common_bounding_boxes;
        let adjustment_ok = self.position_adjustment.as_ref().map_or(true, |a| {
            [a.dx, a.dy, a.d_width, a.d_height]
                .iter()
                .all(|v| v.is_finite() && v.abs() <= 2.0 * MAX_COORDINATE)
        });
        self.average_confidence.is_finite()
            && std::iter::once(&boxes.average)
                .chain(boxes.samples.iter())
                .all(|b| b.is_valid())
            && adjustment_ok
    }
}
