//! Query/Advisory Layer - read-only use of learned patterns
//!
//! Prompt enhancement, annotation quality scoring, feature recommendations
//! and position adjustments. Nothing here mutates the store.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use super::engine::PatternEngine;
use super::pattern::{by_evidence, clamp_unit, normalize_feature_name, pattern_key, LearnedPattern};
use crate::types::{Annotation, BoundingBox, BoxDelta, PromptContext};

/// Default number of features returned by [`PatternEngine::get_recommended_features`]
pub const DEFAULT_RECOMMENDATION_LIMIT: usize = 10;

/// Successful prompt excerpt length in generated guidance
const PROMPT_EXCERPT_CHARS: usize = 120;

/// Score used for sub-scores with no evidence either way
const NEUTRAL_SCORE: f64 = 0.5;

/// Quality estimate for one annotation; every field is in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityScore {
    pub confidence: f64,
    pub bounding_box_quality: f64,
    pub prompt_effectiveness: f64,
    pub overall_quality: f64,
}

impl QualityScore {
    fn new(confidence: f64, bounding_box_quality: f64, prompt_effectiveness: f64) -> Self {
        let confidence = clamp_unit(confidence);
        let bounding_box_quality = clamp_unit(bounding_box_quality);
        let prompt_effectiveness = clamp_unit(prompt_effectiveness);
        let overall_quality = clamp_unit(
            0.4 * confidence + 0.35 * bounding_box_quality + 0.25 * prompt_effectiveness,
        );
        Self {
            confidence,
            bounding_box_quality,
            prompt_effectiveness,
            overall_quality,
        }
    }
}

/// Learned correction for one requested feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionAdjustedFeature {
    /// Feature name as requested
    pub feature: String,
    pub adjustment: BoxDelta,
    pub sample_count: u64,
}

/// Similarity of `candidate` to `reference`: 1.0 for the same box, falling
/// with center distance (relative to the larger diagonal) and area mismatch
fn box_similarity(candidate: &BoundingBox, reference: &BoundingBox) -> f64 {
    let (cx, cy) = candidate.center();
    let (rx, ry) = reference.center();
    let distance = ((cx - rx).powi(2) + (cy - ry).powi(2)).sqrt();
    let scale = candidate.diagonal().max(reference.diagonal());
    let position = if scale > 0.0 {
        1.0 - distance / scale
    } else if distance == 0.0 {
        1.0
    } else {
        0.0
    };

    let (a, b) = (candidate.area(), reference.area());
    let size = if a.max(b) > 0.0 { a.min(b) / a.max(b) } else { 1.0 };

    clamp_unit(0.7 * clamp_unit(position) + 0.3 * clamp_unit(size))
}

/// Best match against the running average and the retained samples
fn bounding_box_quality(candidate: &BoundingBox, pattern: &LearnedPattern) -> f64 {
    let boxes = &pattern.common_bounding_boxes;
    if boxes.sample_count == 0 {
        return NEUTRAL_SCORE;
    }
    std::iter::once(&boxes.average)
        .chain(boxes.samples.iter())
        .map(|reference| box_similarity(candidate, reference))
        .fold(0.0, f64::max)
}

/// Trust in a pattern from its history; saturates toward 1.0
fn prompt_effectiveness(observation_count: u64) -> f64 {
    1.0 - (-(observation_count as f64) / 10.0).exp()
}

fn excerpt(prompt: &str) -> String {
    let flat = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PROMPT_EXCERPT_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PROMPT_EXCERPT_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

impl PatternEngine {
    /// Append learned guidance to `base_prompt`
    ///
    /// The result always starts with `base_prompt`. Only patterns with enough
    /// observations contribute; with none, `base_prompt` comes back as is.
    pub async fn enhance_prompt(&self, base_prompt: &str, context: &PromptContext) -> String {
        self.ensure_initialized().await;

        let targets: HashSet<String> = context
            .target_features
            .iter()
            .map(|f| normalize_feature_name(f))
            .filter(|f| !f.is_empty())
            .collect();
        let min_observations = self.advisor.min_observations_for_guidance;
        let warn_above = self.advisor.rejection_warning_threshold;

        let patterns = self.store.read().await;
        let mut matched: Vec<&LearnedPattern> = patterns
            .values()
            .filter(|p| p.species_context == context.species)
            .filter(|p| targets.is_empty() || targets.contains(&p.feature_type))
            .filter(|p| p.observation_count >= min_observations)
            .collect();

        if matched.is_empty() {
            debug!("No established patterns for {}, prompt unchanged", context.species);
            return base_prompt.to_string();
        }
        matched.sort_by(|a, b| by_evidence(a, b));

        let mut guidance = format!(
            "\n\nLearned guidance for {} (from reviewed annotations):",
            context.species
        );
        for pattern in &matched {
            let avg = &pattern.common_bounding_boxes.average;
            let (cx, cy) = avg.center();
            guidance.push_str(&format!(
                "\n- {}: usually centered near ({:.0}, {:.0}), about {:.0}x{:.0}; average confidence {:.0}% over {} observations.",
                pattern.feature_type,
                cx,
                cy,
                avg.width,
                avg.height,
                pattern.average_confidence * 100.0,
                pattern.observation_count
            ));
            if let Some(prompt) = pattern.successful_prompts.last() {
                guidance.push_str(&format!("\n  Effective phrasing: \"{}\"", excerpt(prompt)));
            }
        }

        let mut cautions: Vec<(&str, &str, u32)> = matched
            .iter()
            .flat_map(|p| {
                p.metadata
                    .rejection_reasons
                    .iter()
                    .filter(|(_, count)| **count > warn_above)
                    .map(|(reason, count)| (p.feature_type.as_str(), reason.as_str(), *count))
            })
            .collect();
        if !cautions.is_empty() {
            cautions.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));
            guidance.push_str("\nCautions:");
            for (feature, reason, count) in cautions {
                guidance.push_str(&format!(
                    "\n- Annotations of \"{}\" were rejected {} times for \"{}\"; take extra care with this feature.",
                    feature, count, reason
                ));
            }
        }

        debug!(
            "Enhanced prompt for {} with {} patterns",
            context.species,
            matched.len()
        );
        format!("{}{}", base_prompt, guidance)
    }

    /// Score an annotation against what has been learned about its feature
    ///
    /// Without `species`, the best-evidenced pattern of that feature across
    /// all species is used. An unknown feature gets a neutral score driven by
    /// the annotation's own confidence.
    pub async fn evaluate_annotation_quality(
        &self,
        annotation: &Annotation,
        species: Option<&str>,
    ) -> QualityScore {
        self.ensure_initialized().await;

        let patterns = self.store.read().await;
        let pattern = match species {
            Some(species) => patterns.get(&pattern_key(&annotation.spanish_term, species)),
            None => {
                let feature = normalize_feature_name(&annotation.spanish_term);
                patterns
                    .values()
                    .filter(|p| p.feature_type == feature)
                    .min_by(|a, b| by_evidence(a, b))
            }
        };

        match pattern {
            None => QualityScore::new(annotation.confidence, NEUTRAL_SCORE, NEUTRAL_SCORE),
            Some(pattern) => QualityScore::new(
                0.5 * clamp_unit(annotation.confidence) + 0.5 * pattern.average_confidence,
                bounding_box_quality(&annotation.bounding_box, pattern),
                prompt_effectiveness(pattern.observation_count),
            ),
        }
    }

    /// Feature names for `species`, best-evidenced first
    pub async fn get_recommended_features(&self, species: &str, limit: usize) -> Vec<String> {
        self.ensure_initialized().await;

        let patterns = self.store.read().await;
        let mut candidates: Vec<&LearnedPattern> = patterns
            .values()
            .filter(|p| p.species_context == species)
            .collect();
        candidates.sort_by(|a, b| by_evidence(a, b));
        candidates
            .into_iter()
            .take(limit)
            .map(|p| p.feature_type.clone())
            .collect()
    }

    /// Learned position corrections for the requested features
    ///
    /// Features without correction history are omitted.
    pub async fn get_position_adjusted_features<S: AsRef<str>>(
        &self,
        species: &str,
        features: &[S],
    ) -> Vec<PositionAdjustedFeature> {
        self.ensure_initialized().await;

        let patterns = self.store.read().await;
        features
            .iter()
            .filter_map(|feature| {
                let feature = feature.as_ref();
                let adjustment = patterns
                    .get(&pattern_key(feature, species))?
                    .position_adjustment
                    .as_ref()?;
                Some(PositionAdjustedFeature {
                    feature: feature.to_string(),
                    adjustment: adjustment.delta(),
                    sample_count: adjustment.sample_count,
                })
            })
            .collect()
    }

    /// Apply the learned correction for this feature to an AI-detected box
    ///
    /// Returns the box unchanged when nothing has been learned. Width and
    /// height never go negative.
    pub async fn adjust_bounding_box(&self, annotation: &Annotation, species: &str) -> BoundingBox {
        self.ensure_initialized().await;

        let patterns = self.store.read().await;
        let bbox = annotation.bounding_box;
        let adjustment = patterns
            .get(&pattern_key(&annotation.spanish_term, species))
            .and_then(|p| p.position_adjustment.as_ref());

        match adjustment {
            None => bbox,
            Some(a) => BoundingBox {
                x: bbox.x + a.dx,
                y: bbox.y + a.dy,
                width: (bbox.width + a.d_width).max(0.0),
                height: (bbox.height + a.d_height).max(0.0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApprovalContext, CorrectionContext, LearningContext, RejectionContext};

    const SPECIES: &str = "Cardenal Rojo";

    fn observe(term: &str, bbox: BoundingBox, confidence: f64, times: usize) -> Vec<Annotation> {
        (0..times).map(|_| Annotation::new(term, bbox, confidence)).collect()
    }

    fn beak_box() -> BoundingBox {
        BoundingBox::new(100.0, 150.0, 50.0, 40.0)
    }

    #[test]
    fn test_box_similarity() {
        let a = beak_box();
        assert!((box_similarity(&a, &a) - 1.0).abs() < 1e-9);

        let near = BoundingBox::new(105.0, 152.0, 50.0, 40.0);
        let far = BoundingBox::new(900.0, 900.0, 10.0, 10.0);
        let s_near = box_similarity(&near, &a);
        let s_far = box_similarity(&far, &a);
        assert!(s_near > s_far);
        assert!((0.0..=1.0).contains(&s_far));

        let point = BoundingBox::default();
        assert_eq!(box_similarity(&point, &point), 1.0);
    }

    #[test]
    fn test_prompt_effectiveness_saturates() {
        assert_eq!(prompt_effectiveness(0), 0.0);
        assert!(prompt_effectiveness(5) < prompt_effectiveness(20));
        assert!(prompt_effectiveness(1000) <= 1.0);
        assert!(prompt_effectiveness(50) > 0.99);
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "word ".repeat(100);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert!(short.chars().count() <= PROMPT_EXCERPT_CHARS + 3);
        assert_eq!(excerpt("  a \n b "), "a b");
    }

    #[tokio::test]
    async fn test_enhance_prompt_needs_enough_observations() {
        let engine = PatternEngine::in_memory();
        let base = "Identify the visible features.";
        let context = PromptContext {
            species: SPECIES.to_string(),
            target_features: vec!["el pico".to_string()],
        };

        engine
            .learn_from_annotations(&observe("el pico", beak_box(), 0.9, 4), &LearningContext::new(SPECIES))
            .await;
        assert_eq!(engine.enhance_prompt(base, &context).await, base);

        engine
            .learn_from_annotations(
                &observe("el pico", beak_box(), 0.9, 1),
                &LearningContext::new(SPECIES).with_prompt("Outline the beak tightly"),
            )
            .await;
        let enhanced = engine.enhance_prompt(base, &context).await;
        assert!(enhanced.starts_with(base));
        assert!(enhanced.len() > base.len());
        assert!(enhanced.contains("pico"));
        assert!(enhanced.contains("Outline the beak tightly"));
        assert!(!enhanced.contains("Cautions"));
    }

    #[tokio::test]
    async fn test_enhance_prompt_filters_targets() {
        let engine = PatternEngine::in_memory();
        let context = LearningContext::new(SPECIES);
        engine.learn_from_annotations(&observe("el pico", beak_box(), 0.9, 5), &context).await;
        engine.learn_from_annotations(&observe("la cola", beak_box(), 0.9, 5), &context).await;

        let only_cola = PromptContext {
            species: SPECIES.to_string(),
            target_features: vec!["La Cola".to_string()],
        };
        let enhanced = engine.enhance_prompt("base", &only_cola).await;
        assert!(enhanced.contains("cola"));
        assert!(!enhanced.contains("pico"));

        let everything = PromptContext {
            species: SPECIES.to_string(),
            target_features: vec![],
        };
        let enhanced = engine.enhance_prompt("base", &everything).await;
        assert!(enhanced.contains("cola") && enhanced.contains("pico"));

        let other_species = PromptContext {
            species: "Colibrí".to_string(),
            target_features: vec![],
        };
        assert_eq!(engine.enhance_prompt("base", &other_species).await, "base");
    }

    #[tokio::test]
    async fn test_enhance_prompt_cautions_on_repeated_rejections() {
        let engine = PatternEngine::in_memory();
        let annotation = Annotation::new("el pico", beak_box(), 0.9);
        engine
            .learn_from_annotations(&observe("el pico", beak_box(), 0.9, 5), &LearningContext::new(SPECIES))
            .await;

        let rejection = RejectionContext {
            species: SPECIES.to_string(),
            image_id: "img".to_string(),
        };
        let context = PromptContext {
            species: SPECIES.to_string(),
            target_features: vec!["pico".to_string()],
        };

        for _ in 0..3 {
            engine.learn_from_rejection(&annotation, "Poor localization", &rejection).await;
        }
        assert!(!engine.enhance_prompt("base", &context).await.contains("Cautions"));

        engine.learn_from_rejection(&annotation, "Poor localization", &rejection).await;
        let enhanced = engine.enhance_prompt("base", &context).await;
        assert!(enhanced.contains("Cautions"));
        assert!(enhanced.contains("Poor localization"));
        assert!(enhanced.contains("rejected 4 times"));
    }

    #[tokio::test]
    async fn test_quality_without_pattern_is_neutral() {
        let engine = PatternEngine::in_memory();
        let score = engine
            .evaluate_annotation_quality(&Annotation::new("el ojo", beak_box(), 0.0), Some(SPECIES))
            .await;
        assert_eq!(score.confidence, 0.0);
        assert_eq!(score.bounding_box_quality, NEUTRAL_SCORE);
        assert!(score.overall_quality > 0.0);
    }

    #[tokio::test]
    async fn test_quality_prefers_typical_boxes() {
        let engine = PatternEngine::in_memory();
        engine
            .learn_from_annotations(&observe("el pico", beak_box(), 0.9, 10), &LearningContext::new(SPECIES))
            .await;

        let typical = engine
            .evaluate_annotation_quality(&Annotation::new("el pico", beak_box(), 0.9), Some(SPECIES))
            .await;
        let displaced = engine
            .evaluate_annotation_quality(
                &Annotation::new("el pico", BoundingBox::new(600.0, 20.0, 10.0, 90.0), 0.9),
                Some(SPECIES),
            )
            .await;

        assert!((typical.bounding_box_quality - 1.0).abs() < 1e-9);
        assert!(typical.overall_quality > displaced.overall_quality);
        for score in [typical, displaced] {
            for v in [score.confidence, score.bounding_box_quality, score.prompt_effectiveness, score.overall_quality] {
                assert!((0.0..=1.0).contains(&v));
            }
        }

        // Species omitted: falls back to the pattern for the same feature
        let any_species = engine
            .evaluate_annotation_quality(&Annotation::new("pico", beak_box(), 0.9), None)
            .await;
        assert_eq!(any_species, typical);
    }

    #[tokio::test]
    async fn test_recommendations_order_and_limit() {
        let engine = PatternEngine::in_memory();
        let context = LearningContext::new(SPECIES);
        engine.learn_from_annotations(&observe("el pico", beak_box(), 0.8, 3), &context).await;
        engine.learn_from_annotations(&observe("la cola", beak_box(), 0.9, 3), &context).await;
        engine.learn_from_annotations(&observe("el ala", beak_box(), 0.9, 5), &context).await;

        let features = engine.get_recommended_features(SPECIES, DEFAULT_RECOMMENDATION_LIMIT).await;
        assert_eq!(features, vec!["ala", "cola", "pico"]);
        assert_eq!(engine.get_recommended_features(SPECIES, 1).await, vec!["ala"]);
        assert!(engine.get_recommended_features("Unknown Species", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_position_adjustments() {
        let engine = PatternEngine::in_memory();
        let original = Annotation::new("el pico", beak_box(), 0.6);
        let corrected = Annotation::new("el pico", BoundingBox::new(110.0, 160.0, 55.0, 42.0), 0.9);
        let context = CorrectionContext {
            species: SPECIES.to_string(),
            image_id: "img".to_string(),
            reviewer_id: "rev".to_string(),
        };
        engine.learn_from_correction(&original, &corrected, &context).await;
        engine
            .learn_from_approval(
                &Annotation::new("la cola", beak_box(), 0.9),
                &ApprovalContext {
                    species: SPECIES.to_string(),
                    image_id: "img".to_string(),
                    reviewer_id: "rev".to_string(),
                },
            )
            .await;

        let adjusted = engine
            .get_position_adjusted_features(SPECIES, &["el pico", "la cola", "el ojo"])
            .await;
        assert_eq!(adjusted.len(), 1);
        assert_eq!(adjusted[0].feature, "el pico");
        assert_eq!(adjusted[0].sample_count, 1);
        assert!((adjusted[0].adjustment.dx - 10.0).abs() < 1e-9);

        let moved = engine.adjust_bounding_box(&original, SPECIES).await;
        assert_eq!(moved, corrected.bounding_box);
        let untouched = Annotation::new("la cola", beak_box(), 0.9);
        assert_eq!(engine.adjust_bounding_box(&untouched, SPECIES).await, beak_box());
    }
}
