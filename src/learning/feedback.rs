//! Feedback Processor - learning from observations and reviewer outcomes
//!
//! None of these operations return errors. Invalid input is skipped and
//! reported through the returned summary/outcome; persistence failures are
//! logged by the session manager.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::PatternEngine;
use super::pattern::{normalize_feature_name, pattern_key, LearnedPattern};
use super::store::Mutation;
use crate::types::{
    Annotation, AnnotationError, ApprovalContext, CorrectionContext, LearningContext,
    RejectionContext,
};

/// Reason recorded when a reviewer gives none
const UNSPECIFIED_REASON: &str = "unspecified";

/// What a batch of observations contributed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningSummary {
    pub learned: usize,
    pub below_threshold: usize,
    pub invalid: usize,
}

impl Mutation for LearningSummary {
    fn changed(&self) -> bool {
        self.learned > 0
    }
}

/// Why a review event left the store untouched
#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    /// No pattern exists for the key and the event cannot originate one
    UnknownPattern,
    Invalid(AnnotationError),
}

/// Effect of a single review event
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    Created,
    Updated,
    Ignored(IgnoreReason),
}

impl FeedbackOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, FeedbackOutcome::Ignored(_))
    }
}

impl Mutation for FeedbackOutcome {
    fn changed(&self) -> bool {
        !self.is_ignored()
    }
}

impl PatternEngine {
    /// Learn from a batch of AI-generated annotation candidates
    ///
    /// Only annotations at or above the confidence threshold count; others
    /// have no effect at all.
    pub async fn learn_from_annotations(
        &self,
        annotations: &[Annotation],
        context: &LearningContext,
    ) -> LearningSummary {
        self.ensure_initialized().await;
        if annotations.is_empty() {
            return LearningSummary::default();
        }

        let config = &self.learning;
        let summary = self
            .store
            .mutate(|patterns| {
                let mut summary = LearningSummary::default();
                for annotation in annotations {
                    if let Err(e) = annotation.validate() {
                        debug!("Skipping annotation {:?}: {}", annotation.spanish_term, e);
                        summary.invalid += 1;
                        continue;
                    }
                    if annotation.confidence < config.confidence_threshold {
                        summary.below_threshold += 1;
                        continue;
                    }

                    let key = pattern_key(&annotation.spanish_term, &context.species);
                    match patterns.get_mut(&key) {
                        Some(pattern) => pattern.observe(annotation, config),
                        None => {
                            let pattern = LearnedPattern::seed(annotation, &context.species);
                            patterns.insert(key.clone(), pattern);
                        }
                    }
                    if let (Some(prompt), Some(pattern)) = (&context.prompt, patterns.get_mut(&key)) {
                        pattern.record_prompt(prompt, config.max_successful_prompts);
                    }
                    summary.learned += 1;
                }
                summary
            })
            .await;

        if summary.invalid > 0 {
            warn!(
                "Skipped {} invalid annotations for {}",
                summary.invalid, context.species
            );
        }
        debug!(
            "Learned from {} of {} annotations for {}",
            summary.learned,
            annotations.len(),
            context.species
        );

        if summary.changed() {
            self.persist_after_mutation().await;
        }
        summary
    }

    /// A reviewer approved an annotation
    ///
    /// Approval is enough evidence to originate a pattern on its own.
    pub async fn learn_from_approval(
        &self,
        annotation: &Annotation,
        context: &ApprovalContext,
    ) -> FeedbackOutcome {
        self.ensure_initialized().await;
        if let Err(e) = annotation.validate() {
            warn!("Ignoring approval on image {}: {}", context.image_id, e);
            return FeedbackOutcome::Ignored(IgnoreReason::Invalid(e));
        }

        let config = &self.learning;
        let key = pattern_key(&annotation.spanish_term, &context.species);
        let outcome = self
            .store
            .mutate(|patterns| match patterns.get_mut(&key) {
                Some(pattern) => {
                    pattern.approve(annotation, config);
                    FeedbackOutcome::Updated
                }
                None => {
                    let mut pattern = LearnedPattern::seed(annotation, &context.species);
                    pattern.metadata.approvals = 1;
                    patterns.insert(key.clone(), pattern);
                    FeedbackOutcome::Created
                }
            })
            .await;

        info!(
            "Approval by {} on image {}: {} ({:?})",
            context.reviewer_id, context.image_id, key, outcome
        );
        self.persist_after_mutation().await;
        outcome
    }

    /// A reviewer rejected an annotation
    ///
    /// Rejections never originate patterns and never reduce the observation
    /// count; they lower confidence and tally the reason.
    pub async fn learn_from_rejection(
        &self,
        annotation: &Annotation,
        reason: &str,
        context: &RejectionContext,
    ) -> FeedbackOutcome {
        self.ensure_initialized().await;
        if normalize_feature_name(&annotation.spanish_term).is_empty() {
            let e = AnnotationError::EmptyFeatureName;
            warn!("Ignoring rejection on image {}: {}", context.image_id, e);
            return FeedbackOutcome::Ignored(IgnoreReason::Invalid(e));
        }

        let reason = match reason.trim() {
            "" => UNSPECIFIED_REASON,
            trimmed => trimmed,
        };
        let config = &self.learning;
        let key = pattern_key(&annotation.spanish_term, &context.species);
        let outcome = self
            .store
            .mutate(|patterns| match patterns.get_mut(&key) {
                Some(pattern) => {
                    pattern.reject(reason, config);
                    FeedbackOutcome::Updated
                }
                None => FeedbackOutcome::Ignored(IgnoreReason::UnknownPattern),
            })
            .await;

        if outcome.is_ignored() {
            info!(
                "Rejection on image {} for unknown pattern {} ({}), nothing to update",
                context.image_id, key, reason
            );
            return outcome;
        }

        debug!("Rejection on image {}: {} ({})", context.image_id, key, reason);
        self.persist_after_mutation().await;
        outcome
    }

    /// A reviewer replaced an annotation with a corrected one
    ///
    /// The corrected annotation names the pattern. It counts as stronger
    /// evidence than an observation and, like an approval, may originate the
    /// pattern. A non-zero box difference feeds the position adjustment.
    pub async fn learn_from_correction(
        &self,
        original: &Annotation,
        corrected: &Annotation,
        context: &CorrectionContext,
    ) -> FeedbackOutcome {
        self.ensure_initialized().await;
        for annotation in [original, corrected] {
            if let Err(e) = annotation.validate() {
                warn!("Ignoring correction on image {}: {}", context.image_id, e);
                return FeedbackOutcome::Ignored(IgnoreReason::Invalid(e));
            }
        }

        let config = &self.learning;
        let key = pattern_key(&corrected.spanish_term, &context.species);
        let (outcome, moved) = self
            .store
            .mutate(|patterns| match patterns.get_mut(&key) {
                Some(pattern) => {
                    let moved = pattern.correct(original, corrected, config);
                    CorrectionResult(FeedbackOutcome::Updated, moved)
                }
                None => {
                    let mut pattern = LearnedPattern::new(&corrected.spanish_term, &context.species);
                    let moved = pattern.correct(original, corrected, config);
                    patterns.insert(key.clone(), pattern);
                    CorrectionResult(FeedbackOutcome::Created, moved)
                }
            })
            .await
            .into_parts();

        if moved {
            let delta = original.bounding_box.delta_to(&corrected.bounding_box);
            info!(
                "Correction by {} on image {}: {} moved by ({:.1}, {:.1}, {:.1}, {:.1})",
                context.reviewer_id,
                context.image_id,
                key,
                delta.dx,
                delta.dy,
                delta.d_width,
                delta.d_height
            );
        } else {
            debug!(
                "Correction on image {} for {} kept the same box",
                context.image_id, key
            );
        }

        self.persist_after_mutation().await;
        outcome
    }
}

struct CorrectionResult(FeedbackOutcome, bool);

impl CorrectionResult {
    fn into_parts(self) -> (FeedbackOutcome, bool) {
        (self.0, self.1)
    }
}

impl Mutation for CorrectionResult {
    fn changed(&self) -> bool {
        self.0.changed()
    }
}
