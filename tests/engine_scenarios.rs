//! End-to-end scenarios for the pattern engine over real storage backends

use pattern_engine::config::{Config, StorageConfig};
use pattern_engine::learning::{FeedbackOutcome, IgnoreReason, LearnedPattern};
use pattern_engine::storage::{LocalStorage, MemoryStorage, StorageBackend};
use pattern_engine::{
    Annotation, ApprovalContext, BoundingBox, CorrectionContext, LearningContext, PatternEngine,
    PromptContext, RejectionContext,
};
use std::sync::Arc;

const SPECIES: &str = "Cardenal Rojo";

fn pico(confidence: f64) -> Annotation {
    Annotation::new("el pico", BoundingBox::new(100.0, 150.0, 50.0, 40.0), confidence)
}

/// Engine that restores from and saves synchronously to `storage`
fn engine_over(storage: Arc<dyn StorageBackend>) -> PatternEngine {
    let config = Config {
        storage: StorageConfig {
            persist_in_background: false,
            ..Default::default()
        },
        ..Default::default()
    };
    PatternEngine::new(storage, config)
}

async fn only_pattern(engine: &PatternEngine) -> LearnedPattern {
    let mut export = engine.export_patterns().await;
    assert_eq!(export.patterns.len(), 1, "expected exactly one pattern");
    export.patterns.remove(0)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn test_confident_annotation_creates_pattern() {
    let engine = PatternEngine::in_memory();
    let summary = engine
        .learn_from_annotations(&[pico(0.9)], &LearningContext::new(SPECIES))
        .await;
    assert_eq!(summary.learned, 1);

    let pattern = only_pattern(&engine).await;
    assert_eq!(pattern.feature_type, "pico");
    assert_eq!(pattern.species_context, SPECIES);
    assert_eq!(pattern.observation_count, 1);
    assert!(approx(pattern.average_confidence, 0.9));
    assert_eq!(pattern.common_bounding_boxes.average, BoundingBox::new(100.0, 150.0, 50.0, 40.0));
}

#[tokio::test]
async fn test_low_confidence_annotation_is_ignored() {
    let engine = PatternEngine::in_memory();
    let summary = engine
        .learn_from_annotations(&[pico(0.5)], &LearningContext::new(SPECIES))
        .await;
    assert_eq!(summary.learned, 0);
    assert_eq!(summary.below_threshold, 1);
    assert!(engine.get_recommended_features(SPECIES, 10).await.is_empty());
}

#[tokio::test]
async fn test_approval_reinforces_pattern() {
    let engine = PatternEngine::in_memory();
    engine
        .learn_from_annotations(&[pico(0.9)], &LearningContext::new(SPECIES))
        .await;

    let context = ApprovalContext {
        species: SPECIES.to_string(),
        image_id: "img-7".to_string(),
        reviewer_id: "rev-2".to_string(),
    };
    let outcome = engine.learn_from_approval(&pico(0.8), &context).await;
    assert_eq!(outcome, FeedbackOutcome::Updated);

    let pattern = only_pattern(&engine).await;
    assert_eq!(pattern.observation_count, 2);
    assert!(approx(pattern.average_confidence, 0.9 + 0.1 * 0.1));
    assert_eq!(pattern.metadata.approvals, 1);
}

#[tokio::test]
async fn test_repeated_rejections_become_a_caution() {
    let engine = PatternEngine::in_memory();
    let context = LearningContext::new(SPECIES);
    for _ in 0..5 {
        engine.learn_from_annotations(&[pico(0.9)], &context).await;
    }

    let rejection = RejectionContext {
        species: SPECIES.to_string(),
        image_id: "img-3".to_string(),
    };
    for _ in 0..3 {
        engine
            .learn_from_rejection(&pico(0.9), "Poor localization", &rejection)
            .await;
    }

    let prompt_context = PromptContext {
        species: SPECIES.to_string(),
        target_features: vec!["el pico".to_string()],
    };
    let at_threshold = engine.enhance_prompt("Find features.", &prompt_context).await;
    assert!(at_threshold.contains("pico"));
    assert!(!at_threshold.contains("Cautions:"));

    engine
        .learn_from_rejection(&pico(0.9), "Poor localization", &rejection)
        .await;
    let above_threshold = engine.enhance_prompt("Find features.", &prompt_context).await;
    assert!(above_threshold.contains("Cautions:"));
    assert!(above_threshold.contains("rejected 4 times for \"Poor localization\""));

    let pattern = only_pattern(&engine).await;
    assert_eq!(pattern.observation_count, 5);
    assert_eq!(pattern.metadata.rejection_reasons["Poor localization"], 4);
    assert!(pattern.average_confidence < 0.9);
}

#[tokio::test]
async fn test_rejection_of_unknown_pattern_is_ignored() {
    let engine = PatternEngine::in_memory();
    let outcome = engine
        .learn_from_rejection(
            &pico(0.9),
            "Wrong feature",
            &RejectionContext {
                species: SPECIES.to_string(),
                image_id: "img-1".to_string(),
            },
        )
        .await;
    assert_eq!(outcome, FeedbackOutcome::Ignored(IgnoreReason::UnknownPattern));
    assert_eq!(engine.get_analytics().await.total_patterns, 0);
}

#[tokio::test]
async fn test_correction_feeds_position_adjustment() {
    let engine = PatternEngine::in_memory();
    engine
        .learn_from_annotations(&[pico(0.9)], &LearningContext::new(SPECIES))
        .await;

    let corrected = Annotation::new("el pico", BoundingBox::new(110.0, 160.0, 55.0, 42.0), 0.95);
    let context = CorrectionContext {
        species: SPECIES.to_string(),
        image_id: "img-9".to_string(),
        reviewer_id: "rev-1".to_string(),
    };
    let outcome = engine.learn_from_correction(&pico(0.9), &corrected, &context).await;
    assert_eq!(outcome, FeedbackOutcome::Updated);

    let adjusted = engine
        .get_position_adjusted_features(SPECIES, &["el pico", "la cola"])
        .await;
    assert_eq!(adjusted.len(), 1);
    assert_eq!(adjusted[0].feature, "el pico");
    assert_eq!(adjusted[0].sample_count, 1);
    assert!(approx(adjusted[0].adjustment.dx, 10.0));
    assert!(approx(adjusted[0].adjustment.dy, 10.0));
    assert!(approx(adjusted[0].adjustment.d_width, 5.0));
    assert!(approx(adjusted[0].adjustment.d_height, 2.0));

    let moved = engine.adjust_bounding_box(&pico(0.9), SPECIES).await;
    assert!(approx(moved.x, 110.0));
    assert!(approx(moved.y, 160.0));
    assert!(approx(moved.width, 55.0));
    assert!(approx(moved.height, 42.0));
}

#[tokio::test]
async fn test_malformed_persisted_state_starts_empty() {
    let storage = MemoryStorage::new();
    let defaults = StorageConfig::default();
    storage
        .upload(&defaults.bucket, &defaults.key, b"invalid json{".to_vec())
        .await
        .unwrap();

    let engine = engine_over(Arc::new(storage.clone()));
    assert_eq!(engine.get_analytics().await.total_patterns, 0);

    engine
        .learn_from_annotations(&[pico(0.9)], &LearningContext::new(SPECIES))
        .await;
    assert_eq!(engine.get_recommended_features(SPECIES, 10).await, vec!["pico"]);

    // The next save replaces the unreadable payload
    let bytes = storage.download(&defaults.bucket, &defaults.key).await.unwrap().unwrap();
    assert!(serde_json::from_slice::<serde_json::Value>(&bytes).is_ok());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let storage = MemoryStorage::new();

    let first = engine_over(Arc::new(storage.clone()));
    let context = LearningContext::new(SPECIES).with_prompt("Label the beak and tail.");
    first
        .learn_from_annotations(
            &[
                pico(0.9),
                Annotation::new("la cola", BoundingBox::new(20.0, 200.0, 80.0, 30.0), 0.85),
            ],
            &context,
        )
        .await;
    first.flush().await.unwrap();
    let before = first.export_patterns().await;

    let second = engine_over(Arc::new(storage));
    let after = second.export_patterns().await;
    assert_eq!(before.patterns, after.patterns);
    assert_eq!(after.patterns[0].successful_prompts, vec!["Label the beak and tail."]);
}

#[tokio::test]
async fn test_local_storage_round_trip() {
    let dir = tempfile::tempdir().unwrap();

    let first = engine_over(Arc::new(LocalStorage::new(dir.path())));
    first
        .learn_from_annotations(&[pico(0.9)], &LearningContext::new(SPECIES))
        .await;
    first.flush().await.unwrap();

    let second = engine_over(Arc::new(LocalStorage::new(dir.path())));
    let pattern = only_pattern(&second).await;
    assert_eq!(pattern.feature_type, "pico");
    assert_eq!(pattern.observation_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_learning_loses_no_updates() {
    const TASKS: u64 = 64;
    let engine = Arc::new(PatternEngine::in_memory());

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .learn_from_annotations(&[pico(0.9)], &LearningContext::new(SPECIES))
                    .await
            })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().learned, 1);
    }

    let pattern = only_pattern(&engine).await;
    assert_eq!(pattern.observation_count, TASKS);
    assert!(approx(pattern.average_confidence, 0.9));
}

#[tokio::test]
async fn test_enhanced_prompt_keeps_base_prefix() {
    let engine = PatternEngine::in_memory();
    let base = "Identify visible anatomical features.";
    let context = PromptContext {
        species: SPECIES.to_string(),
        target_features: Vec::new(),
    };
    assert_eq!(engine.enhance_prompt(base, &context).await, base);

    for _ in 0..5 {
        engine
            .learn_from_annotations(&[pico(0.9)], &LearningContext::new(SPECIES))
            .await;
    }
    let enhanced = engine.enhance_prompt(base, &context).await;
    assert!(enhanced.starts_with(base));
    assert!(enhanced.len() > base.len());
}

#[tokio::test]
async fn test_unknown_species_has_no_recommendations() {
    let engine = PatternEngine::in_memory();
    engine
        .learn_from_annotations(&[pico(0.9)], &LearningContext::new(SPECIES))
        .await;
    assert!(engine.get_recommended_features("Colibrí", 10).await.is_empty());
    assert!(engine.get_recommended_features(SPECIES, 0).await.is_empty());
}

#[tokio::test]
async fn test_quality_score_stays_in_bounds() {
    let engine = PatternEngine::in_memory();
    let unknown = engine.evaluate_annotation_quality(&pico(0.9), Some(SPECIES)).await;
    assert!(approx(unknown.bounding_box_quality, 0.5));
    assert!(approx(unknown.prompt_effectiveness, 0.5));

    engine
        .learn_from_annotations(&[pico(0.9)], &LearningContext::new(SPECIES))
        .await;
    let known = engine.evaluate_annotation_quality(&pico(0.9), None).await;
    assert!(approx(known.bounding_box_quality, 1.0));
    for score in [known.confidence, known.bounding_box_quality, known.prompt_effectiveness, known.overall_quality] {
        assert!((0.0..=1.0).contains(&score));
    }
}

#[tokio::test]
async fn test_extreme_boxes_cannot_poison_saved_state() {
    let storage = MemoryStorage::new();
    let context = LearningContext::new(SPECIES);

    let first = engine_over(Arc::new(storage.clone()));
    first
        .learn_from_annotations(
            &[Annotation::new("la cola", BoundingBox::new(20.0, 200.0, 80.0, 30.0), 0.85)],
            &context,
        )
        .await;
    let summary = first
        .learn_from_annotations(
            &[
                Annotation::new("el pico", BoundingBox::new(1e308, 0.0, 10.0, 10.0), 0.9),
                Annotation::new("el pico", BoundingBox::new(-1e308, 0.0, 10.0, 10.0), 0.9),
            ],
            &context,
        )
        .await;
    assert_eq!(summary.invalid, 2);

    let correction = first
        .learn_from_correction(
            &Annotation::new("la cola", BoundingBox::new(-1e308, 0.0, 10.0, 10.0), 0.9),
            &Annotation::new("la cola", BoundingBox::new(1e308, 0.0, 10.0, 10.0), 0.9),
            &CorrectionContext {
                species: SPECIES.to_string(),
                image_id: "img-4".to_string(),
                reviewer_id: "rev-1".to_string(),
            },
        )
        .await;
    assert!(correction.is_ignored());
    first.flush().await.unwrap();

    let second = engine_over(Arc::new(storage));
    let restored = only_pattern(&second).await;
    assert_eq!(restored.feature_type, "cola");
    assert!(restored.position_adjustment.is_none());
}

#[tokio::test]
async fn test_restored_confidence_is_clamped() {
    let storage = MemoryStorage::new();
    let defaults = StorageConfig::default();

    let seeded = LearnedPattern::seed(&pico(0.9), SPECIES);
    let mut value = serde_json::to_value(&seeded).unwrap();
    value["averageConfidence"] = serde_json::json!(7.5);
    value["observationCount"] = serde_json::json!(3);
    let payload = serde_json::json!([[seeded.key(), value]]);
    storage
        .upload(&defaults.bucket, &defaults.key, serde_json::to_vec(&payload).unwrap())
        .await
        .unwrap();

    let engine = engine_over(Arc::new(storage));
    let analytics = engine.get_analytics().await;
    assert_eq!(analytics.total_patterns, 1);
    assert_eq!(analytics.top_features[0].observations, 3);
    assert!(approx(analytics.top_features[0].confidence, 1.0));
}
