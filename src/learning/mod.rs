//! Pattern learning engine
//!
//! Learns, from reviewed annotations, which feature patterns are reliable for
//! each species, and feeds that back into prompt building, quality scoring
//! and feature recommendations.

pub mod pattern;
pub mod store;
pub mod session;
pub mod engine;
pub mod feedback;
pub mod advisor;
pub mod analytics;

pub use pattern::{
    normalize_feature_name, pattern_key, BoxSummary, LearnedPattern, PatternMetadata,
    PositionAdjustment,
};
pub use store::{Mutation, PatternMap, PatternStore};
pub use session::{PatternSnapshot, SessionManager, SnapshotError};
pub use engine::PatternEngine;
pub use feedback::{FeedbackOutcome, IgnoreReason, LearningSummary};
pub use advisor::{PositionAdjustedFeature, QualityScore, DEFAULT_RECOMMENDATION_LIMIT};
pub use analytics::{FeatureSummary, PatternAnalytics, PatternExport, SpeciesBreakdown, SpeciesStats};
