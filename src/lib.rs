//! Pattern Engine Library
//!
//! Learns, from human-reviewed image annotations, which feature patterns are
//! reliable for each species:
//! - Batch learning from candidate annotations above a confidence threshold
//! - Reinforcement from reviewer approvals, rejections and corrections
//! - Prompt enhancement, quality scoring and feature recommendations
//! - Durable snapshots in local, in-memory or object storage
//!
//! # Example
//!
//! ```ignore
//! use pattern_engine::{Annotation, BoundingBox, LearningContext, PatternEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = PatternEngine::from_config(pattern_engine::Config::load()?)?;
//!     let pico = Annotation::new("el pico", BoundingBox::new(10.0, 10.0, 40.0, 20.0), 0.9);
//!     engine.learn_from_annotations(&[pico], &LearningContext::new("Cardenal Rojo")).await;
//!     engine.flush().await?;
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod config;
pub mod storage;
pub mod learning;
pub mod cli;

pub use types::{
    Annotation, AnnotationError, ApprovalContext, BoundingBox, BoxDelta, CorrectionContext,
    LearningContext, PromptContext, RejectionContext,
};

pub use config::Config;

pub use storage::{StorageBackend, StorageError};

pub use learning::{
    FeedbackOutcome, LearnedPattern, LearningSummary, PatternAnalytics, PatternEngine,
    PatternExport, QualityScore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Annotation Pattern Learning Engine", NAME, VERSION)
}
