//! CLI interface for pattern-engine
//!
//! Thin front-end over [`PatternEngine`] for feeding review data from JSON
//! files and inspecting what has been learned. Mutating commands flush to
//! storage before exiting.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{self, Config};
use crate::learning::{PatternEngine, DEFAULT_RECOMMENDATION_LIMIT};
use crate::types::{
    Annotation, ApprovalContext, CorrectionContext, LearningContext, PromptContext,
    RejectionContext,
};

#[derive(Parser)]
#[command(name = "pattern-engine")]
#[command(about = "Learn reliable annotation patterns from review feedback", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the per-user config location)
    #[arg(short, long, global = true, env = "PATTERN_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Use local storage rooted at this directory, overriding the config
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pattern analytics
    Analytics,
    /// Export every learned pattern as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Recommend features to look for
    Recommend {
        species: String,
        #[arg(short, long, default_value_t = DEFAULT_RECOMMENDATION_LIMIT)]
        limit: usize,
    },
    /// Learn from a JSON array of annotation candidates
    Learn {
        file: PathBuf,
        #[arg(short, long)]
        species: String,
        /// Prompt that produced the annotations
        #[arg(short, long)]
        prompt: Option<String>,
    },
    /// Record a reviewer approval of one annotation (JSON file)
    Approve {
        file: PathBuf,
        #[arg(short, long)]
        species: String,
        #[arg(long, default_value = "")]
        image_id: String,
        #[arg(long, default_value = "cli")]
        reviewer_id: String,
    },
    /// Record a reviewer rejection of one annotation (JSON file)
    Reject {
        file: PathBuf,
        #[arg(short, long)]
        species: String,
        #[arg(short, long)]
        reason: String,
        #[arg(long, default_value = "")]
        image_id: String,
    },
    /// Record a reviewer correction (original and corrected JSON files)
    Correct {
        original: PathBuf,
        corrected: PathBuf,
        #[arg(short, long)]
        species: String,
        #[arg(long, default_value = "")]
        image_id: String,
        #[arg(long, default_value = "cli")]
        reviewer_id: String,
    },
    /// Print a prompt with learned guidance appended
    Enhance {
        #[arg(short, long)]
        species: String,
        /// Base prompt text
        #[arg(short, long)]
        base: String,
        /// Target features (repeatable); all known features when omitted
        #[arg(short, long = "feature")]
        features: Vec<String>,
    },
    /// Score one annotation (JSON file)
    Score {
        file: PathBuf,
        #[arg(short, long)]
        species: Option<String>,
    },
    /// Show learned position corrections
    Positions {
        #[arg(short, long)]
        species: String,
        #[arg(short, long = "feature", required = true)]
        features: Vec<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(root) = &cli.storage_root {
        config.storage.backend = config::StorageBackendKind::Local;
        config.storage.local_root = Some(root.clone());
    }
    // A short-lived process must not exit before its save lands
    config.storage.persist_in_background = false;
    Ok(config)
}

async fn flush(engine: &PatternEngine) -> Result<()> {
    engine
        .flush()
        .await
        .context("Failed to persist learned patterns")
}

/// Run CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { command } = &cli.command {
        return run_config(&cli, command);
    }

    let config = load_config(&cli)?;
    let engine = PatternEngine::from_config(config)
        .context("Failed to set up pattern storage")?;
    engine.ensure_initialized().await;

    match cli.command {
        Commands::Analytics => {
            print_json(&engine.get_analytics().await)?;
        }
        Commands::Export { output } => {
            let export = engine.export_patterns().await;
            let json = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported {} patterns to {}", export.patterns.len(), path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Recommend { species, limit } => {
            for feature in engine.get_recommended_features(&species, limit).await {
                println!("{}", feature);
            }
        }
        Commands::Learn { file, species, prompt } => {
            let annotations: Vec<Annotation> = read_json(&file)?;
            let context = LearningContext { species, prompt };
            let summary = engine.learn_from_annotations(&annotations, &context).await;
            flush(&engine).await?;
            print_json(&summary)?;
        }
        Commands::Approve { file, species, image_id, reviewer_id } => {
            let annotation: Annotation = read_json(&file)?;
            let context = ApprovalContext { species, image_id, reviewer_id };
            let outcome = engine.learn_from_approval(&annotation, &context).await;
            flush(&engine).await?;
            println!("{:?}", outcome);
        }
        Commands::Reject { file, species, reason, image_id } => {
            let annotation: Annotation = read_json(&file)?;
            let context = RejectionContext { species, image_id };
            let outcome = engine.learn_from_rejection(&annotation, &reason, &context).await;
            flush(&engine).await?;
            println!("{:?}", outcome);
        }
        Commands::Correct { original, corrected, species, image_id, reviewer_id } => {
            let original: Annotation = read_json(&original)?;
            let corrected: Annotation = read_json(&corrected)?;
            let context = CorrectionContext { species, image_id, reviewer_id };
            let outcome = engine.learn_from_correction(&original, &corrected, &context).await;
            flush(&engine).await?;
            println!("{:?}", outcome);
        }
        Commands::Enhance { species, base, features } => {
            let context = PromptContext { species, target_features: features };
            println!("{}", engine.enhance_prompt(&base, &context).await);
        }
        Commands::Score { file, species } => {
            let annotation: Annotation = read_json(&file)?;
            print_json(&engine.evaluate_annotation_quality(&annotation, species.as_deref()).await)?;
        }
        Commands::Positions { species, features } => {
            print_json(&engine.get_position_adjusted_features(&species, &features).await)?;
        }
        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn run_config(cli: &Cli, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = load_config(cli)?;
            print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
        }
        ConfigCommands::Init { force } => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => config::config_path()?,
            };
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
