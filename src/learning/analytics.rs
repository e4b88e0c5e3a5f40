//! Analytics and export over the whole pattern store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::engine::PatternEngine;
use super::pattern::{by_evidence, LearnedPattern};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSummary {
    pub feature: String,
    pub species: String,
    pub observations: u64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesBreakdown {
    pub species: String,
    /// Sum of observation counts
    pub annotations: u64,
    /// Distinct feature types
    pub features: usize,
}

/// Dashboard snapshot of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalytics {
    pub total_patterns: usize,
    pub species_tracked: usize,
    pub top_features: Vec<FeatureSummary>,
    pub species_breakdown: Vec<SpeciesBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesStats {
    pub patterns: usize,
    pub observations: u64,
    /// Mean of the patterns' average confidences
    pub average_confidence: f64,
    /// Patterns with a learned position adjustment
    pub corrected_features: usize,
}

/// Full dump of the store for backup or inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternExport {
    pub patterns: Vec<LearnedPattern>,
    pub species_stats: BTreeMap<String, SpeciesStats>,
    pub exported_at: DateTime<Utc>,
}

impl PatternEngine {
    pub async fn get_analytics(&self) -> PatternAnalytics {
        self.ensure_initialized().await;

        let patterns = self.store.read().await;
        let mut ranked: Vec<&LearnedPattern> = patterns.values().collect();
        ranked.sort_by(|a, b| by_evidence(a, b));

        let top_features = ranked
            .iter()
            .take(self.advisor.top_features)
            .map(|p| FeatureSummary {
                feature: p.feature_type.clone(),
                species: p.species_context.clone(),
                observations: p.observation_count,
                confidence: p.average_confidence,
            })
            .collect();

        let mut per_species: BTreeMap<&str, (u64, HashSet<&str>)> = BTreeMap::new();
        for pattern in patterns.values() {
            let entry = per_species
                .entry(pattern.species_context.as_str())
                .or_default();
            entry.0 += pattern.observation_count;
            entry.1.insert(pattern.feature_type.as_str());
        }

        let mut species_breakdown: Vec<SpeciesBreakdown> = per_species
            .iter()
            .map(|(species, (annotations, features))| SpeciesBreakdown {
                species: species.to_string(),
                annotations: *annotations,
                features: features.len(),
            })
            .collect();
        species_breakdown.sort_by(|a, b| {
            b.annotations
                .cmp(&a.annotations)
                .then_with(|| a.species.cmp(&b.species))
        });

        PatternAnalytics {
            total_patterns: patterns.len(),
            species_tracked: per_species.len(),
            top_features,
            species_breakdown,
        }
    }

    /// Everything currently in memory, patterns sorted by key
    pub async fn export_patterns(&self) -> PatternExport {
        self.ensure_initialized().await;

        let (_, entries) = self.store.snapshot().await;
        let patterns: Vec<LearnedPattern> = entries.into_iter().map(|(_, p)| p).collect();

        let mut species_stats: BTreeMap<String, SpeciesStats> = BTreeMap::new();
        for pattern in &patterns {
            let stats = species_stats
                .entry(pattern.species_context.clone())
                .or_default();
            stats.patterns += 1;
            stats.observations += pattern.observation_count;
            stats.average_confidence += pattern.average_confidence;
            if pattern.position_adjustment.is_some() {
                stats.corrected_features += 1;
            }
        }
        for stats in species_stats.values_mut() {
            stats.average_confidence /= stats.patterns as f64;
        }

        PatternExport {
            patterns,
            species_stats,
            exported_at: Utc::now(),
        }
    }
}
