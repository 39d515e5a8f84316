//! Periodic correlation analysis over the fused series.
//!
//! Each run snapshots the three source subtrees, fuses them, correlates
//! light level against cloud cover for both the aggregated and open pairs,
//! and overwrites the single analysis document wholesale.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::fuse::{UnifiedEntry, fuse};
use crate::stats::pearson;
use crate::store::{DocumentStore, paths};

/// Result document stored at `/analysis_results`.
///
/// The four numeric series are parallel to `times`: index `i` of each one
/// belongs to `times[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub correlation_aggregated: Option<f64>,
    pub correlation_open: Option<f64>,
    pub times: Vec<String>,
    pub light_levels_aggregated: Vec<f64>,
    pub cloud_covers_aggregated: Vec<f64>,
    pub light_levels_open: Vec<f64>,
    pub cloud_covers_open: Vec<f64>,
}

/// Extracts the paired series from the unified set and correlates them.
///
/// The unified map's key order fixes the single ordering shared by `times`
/// and all four series.
pub fn analyze(unified: &BTreeMap<String, UnifiedEntry>) -> AnalysisResult {
    let mut times = Vec::with_capacity(unified.len());
    let mut light_levels_aggregated = Vec::with_capacity(unified.len());
    let mut cloud_covers_aggregated = Vec::with_capacity(unified.len());
    let mut light_levels_open = Vec::with_capacity(unified.len());
    let mut cloud_covers_open = Vec::with_capacity(unified.len());

    for (time, entry) in unified {
        times.push(time.clone());
        light_levels_aggregated.push(entry.light_level_aggregated);
        cloud_covers_aggregated.push(entry.cloud_cover_aggregated);
        light_levels_open.push(entry.light_level_open);
        cloud_covers_open.push(entry.cloud_cover_open);
    }

    AnalysisResult {
        correlation_aggregated: pearson(&light_levels_aggregated, &cloud_covers_aggregated),
        correlation_open: pearson(&light_levels_open, &cloud_covers_open),
        times,
        light_levels_aggregated,
        cloud_covers_aggregated,
        light_levels_open,
        cloud_covers_open,
    }
}

/// Full fusion-and-analysis pass: snapshot, fuse, correlate, store.
#[tracing::instrument(skip_all)]
pub async fn run_analysis(store: &dyn DocumentStore) -> Result<AnalysisResult> {
    let aggregated = store.children(paths::AGGREGATED_DATA).await?;
    let cloud = store.children(paths::CLOUD_DATA).await?;
    let open = store.children(paths::OPEN_DATA).await?;

    let unified = fuse(&aggregated, &cloud, &open);
    let result = analyze(&unified);

    store
        .put(paths::ANALYSIS_RESULTS, serde_json::to_value(&result)?)
        .await?;

    info!(
        time_points = result.times.len(),
        correlation_aggregated = ?result.correlation_aggregated,
        correlation_open = ?result.correlation_open,
        "Analysis stored"
    );
    Ok(result)
}
