//! Per-network pipeline and the parallel batch driver.
//!
//! Each network runs reconstruct, then reduce and derive side by side, then
//! compact. Networks are independent, so the batch is a parallel map over
//! groups followed by a single aggregation into a [`BatchReport`].

use crate::compact::{retain_fields, round_coordinates};
use crate::config::EngineConfig;
use crate::error::FeederError;
use crate::grouping::{NetworkGroup, group_features};
use crate::metrics::derive_all;
use crate::reconstruct::reconstruct;
use crate::reduce::{SimplifiedPath, reduce_geometry};
use crate::segments::FieldValues;
use geo_types::MultiLineString;
use geojson::{Feature, JsonValue};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// One surviving network, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenedFeature {
    pub network_id: String,
    /// Written back under the identifier field with its source JSON type.
    pub source_id: JsonValue,
    pub derived_metrics: BTreeMap<String, f64>,
    pub flags: BTreeMap<String, bool>,
    /// Source fields carried through; trimmed to the keep-list by
    /// [`ScreenedFeature::compact`].
    pub attributes: FieldValues,
    pub geometry: MultiLineString<f64>,
}

impl ScreenedFeature {
    /// Rounds coordinates and drops every attribute not in `keep`.
    pub fn compact(self, precision: u32, keep: &[String]) -> ScreenedFeature {
        ScreenedFeature {
            network_id: self.network_id,
            source_id: self.source_id,
            derived_metrics: self.derived_metrics,
            flags: self.flags,
            attributes: retain_fields(self.attributes, keep),
            geometry: round_coordinates(self.geometry, precision),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry.0.iter().map(|ls| ls.0.len()).sum()
    }
}

/// What happened to a single network.
#[derive(Debug)]
pub enum NetworkOutcome {
    Screened(ScreenedFeature),
    /// No usable geometry after reconstruction or reduction.
    Empty { network_id: String },
    Skipped(FeederError),
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// In order of first appearance of each network.
    pub features: Vec<ScreenedFeature>,
    /// Rows excluded before grouping, e.g. missing identifier.
    pub rows_rejected: usize,
    /// Networks that collapsed to no geometry.
    pub networks_dropped_empty: usize,
    /// Networks skipped by a per-network error.
    pub networks_skipped: usize,
}

impl BatchReport {
    pub fn skip_count(&self) -> usize {
        self.rows_rejected + self.networks_dropped_empty + self.networks_skipped
    }
}

/// Runs one network end to end. This is the only place that decides a
/// network gets no output row.
pub fn process_group(group: NetworkGroup, config: &EngineConfig) -> NetworkOutcome {
    if let Some(limit) = config.max_group_vertices {
        let vertices = group.vertex_count();
        if vertices > limit {
            return NetworkOutcome::Skipped(FeederError::GroupTooLarge {
                network_id: group.network_id,
                vertices,
                limit,
            });
        }
    }

    let network_id = group.network_id.clone();
    let Some(merged) = reconstruct(group) else {
        debug!("Network {} has no usable line geometry", network_id);
        return NetworkOutcome::Empty { network_id };
    };

    let reducer = config.reducer();
    let (reduced, derived) = rayon::join(
        || reduce_geometry(&merged.geometry, &merged.junctions, &reducer),
        || {
            derive_all(
                &merged.representative_attributes,
                &config.metrics,
                &config.eligibility,
                &config.metric_thresholds,
                config.round_digits,
            )
        },
    );

    let Some(reduced) = reduced else {
        debug!("Network {} reduced to nothing", network_id);
        return NetworkOutcome::Empty { network_id };
    };
    let simplified = SimplifiedPath::from_merged(merged, reduced);

    let screened = ScreenedFeature {
        network_id: simplified.network_id,
        source_id: simplified.source_id,
        derived_metrics: derived.values,
        flags: derived.flags,
        attributes: simplified.representative_attributes,
        geometry: simplified.geometry,
    };

    NetworkOutcome::Screened(
        screened.compact(config.coordinate_precision, &config.extra_keep_fields),
    )
}

/// Worker count: never more than there are groups or cores, and never more
/// than the configured cap.
pub fn worker_count(groups: usize, max_threads: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let mut workers = cores.min(groups).max(1);
    if let Some(cap) = max_threads {
        workers = workers.min(cap.max(1));
    }
    workers
}

/// Processes already grouped networks on a bounded worker pool.
pub fn run_groups(
    groups: Vec<NetworkGroup>,
    config: &EngineConfig,
) -> Result<BatchReport, FeederError> {
    config.validate()?;

    let workers = worker_count(groups.len(), config.max_threads);
    info!("Processing {} networks on {} workers", groups.len(), workers);

    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    let outcomes: Vec<NetworkOutcome> = pool.install(|| {
        groups
            .into_par_iter()
            .map(|group| process_group(group, config))
            .collect()
    });

    let mut report = BatchReport::default();
    for outcome in outcomes {
        match outcome {
            NetworkOutcome::Screened(feature) => report.features.push(feature),
            NetworkOutcome::Empty { .. } => report.networks_dropped_empty += 1,
            NetworkOutcome::Skipped(e) => {
                warn!("Skipping network: {}", e);
                report.networks_skipped += 1;
            }
        }
    }

    Ok(report)
}

/// Full batch from source features: validate, group, process.
pub fn run(features: &[Feature], config: &EngineConfig) -> Result<BatchReport, FeederError> {
    config.validate()?;

    let grouped = group_features(features, &config.ingest_schema());
    let rows_rejected = grouped.rejected.len();

    let mut report = run_groups(grouped.groups, config)?;
    report.rows_rejected = rows_rejected;

    info!(
        "Batch done: {} networks written, {} rows rejected, {} networks empty, {} skipped",
        report.features.len(),
        report.rows_rejected,
        report.networks_dropped_empty,
        report.networks_skipped
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_bounds() {
        assert_eq!(worker_count(1, None), 1);
        assert_eq!(worker_count(0, None), 1);
        assert!(worker_count(1000, Some(2)) <= 2);
        assert!(worker_count(1000, None) >= 1);
    }
}
