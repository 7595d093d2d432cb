//! Point reduction of merged networks under a branch policy.

use crate::reconstruct::{Junctions, MergedPath};
use crate::segments::FieldValues;
use crate::simplify::simplify_preserving;
use geo::{Euclidean, Length};
use geo_types::{Coord, LineString, MultiLineString};
use geojson::JsonValue;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// What happens to the branches of a network during reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReducePolicy {
    /// Every component is reduced and kept.
    #[default]
    PreserveAll,
    /// Only the longest component survives. Lossy, opt-in only.
    MainTrunkOnly,
    /// Short components pass through untouched, long ones are reduced.
    LengthAwareHybrid,
}

impl ReducePolicy {
    pub const ALL: &'static [ReducePolicy] = &[
        ReducePolicy::PreserveAll,
        ReducePolicy::MainTrunkOnly,
        ReducePolicy::LengthAwareHybrid,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReducePolicy::PreserveAll => "preserve-all",
            ReducePolicy::MainTrunkOnly => "main-trunk-only",
            ReducePolicy::LengthAwareHybrid => "length-aware-hybrid",
        }
    }
}

impl FromStr for ReducePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preserve-all" | "PreserveAll" => Ok(ReducePolicy::PreserveAll),
            "main-trunk-only" | "MainTrunkOnly" => Ok(ReducePolicy::MainTrunkOnly),
            "length-aware-hybrid" | "LengthAwareHybrid" => Ok(ReducePolicy::LengthAwareHybrid),
            _ => Err(format!(
                "Unknown policy: '{}'. Valid options: preserve-all, main-trunk-only, length-aware-hybrid",
                s
            )),
        }
    }
}

impl std::fmt::Display for ReducePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ReducePolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ReducePolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Multiplier applied to the tolerance to get the hybrid pass-through length.
pub const DEFAULT_HYBRID_MULTIPLIER: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReducerConfig {
    pub policy: ReducePolicy,
    /// In the unit of the input coordinate reference system.
    pub tolerance: f64,
    pub hybrid_multiplier: f64,
}

impl ReducerConfig {
    pub fn new(policy: ReducePolicy, tolerance: f64) -> Self {
        Self {
            policy,
            tolerance,
            hybrid_multiplier: DEFAULT_HYBRID_MULTIPLIER,
        }
    }

    pub fn hybrid_threshold(&self) -> f64 {
        self.tolerance * self.hybrid_multiplier
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimplifiedPath {
    pub network_id: String,
    pub source_id: JsonValue,
    pub geometry: MultiLineString<f64>,
    pub representative_attributes: FieldValues,
}

impl SimplifiedPath {
    /// Pairs a merged network with geometry reduced from it.
    pub fn from_merged(merged: MergedPath, geometry: MultiLineString<f64>) -> Self {
        SimplifiedPath {
            network_id: merged.network_id,
            source_id: merged.source_id,
            geometry,
            representative_attributes: merged.representative_attributes,
        }
    }
}

/// Reduces a merged network. `None` when nothing usable is left.
pub fn reduce(merged: MergedPath, config: &ReducerConfig) -> Option<SimplifiedPath> {
    let geometry = reduce_geometry(&merged.geometry, &merged.junctions, config)?;
    Some(SimplifiedPath::from_merged(merged, geometry))
}

/// Applies the policy to the components of one network. Vertices in
/// `junctions` survive reduction wherever they occur.
///
/// Components that reduce to fewer than two distinct vertices are dropped on
/// their own; only when all of them go does the network yield `None`.
pub fn reduce_geometry(
    geometry: &MultiLineString<f64>,
    junctions: &Junctions,
    config: &ReducerConfig,
) -> Option<MultiLineString<f64>> {
    let components: Vec<LineString<f64>> = match config.policy {
        ReducePolicy::PreserveAll => geometry
            .0
            .iter()
            .map(|ls| simplify_preserving(ls, config.tolerance, junctions))
            .collect(),
        ReducePolicy::MainTrunkOnly => main_trunk(geometry)
            .map(|trunk| simplify_preserving(trunk, config.tolerance, junctions))
            .into_iter()
            .collect(),
        ReducePolicy::LengthAwareHybrid => {
            let threshold = config.hybrid_threshold();
            geometry
                .0
                .iter()
                .map(|ls| {
                    if euclidean_length(ls) <= threshold {
                        ls.clone()
                    } else {
                        simplify_preserving(ls, config.tolerance, junctions)
                    }
                })
                .collect()
        }
    };

    let before = components.len();
    let kept: Vec<LineString<f64>> = components.into_iter().filter(is_usable).collect();
    if kept.len() < before {
        debug!("Dropped {} degenerate components", before - kept.len());
    }

    if kept.is_empty() {
        None
    } else {
        Some(MultiLineString::new(kept))
    }
}

/// The longest component; the first one wins a tie.
pub fn main_trunk(geometry: &MultiLineString<f64>) -> Option<&LineString<f64>> {
    geometry.0.iter().reduce(|best, ls| {
        if euclidean_length(ls) > euclidean_length(best) {
            ls
        } else {
            best
        }
    })
}

/// Planar length in coordinate units.
pub fn euclidean_length(ls: &LineString<f64>) -> f64 {
    Euclidean.length(ls)
}

fn is_usable(ls: &LineString<f64>) -> bool {
    let mut coords = ls.0.iter();
    match coords.next() {
        Some(first) => coords.any(|c: &Coord<f64>| c != first),
        None => false,
    }
}
