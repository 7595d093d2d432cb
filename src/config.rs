use crate::error::FeederError;
use crate::metrics::{
    ConditionSource, EligibilityRule, MetricDefinition, MetricForm, ThresholdCondition,
};
use crate::reduce::{DEFAULT_HYBRID_MULTIPLIER, ReducePolicy, ReducerConfig};
use crate::segments::IngestSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Everything the engine reads before processing a batch.
///
/// Loaded from RON; every field has a default so a file only needs to name
/// what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Property holding the feeder/network identifier, in input and output.
    pub id_field: String,
    pub policy: ReducePolicy,
    /// Reduction tolerance in the unit of the input CRS.
    pub tolerance: f64,
    /// Hybrid pass-through length is `tolerance * hybrid_multiplier`.
    pub hybrid_multiplier: f64,
    /// Decimals for derived metrics without their own setting.
    pub round_digits: u32,
    pub coordinate_precision: u32,
    pub metric_thresholds: BTreeMap<String, f64>,
    pub metrics: Vec<MetricDefinition>,
    pub eligibility: Vec<EligibilityRule>,
    /// Source fields copied through to the output unchanged.
    pub extra_keep_fields: Vec<String>,
    pub max_threads: Option<usize>,
    /// Networks with more input vertices than this are skipped.
    pub max_group_vertices: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id_field: "Feeder".to_string(),
            policy: ReducePolicy::PreserveAll,
            tolerance: 0.00005,
            hybrid_multiplier: DEFAULT_HYBRID_MULTIPLIER,
            round_digits: 1,
            coordinate_precision: 4,
            metric_thresholds: BTreeMap::new(),
            metrics: Vec::new(),
            eligibility: Vec::new(),
            extra_keep_fields: Vec::new(),
            max_threads: None,
            max_group_vertices: None,
        }
    }
}

/// Screening layers of the distribution capacity maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    /// Load capacity: forecast 2034 peak against summer rating, plus a
    /// readiness flag.
    Load,
    /// Generation hosting capacity: share of the feeder rating already used.
    Generation,
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "load" => Ok(Preset::Load),
            "generation" | "gen" => Ok(Preset::Generation),
            _ => Err(format!(
                "Unknown preset: '{}'. Valid options: load, generation",
                s
            )),
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Preset::Load => write!(f, "load"),
            Preset::Generation => write!(f, "generation"),
        }
    }
}

impl EngineConfig {
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Load => EngineConfig {
                id_field: "Feeder".to_string(),
                metric_thresholds: [
                    ("ready_peak_2025".to_string(), 0.85),
                    ("ready_peak_2034".to_string(), 95.0),
                ]
                .into_iter()
                .collect(),
                metrics: vec![MetricDefinition::ratio(
                    "Peak_34",
                    "FIRST_F2034_Peak_MVA",
                    "FIRST_Summer_Rating__MVA_",
                    100.0,
                )],
                eligibility: vec![EligibilityRule {
                    name: "Ready".to_string(),
                    conditions: vec![
                        ThresholdCondition {
                            source: ConditionSource::Field("FIRST_F2025_Peak__".to_string()),
                            threshold: "ready_peak_2025".to_string(),
                        },
                        ThresholdCondition {
                            source: ConditionSource::Metric("Peak_34".to_string()),
                            threshold: "ready_peak_2034".to_string(),
                        },
                    ],
                }],
                ..EngineConfig::default()
            },
            Preset::Generation => EngineConfig {
                id_field: "Network_ID".to_string(),
                metrics: vec![
                    MetricDefinition::ratio("Util", "HC", "Feeder_SN", 100.0)
                        .with_form(MetricForm::Headroom),
                ],
                ..EngineConfig::default()
            },
        }
    }

    pub fn from_ron_str(text: &str) -> Result<Self, FeederError> {
        let config: EngineConfig = ron::from_str(text)
            .map_err(|e| FeederError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, FeederError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| crate::error::io_err!(path, e))?;
        Self::from_ron_str(&text)
    }

    /// Rejects configurations that cannot run. Called before any processing.
    pub fn validate(&self) -> Result<(), FeederError> {
        let invalid = |msg: String| Err(FeederError::InvalidConfiguration(msg));

        if self.id_field.is_empty() {
            return invalid("id_field must not be empty".to_string());
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return invalid(format!("tolerance must be > 0, got {}", self.tolerance));
        }
        if !self.hybrid_multiplier.is_finite() || self.hybrid_multiplier <= 0.0 {
            return invalid(format!(
                "hybrid_multiplier must be > 0, got {}",
                self.hybrid_multiplier
            ));
        }
        if self.max_threads == Some(0) {
            return invalid("max_threads must be at least 1".to_string());
        }

        for (name, value) in &self.metric_thresholds {
            if !value.is_finite() {
                return invalid(format!("threshold '{}' is not a finite number", name));
            }
        }

        let mut metric_names: Vec<&str> = Vec::new();
        for metric in &self.metrics {
            if metric.name.is_empty() {
                return invalid("metric names must not be empty".to_string());
            }
            if metric.name == self.id_field {
                return invalid(format!("metric '{}' shadows id_field", metric.name));
            }
            if metric_names.contains(&metric.name.as_str()) {
                return invalid(format!("metric '{}' is defined twice", metric.name));
            }
            if !metric.scale.is_finite() {
                return invalid(format!("metric '{}' has a non-finite scale", metric.name));
            }
            metric_names.push(&metric.name);
        }

        let mut flag_names: Vec<&str> = Vec::new();
        for rule in &self.eligibility {
            if rule.name.is_empty() {
                return invalid("flag names must not be empty".to_string());
            }
            if rule.name == self.id_field {
                return invalid(format!("flag '{}' shadows id_field", rule.name));
            }
            if metric_names.contains(&rule.name.as_str()) {
                return invalid(format!("flag '{}' is also a metric name", rule.name));
            }
            if flag_names.contains(&rule.name.as_str()) {
                return invalid(format!("flag '{}' is defined twice", rule.name));
            }
            flag_names.push(&rule.name);

            for condition in &rule.conditions {
                if !self.metric_thresholds.contains_key(&condition.threshold) {
                    return invalid(format!(
                        "rule '{}' uses undefined threshold '{}'",
                        rule.name, condition.threshold
                    ));
                }
                if let ConditionSource::Metric(name) = &condition.source {
                    if !metric_names.contains(&name.as_str()) {
                        return invalid(format!(
                            "rule '{}' uses undefined metric '{}'",
                            rule.name, name
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn reducer(&self) -> ReducerConfig {
        ReducerConfig {
            policy: self.policy,
            tolerance: self.tolerance,
            hybrid_multiplier: self.hybrid_multiplier,
        }
    }

    /// Source fields that must survive ingestion.
    pub fn ingest_schema(&self) -> IngestSchema {
        let mut fields: Vec<String> = Vec::new();
        for metric in &self.metrics {
            fields.push(metric.numerator_field.clone());
            fields.push(metric.denominator_field.clone());
        }
        for rule in &self.eligibility {
            for condition in &rule.conditions {
                if let ConditionSource::Field(name) = &condition.source {
                    fields.push(name.clone());
                }
            }
        }
        fields.extend(self.extra_keep_fields.iter().cloned());
        IngestSchema::new(self.id_field.clone(), fields)
    }
}
