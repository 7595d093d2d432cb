//! Capacity ratios and eligibility flags derived from raw feeder fields.
//!
//! A missing, non-numeric or zero denominator yields exactly `0.0`. That is a
//! business rule: a network with an unknown or zero rating is reported as
//! zero utilisation, even though the zero then looks like real data.

use crate::compact::round_half_even;
use crate::segments::{FieldValues, numeric_field};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricForm {
    /// `numerator / denominator * scale`
    #[default]
    Ratio,
    /// `(1 - numerator / denominator) * scale`, e.g. share of hosting
    /// capacity already used.
    Headroom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub numerator_field: String,
    pub denominator_field: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Falls back to the engine-wide `round_digits` when unset.
    #[serde(default)]
    pub round_digits: Option<u32>,
    #[serde(default)]
    pub form: MetricForm,
}

fn default_scale() -> f64 {
    100.0
}

impl MetricDefinition {
    pub fn ratio(name: &str, numerator: &str, denominator: &str, scale: f64) -> Self {
        MetricDefinition {
            name: name.to_string(),
            numerator_field: numerator.to_string(),
            denominator_field: denominator.to_string(),
            scale,
            round_digits: None,
            form: MetricForm::Ratio,
        }
    }

    pub fn with_form(mut self, form: MetricForm) -> Self {
        self.form = form;
        self
    }

    pub fn with_round_digits(mut self, digits: u32) -> Self {
        self.round_digits = Some(digits);
        self
    }

    pub fn derive(&self, attributes: &FieldValues, default_digits: u32) -> f64 {
        compute_metric(
            numeric_field(attributes, &self.numerator_field),
            numeric_field(attributes, &self.denominator_field),
            self.scale,
            self.round_digits.unwrap_or(default_digits),
            self.form,
        )
    }
}

/// Core formula. Any missing input, or a zero denominator, gives `0.0`.
pub fn compute_metric(
    numerator: Option<f64>,
    denominator: Option<f64>,
    scale: f64,
    round_digits: u32,
    form: MetricForm,
) -> f64 {
    let (Some(numerator), Some(denominator)) = (numerator, denominator) else {
        return 0.0;
    };
    if denominator == 0.0 {
        return 0.0;
    }

    let ratio = numerator / denominator;
    let value = match form {
        MetricForm::Ratio => ratio * scale,
        MetricForm::Headroom => (1.0 - ratio) * scale,
    };

    if value.is_finite() {
        round_half_even(value, round_digits)
    } else {
        0.0
    }
}

/// Where a threshold condition reads its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionSource {
    /// A metric derived in the same run.
    Metric(String),
    /// A raw source field.
    Field(String),
}

/// `source < thresholds[threshold]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdCondition {
    pub source: ConditionSource,
    pub threshold: String,
}

/// A flag that holds when every condition holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityRule {
    pub name: String,
    pub conditions: Vec<ThresholdCondition>,
}

impl EligibilityRule {
    /// A raw field that is missing, or a threshold that is not defined, makes
    /// its condition false.
    pub fn evaluate(
        &self,
        metrics: &BTreeMap<String, f64>,
        attributes: &FieldValues,
        thresholds: &BTreeMap<String, f64>,
    ) -> bool {
        self.conditions.iter().all(|condition| {
            let value = match &condition.source {
                ConditionSource::Metric(name) => metrics.get(name).copied(),
                ConditionSource::Field(name) => numeric_field(attributes, name),
            };
            match (value, thresholds.get(&condition.threshold)) {
                (Some(value), Some(limit)) => value < *limit,
                _ => false,
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedMetrics {
    pub values: BTreeMap<String, f64>,
    pub flags: BTreeMap<String, bool>,
}

/// Derives every metric, then every flag (flags may read the metrics).
pub fn derive_all(
    attributes: &FieldValues,
    definitions: &[MetricDefinition],
    rules: &[EligibilityRule],
    thresholds: &BTreeMap<String, f64>,
    default_digits: u32,
) -> DerivedMetrics {
    let values: BTreeMap<String, f64> = definitions
        .iter()
        .map(|d| (d.name.clone(), d.derive(attributes, default_digits)))
        .collect();

    let flags = rules
        .iter()
        .map(|r| (r.name.clone(), r.evaluate(&values, attributes, thresholds)))
        .collect();

    DerivedMetrics { values, flags }
}
