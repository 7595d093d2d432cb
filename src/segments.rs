//! Ingestion of raw feeder fragments.
//!
//! Source features carry arbitrary property bags. Only the identifier and the
//! fields named in an [`IngestSchema`] survive ingestion; everything else is
//! dropped here so later stages work against a fixed set of named fields.

use crate::error::FeederError;
use crate::geojson_io::value_to_multi_line;
use geo_types::MultiLineString;
use geojson::{Feature, JsonValue};
use serde::Serialize;
use std::collections::BTreeMap;

/// A single attribute value as it arrived from the source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl Scalar {
    pub fn from_json(value: &JsonValue) -> Scalar {
        match value {
            JsonValue::Number(n) => n.as_f64().map(Scalar::Number).unwrap_or(Scalar::Null),
            JsonValue::String(s) => Scalar::Text(s.clone()),
            JsonValue::Bool(b) => Scalar::Bool(*b),
            // nested values are not scalars
            _ => Scalar::Null,
        }
    }

    /// Numeric view of the value. Numeric text such as `"12.5"` counts as a
    /// number; anything else, including NaN and infinities, is missing.
    pub fn as_number(&self) -> Option<f64> {
        let value = match self {
            Scalar::Number(n) => *n,
            Scalar::Text(s) => s.trim().parse::<f64>().ok()?,
            Scalar::Bool(_) | Scalar::Null => return None,
        };
        value.is_finite().then_some(value)
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Scalar::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Scalar::Text(s) => JsonValue::String(s.clone()),
            Scalar::Bool(b) => JsonValue::Bool(*b),
            Scalar::Null => JsonValue::Null,
        }
    }
}

pub type FieldValues = BTreeMap<String, Scalar>;

/// Numeric lookup that treats absent, null and non-numeric fields alike.
pub fn numeric_field(values: &FieldValues, field: &str) -> Option<f64> {
    values.get(field).and_then(Scalar::as_number)
}

/// Which fields are read off each source feature.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSchema {
    pub id_field: String,
    pub fields: Vec<String>,
}

impl IngestSchema {
    pub fn new(id_field: impl Into<String>, fields: Vec<String>) -> Self {
        let mut fields = fields;
        fields.sort();
        fields.dedup();
        Self {
            id_field: id_field.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    pub network_id: String,
    /// The identifier as it appeared in the source, number or string.
    pub source_id: JsonValue,
    /// Single-part inputs arrive as a one-part multi line. `None` when the
    /// feature had no line geometry at all.
    pub geometry: Option<MultiLineString<f64>>,
    pub attributes: FieldValues,
}

impl RawSegment {
    /// Reads one source feature. Fails with [`FeederError::MissingKey`] when
    /// the identifier is absent or null.
    ///
    /// The identifier is taken verbatim: strings are not trimmed or case
    /// folded, numbers are grouped by their JSON text and keep their JSON
    /// type in `source_id`.
    pub fn from_feature(
        feature_index: usize,
        feature: &Feature,
        schema: &IngestSchema,
    ) -> Result<RawSegment, FeederError> {
        let missing = || FeederError::MissingKey {
            field: schema.id_field.clone(),
            feature_index,
        };

        let properties = feature.properties.as_ref().ok_or_else(missing)?;

        let source_id = match properties.get(&schema.id_field) {
            None | Some(JsonValue::Null) => return Err(missing()),
            Some(value) => value.clone(),
        };
        let network_id = match &source_id {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };

        let attributes = schema
            .fields
            .iter()
            .filter_map(|field| {
                properties
                    .get(field)
                    .map(|value| (field.clone(), Scalar::from_json(value)))
            })
            .collect();

        let geometry = feature
            .geometry
            .as_ref()
            .and_then(|g| value_to_multi_line(&g.value));

        Ok(RawSegment {
            network_id,
            source_id,
            geometry,
            attributes,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry
            .as_ref()
            .map(|ml| ml.0.iter().map(|ls| ls.0.len()).sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::{Geometry, JsonObject, Value};

    fn feature(properties: JsonObject, geometry: Option<Value>) -> Feature {
        Feature {
            bbox: None,
            geometry: geometry.map(Geometry::new),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }

    #[test]
    fn test_scalar_numeric_coercion() {
        assert_eq!(Scalar::Number(3.5).as_number(), Some(3.5));
        assert_eq!(Scalar::Text(" 12.5 ".to_string()).as_number(), Some(12.5));
        assert_eq!(Scalar::Text("n/a".to_string()).as_number(), None);
        assert_eq!(Scalar::Text("NaN".to_string()).as_number(), None);
        assert_eq!(Scalar::Bool(true).as_number(), None);
        assert_eq!(Scalar::Null.as_number(), None);
    }

    #[test]
    fn test_from_feature_keeps_only_schema_fields() {
        let mut props = JsonObject::new();
        props.insert("Feeder".to_string(), "F1 ".into());
        props.insert("HC".to_string(), 4.2.into());
        props.insert("OWNER".to_string(), "someone".into());

        let schema = IngestSchema::new("Feeder", vec!["HC".to_string(), "Feeder_SN".to_string()]);
        let f = feature(
            props,
            Some(Value::LineString(vec![vec![0.0, 0.0], vec![1.0, 0.0]])),
        );
        let seg = RawSegment::from_feature(0, &f, &schema).unwrap();

        // identifiers are taken verbatim
        assert_eq!(seg.network_id, "F1 ");
        assert_eq!(seg.attributes.len(), 1);
        assert_eq!(seg.attributes.get("HC"), Some(&Scalar::Number(4.2)));
        assert_eq!(seg.vertex_count(), 2);
    }

    #[test]
    fn test_from_feature_numeric_identifier() {
        let mut props = JsonObject::new();
        props.insert("Network_ID".to_string(), 1207.into());
        let schema = IngestSchema::new("Network_ID", vec![]);
        let seg = RawSegment::from_feature(3, &feature(props, None), &schema).unwrap();
        assert_eq!(seg.network_id, "1207");
        assert_eq!(seg.source_id, JsonValue::from(1207));
        assert!(seg.geometry.is_none());
    }

    #[test]
    fn test_from_feature_missing_identifier() {
        let mut props = JsonObject::new();
        props.insert("Feeder".to_string(), JsonValue::Null);
        let schema = IngestSchema::new("Feeder", vec![]);

        match RawSegment::from_feature(7, &feature(props, None), &schema) {
            Err(FeederError::MissingKey {
                field,
                feature_index,
            }) => {
                assert_eq!(field, "Feeder");
                assert_eq!(feature_index, 7);
            }
            other => panic!("expected MissingKey, got {:?}", other),
        }
    }
}
