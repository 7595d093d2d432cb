use crate::error::FeederError;
use crate::segments::{IngestSchema, RawSegment};
use ahash::AHashMap;
use geojson::{Feature, JsonValue};
use log::{debug, warn};

/// All fragments that belong to one feeder network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkGroup {
    pub network_id: String,
    /// Source identifier of the first segment.
    pub source_id: JsonValue,
    /// Input order is kept.
    pub segments: Vec<RawSegment>,
}

impl NetworkGroup {
    pub fn vertex_count(&self) -> usize {
        self.segments.iter().map(RawSegment::vertex_count).sum()
    }
}

/// Output of [`group_features`]: the groups plus every row that could not be
/// placed in one.
#[derive(Debug, Default)]
pub struct GroupedFeatures {
    pub groups: Vec<NetworkGroup>,
    pub rejected: Vec<FeederError>,
}

/// Partitions segments by exact identifier match.
///
/// Groups come out in order of first appearance. The hash map is only used
/// as an index into the output vector, so its iteration order never leaks.
pub fn group_segments(segments: Vec<RawSegment>) -> Vec<NetworkGroup> {
    let mut index: AHashMap<String, usize> = AHashMap::new();
    let mut groups: Vec<NetworkGroup> = Vec::new();

    for segment in segments {
        match index.get(&segment.network_id) {
            Some(&slot) => groups[slot].segments.push(segment),
            None => {
                index.insert(segment.network_id.clone(), groups.len());
                groups.push(NetworkGroup {
                    network_id: segment.network_id.clone(),
                    source_id: segment.source_id.clone(),
                    segments: vec![segment],
                });
            }
        }
    }

    groups
}

/// Ingests and groups a batch of source features. Rows without an identifier
/// are logged and collected in `rejected`; they never abort the batch.
pub fn group_features(features: &[Feature], schema: &IngestSchema) -> GroupedFeatures {
    let mut segments = Vec::with_capacity(features.len());
    let mut rejected = Vec::new();

    for (i, feature) in features.iter().enumerate() {
        match RawSegment::from_feature(i, feature, schema) {
            Ok(segment) => segments.push(segment),
            Err(e) => {
                warn!("Skipping row: {}", e);
                rejected.push(e);
            }
        }
    }

    let groups = group_segments(segments);
    debug!(
        "Grouped {} features into {} networks ({} rejected)",
        features.len(),
        groups.len(),
        rejected.len()
    );

    GroupedFeatures { groups, rejected }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::FieldValues;
    use geojson::JsonObject;

    fn segment(id: &str) -> RawSegment {
        RawSegment {
            network_id: id.to_string(),
            source_id: JsonValue::from(id),
            geometry: None,
            attributes: FieldValues::new(),
        }
    }

    #[test]
    fn test_group_segments_preserves_every_segment_once() {
        let input = vec![
            segment("B"),
            segment("A"),
            segment("B"),
            segment("C"),
            segment("A"),
        ];
        let groups = group_segments(input);

        let ids: Vec<&str> = groups.iter().map(|g| g.network_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "C"]);

        let total: usize = groups.iter().map(|g| g.segments.len()).sum();
        assert_eq!(total, 5);

        for group in &groups {
            assert!(group.segments.iter().all(|s| s.network_id == group.network_id));
        }
    }

    #[test]
    fn test_group_segments_exact_match_only() {
        let groups = group_segments(vec![segment("F1"), segment("f1"), segment(" F1")]);
        assert_eq!(groups.len(), 3, "case and whitespace must not be folded");
    }

    #[test]
    fn test_group_features_rejects_missing_key_rows() {
        let mut with_id = JsonObject::new();
        with_id.insert("Feeder".to_string(), JsonValue::from("F1"));
        let mut without_id = JsonObject::new();
        without_id.insert("Other".to_string(), JsonValue::from("x"));

        let features: Vec<Feature> = [with_id.clone(), without_id, with_id]
            .into_iter()
            .map(|props| Feature {
                bbox: None,
                geometry: None,
                id: None,
                properties: Some(props),
                foreign_members: None,
            })
            .collect();

        let grouped = group_features(&features, &IngestSchema::new("Feeder", vec![]));
        assert_eq!(grouped.groups.len(), 1);
        assert_eq!(grouped.groups[0].segments.len(), 2);
        assert_eq!(grouped.rejected.len(), 1);
        assert!(matches!(
            grouped.rejected[0],
            FeederError::MissingKey { feature_index: 1, .. }
        ));
    }
}
