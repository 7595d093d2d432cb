//! GeoJSON reading and writing at the edges of the engine.

use crate::error::{FeederError, io_err};
use crate::pipeline::ScreenedFeature;
use flate2::Compression;
use flate2::write::GzEncoder;
use geo_types::{Coord, LineString, MultiLineString, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn read_feature_collection(path: &Path) -> Result<FeatureCollection, FeederError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err!(path, e))?;
    let geojson: GeoJson = text.parse()?;
    Ok(FeatureCollection::try_from(geojson)?)
}

// geojson's own conversion to geo-types indexes positions directly and panics
// on one with fewer than two values, so source positions are read here and a
// short one costs only that vertex.
fn position_to_coord(position: &[f64]) -> Option<Coord<f64>> {
    match position {
        [x, y, ..] => Some(Coord { x: *x, y: *y }),
        _ => None,
    }
}

fn positions_to_line(positions: &[Vec<f64>]) -> LineString<f64> {
    positions
        .iter()
        .filter_map(|p| position_to_coord(p))
        .collect()
}

/// Line parts of a GeoJSON geometry. `None` for non-line geometry or when
/// there are no parts at all; degenerate parts are left for later stages.
pub fn value_to_multi_line(value: &Value) -> Option<MultiLineString<f64>> {
    let mut parts = Vec::new();
    collect_line_parts(value, &mut parts);
    if parts.is_empty() {
        None
    } else {
        Some(MultiLineString::new(parts))
    }
}

fn collect_line_parts(value: &Value, parts: &mut Vec<LineString<f64>>) {
    match value {
        Value::LineString(positions) => parts.push(positions_to_line(positions)),
        Value::MultiLineString(lines) => {
            parts.extend(lines.iter().map(|positions| positions_to_line(positions)))
        }
        Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                collect_line_parts(&geometry.value, parts);
            }
        }
        _ => {}
    }
}

/// Polygon parts of a GeoJSON geometry; other geometry types give nothing.
pub fn value_to_polygons(value: &Value) -> Vec<Polygon<f64>> {
    let ring_polygon = |rings: &Vec<Vec<Vec<f64>>>| -> Option<Polygon<f64>> {
        let mut rings = rings.iter().map(|r| positions_to_line(r));
        let exterior = rings.next()?;
        Some(Polygon::new(exterior, rings.collect()))
    };

    match value {
        Value::Polygon(rings) => ring_polygon(rings).into_iter().collect(),
        Value::MultiPolygon(polygons) => polygons.iter().filter_map(ring_polygon).collect(),
        Value::GeometryCollection(geometries) => geometries
            .iter()
            .flat_map(|g| value_to_polygons(&g.value))
            .collect(),
        _ => Vec::new(),
    }
}

/// A single component is written as a LineString, more as a MultiLineString.
pub fn multi_line_to_value(geometry: &MultiLineString<f64>) -> Value {
    match geometry.0.as_slice() {
        [single] => Value::from(single),
        _ => Value::from(geometry),
    }
}

impl ScreenedFeature {
    /// Identifier first, then carried fields, metrics and flags. Metrics and
    /// flags win a name clash with a carried field.
    pub fn to_geojson(&self, id_field: &str) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert(id_field.to_string(), self.source_id.clone());
        for (name, value) in &self.attributes {
            properties.insert(name.clone(), value.to_json());
        }
        for (name, value) in &self.derived_metrics {
            let number = serde_json::Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null);
            properties.insert(name.clone(), number);
        }
        for (name, flag) in &self.flags {
            properties.insert(name.clone(), JsonValue::Bool(*flag));
        }

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(multi_line_to_value(&self.geometry))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Writes the output collection and returns the number of bytes written.
pub fn write_feature_collection(
    path: &Path,
    features: &[ScreenedFeature],
    id_field: &str,
) -> Result<u64, FeederError> {
    let geojson = GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features: features.iter().map(|f| f.to_geojson(id_field)).collect(),
        foreign_members: None,
    });

    let file = File::create(path).map_err(|e| io_err!(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &geojson)?;
    writer.flush().map_err(|e| io_err!(path, e))?;

    let size = std::fs::metadata(path).map_err(|e| io_err!(path, e))?.len();
    Ok(size)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzipSummary {
    pub path: PathBuf,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

impl GzipSummary {
    pub fn ratio_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            0.0
        } else {
            self.compressed_bytes as f64 / self.original_bytes as f64 * 100.0
        }
    }
}

/// Writes `<path>.gz` next to `path`.
pub fn gzip_sidecar(path: &Path) -> Result<GzipSummary, FeederError> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    let input = File::open(path).map_err(|e| io_err!(path, e))?;
    let output = File::create(&gz_path).map_err(|e| io_err!(gz_path, e))?;

    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    std::io::copy(&mut BufReader::new(input), &mut encoder).map_err(|e| io_err!(path, e))?;
    let mut inner = encoder.finish().map_err(|e| io_err!(gz_path, e))?;
    inner.flush().map_err(|e| io_err!(gz_path, e))?;

    let original_bytes = std::fs::metadata(path).map_err(|e| io_err!(path, e))?.len();
    let compressed_bytes = std::fs::metadata(&gz_path)
        .map_err(|e| io_err!(gz_path, e))?
        .len();

    Ok(GzipSummary {
        path: gz_path,
        original_bytes,
        compressed_bytes,
    })
}
