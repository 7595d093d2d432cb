//! Point screener: places pre-geocoded sites against the published feeder
//! layer and reports incentive eligibility from the nearest feeder's
//! capacity figures.

use crate::compact::round_half_even;
use crate::error::{FeederError, io_err};
use crate::geojson_io::{value_to_multi_line, value_to_polygons};
use crate::segments::Scalar;
use geo::{Closest, ClosestPoint, Contains, Distance, Haversine};
use geo_types::{MultiLineString, MultiPolygon, Point};
use geojson::{Feature, JsonValue};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FEET_PER_METRE: f64 = 3.28084;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Sites pass a capacity test when the figure is strictly below this.
    pub threshold_pct: f64,
    pub id_field: String,
    pub gen_field: String,
    pub load_field: String,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            threshold_pct: 90.0,
            id_field: "FEEDER_ID".to_string(),
            gen_field: "GEN_CAPACITY_PCT".to_string(),
            load_field: "LOAD_CAPACITY_PCT".to_string(),
        }
    }
}

/// One row of the sites CSV.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Site {
    pub label: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Yes,
    No,
    Error,
}

impl From<bool> for Verdict {
    fn from(pass: bool) -> Self {
        if pass { Verdict::Yes } else { Verdict::No }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreeningRow {
    pub label: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub overall_eligible: Verdict,
    pub reason: String,
    pub feeder_id: Option<String>,
    pub distance_feet: Option<f64>,
    #[serde(rename = "GEN_CAPACITY_PCT")]
    pub gen_capacity_pct: Option<f64>,
    #[serde(rename = "LOAD_CAPACITY_PCT")]
    pub load_capacity_pct: Option<f64>,
    pub battery_incentive_eligible: Verdict,
    pub heat_pump_incentive_eligible: Verdict,
}

impl ScreeningRow {
    fn rejected(site: &Site, overall: Verdict, reason: &str) -> ScreeningRow {
        ScreeningRow {
            label: site.label.clone(),
            latitude: site.latitude,
            longitude: site.longitude,
            overall_eligible: overall,
            reason: reason.to_string(),
            feeder_id: None,
            distance_feet: None,
            gen_capacity_pct: None,
            load_capacity_pct: None,
            battery_incentive_eligible: overall,
            heat_pump_incentive_eligible: overall,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeederRecord {
    pub feeder_id: Option<String>,
    pub gen_capacity_pct: Option<f64>,
    pub load_capacity_pct: Option<f64>,
    pub geometry: MultiLineString<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct FeederIndex {
    pub feeders: Vec<FeederRecord>,
}

impl FeederIndex {
    /// Features without line geometry are left out.
    pub fn from_features(features: &[Feature], config: &ScreenConfig) -> FeederIndex {
        let feeders: Vec<FeederRecord> = features
            .iter()
            .filter_map(|feature| {
                let geometry = feature
                    .geometry
                    .as_ref()
                    .and_then(|g| value_to_multi_line(&g.value))?;
                let property = |name: &str| {
                    feature
                        .properties
                        .as_ref()
                        .and_then(|p| p.get(name))
                        .map(Scalar::from_json)
                };

                let feeder_id = match property(&config.id_field) {
                    Some(Scalar::Text(s)) => Some(s),
                    Some(Scalar::Number(n)) => Some(JsonValue::from(n).to_string()),
                    _ => None,
                };

                Some(FeederRecord {
                    feeder_id,
                    gen_capacity_pct: property(&config.gen_field).and_then(|s| s.as_number()),
                    load_capacity_pct: property(&config.load_field).and_then(|s| s.as_number()),
                    geometry,
                })
            })
            .collect();

        if feeders.len() < features.len() {
            warn!(
                "{} of {} feeder features have no line geometry",
                features.len() - feeders.len(),
                features.len()
            );
        }

        FeederIndex { feeders }
    }

    pub fn is_empty(&self) -> bool {
        self.feeders.is_empty()
    }

    /// Nearest feeder and its distance in metres. The closest point is found
    /// in lon/lat, then measured on the sphere.
    pub fn nearest(&self, site: Point<f64>) -> Option<(&FeederRecord, f64)> {
        self.feeders
            .iter()
            .filter_map(|feeder| {
                let closest = match feeder.geometry.closest_point(&site) {
                    Closest::Intersection(p) | Closest::SinglePoint(p) => p,
                    Closest::Indeterminate => return None,
                };
                Some((feeder, Haversine.distance(site, closest)))
            })
            .reduce(|best, candidate| if candidate.1 < best.1 { candidate } else { best })
    }
}

/// Service area polygons. A site must fall inside one of them.
#[derive(Debug, Clone)]
pub struct InclusionZone(pub MultiPolygon<f64>);

impl InclusionZone {
    pub fn from_features(features: &[Feature]) -> InclusionZone {
        let polygons = features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .flat_map(|g| value_to_polygons(&g.value))
            .collect();
        InclusionZone(MultiPolygon::new(polygons))
    }

    pub fn contains(&self, site: &Point<f64>) -> bool {
        self.0.contains(site)
    }
}

pub fn screen_site(
    site: &Site,
    feeders: &FeederIndex,
    inclusion: Option<&InclusionZone>,
    config: &ScreenConfig,
) -> ScreeningRow {
    let (Some(latitude), Some(longitude)) = (site.latitude, site.longitude) else {
        return ScreeningRow::rejected(site, Verdict::Error, "Site has no coordinates.");
    };
    let point = Point::new(longitude, latitude);

    if let Some(zone) = inclusion {
        if !zone.contains(&point) {
            return ScreeningRow::rejected(
                site,
                Verdict::No,
                "Site is outside the service area.",
            );
        }
    }

    let Some((feeder, metres)) = feeders.nearest(point) else {
        return ScreeningRow::rejected(site, Verdict::Error, "No feeders to screen against.");
    };

    let below = |value: Option<f64>| value.is_some_and(|v| v < config.threshold_pct);
    let battery = below(feeder.gen_capacity_pct) && below(feeder.load_capacity_pct);
    let heat_pump = below(feeder.load_capacity_pct);

    debug!(
        "Site '{}' nearest feeder {:?} at {:.1} m",
        site.label, feeder.feeder_id, metres
    );

    ScreeningRow {
        label: site.label.clone(),
        latitude: site.latitude,
        longitude: site.longitude,
        overall_eligible: Verdict::Yes,
        reason: "Within service area.".to_string(),
        feeder_id: feeder.feeder_id.clone(),
        distance_feet: Some(round_half_even(metres * FEET_PER_METRE, 1)),
        gen_capacity_pct: feeder.gen_capacity_pct,
        load_capacity_pct: feeder.load_capacity_pct,
        battery_incentive_eligible: battery.into(),
        heat_pump_incentive_eligible: heat_pump.into(),
    }
}

/// Screens every site. Row order follows `sites`.
pub fn screen_sites(
    sites: &[Site],
    feeders: &FeederIndex,
    inclusion: Option<&InclusionZone>,
    config: &ScreenConfig,
) -> Vec<ScreeningRow> {
    sites
        .par_iter()
        .map(|site| screen_site(site, feeders, inclusion, config))
        .collect()
}

pub fn read_sites(path: &Path) -> Result<Vec<Site>, FeederError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut sites = Vec::new();
    for record in reader.deserialize() {
        sites.push(record?);
    }
    Ok(sites)
}

pub fn write_report(path: &Path, rows: &[ScreeningRow]) -> Result<(), FeederError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| io_err!(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::{Geometry, JsonObject, Value};

    fn feeder(id: &str, lat: f64, gen_pct: Option<f64>, load_pct: Option<f64>) -> Feature {
        let mut props = JsonObject::new();
        props.insert("FEEDER_ID".to_string(), id.into());
        if let Some(g) = gen_pct {
            props.insert("GEN_CAPACITY_PCT".to_string(), g.into());
        }
        if let Some(l) = load_pct {
            props.insert("LOAD_CAPACITY_PCT".to_string(), l.into());
        }
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::LineString(vec![
                vec![-71.41, lat],
                vec![-71.40, lat],
            ]))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        }
    }

    fn site(label: &str, lat: f64) -> Site {
        Site {
            label: label.to_string(),
            latitude: Some(lat),
            longitude: Some(-71.405),
        }
    }

    fn index() -> FeederIndex {
        FeederIndex::from_features(
            &[
                feeder("A", 41.82, Some(40.0), Some(50.0)),
                feeder("B", 41.90, Some(95.0), Some(20.0)),
                feeder("C", 41.95, Some(10.0), None),
            ],
            &ScreenConfig::default(),
        )
    }

    #[test]
    fn test_nearest_feeder_and_distance() {
        let row = screen_site(&site("downtown", 41.8201), &index(), None, &ScreenConfig::default());
        assert_eq!(row.overall_eligible, Verdict::Yes);
        assert_eq!(row.feeder_id.as_deref(), Some("A"));
        // 0.0001 degrees of latitude is about 11 m
        let feet = row.distance_feet.unwrap();
        assert!(feet > 30.0 && feet < 42.0, "{}", feet);
        assert_eq!(row.battery_incentive_eligible, Verdict::Yes);
        assert_eq!(row.heat_pump_incentive_eligible, Verdict::Yes);
    }

    #[test]
    fn test_generation_limit_blocks_battery_only() {
        let row = screen_site(&site("north", 41.9001), &index(), None, &ScreenConfig::default());
        assert_eq!(row.feeder_id.as_deref(), Some("B"));
        assert_eq!(row.battery_incentive_eligible, Verdict::No);
        assert_eq!(row.heat_pump_incentive_eligible, Verdict::Yes);
    }

    #[test]
    fn test_missing_capacity_fails() {
        let row = screen_site(&site("edge", 41.9501), &index(), None, &ScreenConfig::default());
        assert_eq!(row.feeder_id.as_deref(), Some("C"));
        assert_eq!(row.battery_incentive_eligible, Verdict::No);
        assert_eq!(row.heat_pump_incentive_eligible, Verdict::No);
    }

    #[test]
    fn test_threshold_is_strict() {
        let config = ScreenConfig {
            threshold_pct: 50.0,
            ..ScreenConfig::default()
        };
        let row = screen_site(&site("downtown", 41.8201), &index(), None, &config);
        assert_eq!(row.heat_pump_incentive_eligible, Verdict::No);
    }

    #[test]
    fn test_outside_inclusion_zone() {
        let square = vec![vec![
            vec![-71.5, 41.8],
            vec![-71.3, 41.8],
            vec![-71.3, 41.85],
            vec![-71.5, 41.85],
            vec![-71.5, 41.8],
        ]];
        let zone = InclusionZone::from_features(&[Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Polygon(square))),
            id: None,
            properties: None,
            foreign_members: None,
        }]);
        let config = ScreenConfig::default();

        let inside = screen_site(&site("downtown", 41.8201), &index(), Some(&zone), &config);
        assert_eq!(inside.overall_eligible, Verdict::Yes);

        let outside = screen_site(&site("north", 41.9001), &index(), Some(&zone), &config);
        assert_eq!(outside.overall_eligible, Verdict::No);
        assert!(outside.reason.contains("outside the service area"));
        assert!(outside.feeder_id.is_none());
        assert_eq!(outside.battery_incentive_eligible, Verdict::No);
    }

    #[test]
    fn test_no_feeders_or_coordinates_is_error() {
        let config = ScreenConfig::default();
        let row = screen_site(&site("x", 41.82), &FeederIndex::default(), None, &config);
        assert_eq!(row.overall_eligible, Verdict::Error);

        let blank = Site {
            label: "ungeocoded".to_string(),
            latitude: None,
            longitude: None,
        };
        let row = screen_site(&blank, &index(), None, &config);
        assert_eq!(row.overall_eligible, Verdict::Error);
        assert_eq!(row.heat_pump_incentive_eligible, Verdict::Error);
    }

    #[test]
    fn test_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sites_path = dir.path().join("sites.csv");
        std::fs::write(
            &sites_path,
            "label,latitude,longitude\ndowntown,41.8201,-71.405\nungeocoded,,\n",
        )
        .unwrap();

        let sites = read_sites(&sites_path).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[1].latitude, None);

        let rows = screen_sites(&sites, &index(), None, &ScreenConfig::default());
        let report_path = dir.path().join("report.csv");
        write_report(&report_path, &rows).unwrap();

        let text = std::fs::read_to_string(&report_path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("label,latitude,longitude,overall_eligible"));
        assert!(header.contains("GEN_CAPACITY_PCT"));
        assert!(lines.next().unwrap().starts_with("downtown,41.8201,-71.405,yes"));
        assert!(lines.next().unwrap().starts_with("ungeocoded,,,error"));
    }
}
