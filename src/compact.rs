//! Output size reduction: coordinate rounding and attribute stripping.

use crate::segments::FieldValues;
use geo_types::{Coord, LineString, MultiLineString};

/// Rounds to `digits` decimals, ties to even.
///
/// Values too large to scale are returned as-is.
pub fn round_half_even(value: f64, digits: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(digits.min(i32::MAX as u32) as i32);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round_ties_even() / factor
}

/// Rounds every coordinate of every component. Vertex count is unchanged.
pub fn round_coordinates(geometry: MultiLineString<f64>, precision: u32) -> MultiLineString<f64> {
    geometry
        .0
        .into_iter()
        .map(|ls| {
            ls.0.into_iter()
                .map(|c| Coord {
                    x: round_half_even(c.x, precision),
                    y: round_half_even(c.y, precision),
                })
                .collect::<LineString<f64>>()
        })
        .collect()
}

/// Drops every attribute whose name is not in `keep`.
pub fn retain_fields(attributes: FieldValues, keep: &[String]) -> FieldValues {
    attributes
        .into_iter()
        .filter(|(name, _)| keep.iter().any(|k| k == name))
        .collect()
}
