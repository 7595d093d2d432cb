//! Topology-preserving Douglas-Peucker.
//!
//! Plain Douglas-Peucker may replace a run of vertices with a shortcut that
//! cuts across another part of the same line. Here a span is only collapsed
//! when its shortcut stays clear of the rest of the original line, and a final
//! pass re-inserts vertices while any two reduced segments still cross.

use crate::reconstruct::Junctions;
use geo::line_intersection::{LineIntersection, line_intersection};
use geo::{Distance, Euclidean};
use geo_types::{Coord, Line, LineString};

/// Simplifies a single line at `tolerance` (same unit as the coordinates).
///
/// Endpoints and every vertex in `junctions` are always kept, so branch
/// points inside a merged line survive. A closed line keeps at least four
/// coordinates. Lines with fewer than three vertices and non-positive
/// tolerances are returned unchanged.
pub fn simplify_preserving(
    line: &LineString<f64>,
    tolerance: f64,
    junctions: &Junctions,
) -> LineString<f64> {
    let coords = &line.0;
    let n = coords.len();
    if n < 3 || !(tolerance > 0.0) {
        return line.clone();
    }

    let mut kept = vec![false; n];
    kept[0] = true;
    kept[n - 1] = true;
    for i in 1..n - 1 {
        if junctions.contains(coords[i]) {
            kept[i] = true;
        }
    }

    let closed = coords[0] == coords[n - 1];
    if closed && !kept[1..n - 1].contains(&true) {
        // A ring's shortcut is a single point; anchor it on the far side first.
        let origin = coords[0];
        let far = (1..n - 1).max_by(|&a, &b| {
            let da = Euclidean.distance(coords[a], origin);
            let db = Euclidean.distance(coords[b], origin);
            da.total_cmp(&db)
        });
        if let Some(far) = far {
            kept[far] = true;
        }
    }

    let mut stack: Vec<(usize, usize)> = kept_indices(&kept)
        .windows(2)
        .map(|w| (w[0], w[1]))
        .collect();

    while let Some((start, end)) = stack.pop() {
        let Some((idx, dist)) = farthest_in_span(coords, start, end) else {
            continue;
        };
        if dist > tolerance || shortcut_crosses_line(coords, start, end) {
            kept[idx] = true;
            stack.push((start, idx));
            stack.push((idx, end));
        }
    }

    if closed {
        keep_ring_open(coords, &mut kept);
    }
    resolve_crossings(coords, &mut kept);

    coords
        .iter()
        .zip(&kept)
        .filter(|&(_, k)| *k)
        .map(|(c, _)| *c)
        .collect()
}

fn kept_indices(kept: &[bool]) -> Vec<usize> {
    (0..kept.len()).filter(|&i| kept[i]).collect()
}

/// A closed line needs three distinct vertices to still enclose anything.
fn keep_ring_open(coords: &[Coord<f64>], kept: &mut [bool]) {
    while kept_indices(kept).len() < 4 {
        let idx = kept_indices(kept);
        let widest = idx
            .windows(2)
            .filter_map(|w| farthest_in_span(coords, w[0], w[1]))
            .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best });
        match widest {
            Some((i, _)) => kept[i] = true,
            None => break,
        }
    }
}

/// Interior vertex of `start..end` farthest from the chord, with its distance.
fn farthest_in_span(coords: &[Coord<f64>], start: usize, end: usize) -> Option<(usize, f64)> {
    if end <= start + 1 {
        return None;
    }
    let chord = Line::new(coords[start], coords[end]);
    (start + 1..end)
        .map(|i| (i, Euclidean.distance(coords[i], &chord)))
        .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
            Some((_, best_d)) if best_d >= d => best,
            _ => Some((i, d)),
        })
}

/// Whether the chord `start -> end` touches any original segment outside the
/// span, other than at a vertex the two share.
fn shortcut_crosses_line(coords: &[Coord<f64>], start: usize, end: usize) -> bool {
    let chord = Line::new(coords[start], coords[end]);
    (0..coords.len() - 1)
        .filter(|&i| i < start || i >= end)
        .any(|i| {
            let segment = Line::new(coords[i], coords[i + 1]);
            conflicts(&chord, &segment)
        })
}

/// Re-inserts vertices until no two kept segments intersect improperly.
/// Neighbouring segments may only meet at their shared vertex; folding back
/// over each other counts as a crossing.
fn resolve_crossings(coords: &[Coord<f64>], kept: &mut [bool]) {
    let closed = coords.first() == coords.last();

    loop {
        let idx = kept_indices(kept);
        let spans = idx.len().saturating_sub(1);
        let mut refined = false;

        'search: for p in 0..spans {
            for q in p + 1..spans {
                let a = Line::new(coords[idx[p]], coords[idx[p + 1]]);
                let b = Line::new(coords[idx[q]], coords[idx[q + 1]]);
                let adjacent = q == p + 1 || (closed && p == 0 && q == spans - 1);
                let crossing = if adjacent {
                    overlaps(&a, &b)
                } else {
                    conflicts(&a, &b)
                };
                if !crossing {
                    continue;
                }
                // split the wider span; if neither has interior vertices the
                // crossing was already in the input
                let (wide, narrow) = if idx[p + 1] - idx[p] >= idx[q + 1] - idx[q] {
                    ((idx[p], idx[p + 1]), (idx[q], idx[q + 1]))
                } else {
                    ((idx[q], idx[q + 1]), (idx[p], idx[p + 1]))
                };
                for (s, e) in [wide, narrow] {
                    if let Some((i, _)) = farthest_in_span(coords, s, e) {
                        kept[i] = true;
                        refined = true;
                        break 'search;
                    }
                }
            }
        }

        if !refined {
            break;
        }
    }
}

/// Two segments conflict when they intersect anywhere other than a single
/// shared endpoint.
fn conflicts(a: &Line<f64>, b: &Line<f64>) -> bool {
    match line_intersection(*a, *b) {
        None => false,
        Some(LineIntersection::SinglePoint {
            intersection,
            is_proper,
        }) => {
            let shared = |l: &Line<f64>| l.start == intersection || l.end == intersection;
            is_proper || !(shared(a) && shared(b))
        }
        Some(LineIntersection::Collinear { .. }) => true,
    }
}

/// Segments sharing a vertex that run back over each other.
fn overlaps(a: &Line<f64>, b: &Line<f64>) -> bool {
    matches!(
        line_intersection(*a, *b),
        Some(LineIntersection::Collinear { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(points: &[(f64, f64)]) -> LineString<f64> {
        points.iter().map(|&(x, y)| Coord { x, y }).collect()
    }

    fn none() -> Junctions {
        Junctions::default()
    }

    fn has_self_crossing(ls: &LineString<f64>) -> bool {
        let segments: Vec<Line<f64>> = ls.lines().collect();
        let closed = ls.0.first() == ls.0.last();
        let last = segments.len().saturating_sub(1);
        for p in 0..segments.len() {
            for q in p + 1..segments.len() {
                let adjacent = q == p + 1 || (closed && p == 0 && q == last);
                let crossing = if adjacent {
                    overlaps(&segments[p], &segments[q])
                } else {
                    conflicts(&segments[p], &segments[q])
                };
                if crossing {
                    return true;
                }
            }
        }
        false
    }

    #[test]
    fn test_short_lines_unchanged() {
        let ls = line(&[(0.0, 0.0), (1.0, 0.0)]);
        assert_eq!(simplify_preserving(&ls, 10.0, &none()), ls);
    }

    #[test]
    fn test_collinear_points_collapse() {
        let ls = line(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        let out = simplify_preserving(&ls, 0.1, &none());
        assert_eq!(out, line(&[(0.0, 0.0), (3.0, 0.0)]));
    }

    #[test]
    fn test_peaks_above_tolerance_kept() {
        let ls = line(&[(0.0, 0.0), (2.0, 5.0), (4.0, 0.0), (6.0, 5.0), (8.0, 0.0)]);
        assert_eq!(simplify_preserving(&ls, 1.0, &none()).0.len(), 5);
        assert_eq!(simplify_preserving(&ls, 10.0, &none()).0.len(), 2);
    }

    #[test]
    fn test_shortcut_would_cross_line() {
        // The tail loops back and ends just under a small bump. Flattening the
        // bump would run the line straight through the tail.
        let ls = line(&[
            (0.0, 0.0),
            (4.0, 0.0),
            (5.0, 0.5),
            (6.0, 0.0),
            (10.0, 0.0),
            (10.0, -5.0),
            (5.0, -5.0),
            (5.0, 0.2),
        ]);
        assert!(!has_self_crossing(&ls));

        let out = simplify_preserving(&ls, 1.0, &none());
        assert!(out.0.contains(&Coord { x: 5.0, y: 0.5 }));
        assert!(out.0.len() < ls.0.len());
        assert!(!has_self_crossing(&out));
        assert_eq!(out.0.first(), ls.0.first());
        assert_eq!(out.0.last(), ls.0.last());
    }

    #[test]
    fn test_ring_keeps_far_side() {
        let ls = line(&[
            (0.0, 0.0),
            (1.0, 0.0),
            (2.0, 0.0),
            (2.0, 2.0),
            (0.0, 2.0),
            (0.0, 0.0),
        ]);
        let out = simplify_preserving(&ls, 0.5, &none());
        assert!(out.0.len() >= 4);
        assert_eq!(out.0.first(), out.0.last());
        assert!(out.0.contains(&Coord { x: 2.0, y: 2.0 }));
    }

    #[test]
    fn test_never_adds_vertices() {
        let ls = line(&[
            (0.0, 0.0),
            (0.3, 0.02),
            (0.6, -0.01),
            (1.0, 0.0),
            (1.2, 0.5),
            (1.0, 1.0),
        ]);
        for tol in [0.0001, 0.01, 0.1, 1.0, 10.0] {
            let out = simplify_preserving(&ls, tol, &none());
            assert!(out.0.len() <= ls.0.len());
            assert!(out.0.len() >= 2);
        }
    }

    #[test]
    fn test_narrow_ring_stays_a_ring() {
        let ls = line(&[(0.0, 0.0), (1.0, 0.0), (1.0, 0.01), (0.0, 0.01), (0.0, 0.0)]);
        let out = simplify_preserving(&ls, 0.1, &none());

        assert!(out.0.len() >= 4, "{:?}", out);
        assert_eq!(out.0.first(), out.0.last());
        assert!(!has_self_crossing(&out));
        assert!(out.0.contains(&Coord { x: 1.0, y: 0.01 }));
    }

    #[test]
    fn test_fold_back_is_a_crossing() {
        let folded = line(&[(0.0, 0.0), (1.0, 0.01), (0.0, 0.0)]);
        assert!(has_self_crossing(&folded));

        let straight = line(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
        assert!(!has_self_crossing(&straight));
    }

    #[test]
    fn test_junction_vertices_are_kept() {
        let ls = line(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        let junctions = Junctions::from_coords([Coord { x: 2.0, y: 0.0 }]);

        let out = simplify_preserving(&ls, 0.1, &junctions);
        assert_eq!(out, line(&[(0.0, 0.0), (2.0, 0.0), (3.0, 0.0)]));
    }
}
