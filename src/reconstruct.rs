//! Rebuilds connected paths from the unordered fragments of one network.

use crate::grouping::NetworkGroup;
use crate::segments::{FieldValues, RawSegment};
use ahash::{AHashMap, AHashSet};
use geo::{Distance, Euclidean};
use geo_types::{Coord, LineString, MultiLineString};
use geojson::JsonValue;

#[derive(Debug, Clone, PartialEq)]
pub struct MergedPath {
    pub network_id: String,
    /// Identifier exactly as it appeared in the source.
    pub source_id: JsonValue,
    /// One line per connected component, in merge order.
    pub geometry: MultiLineString<f64>,
    pub junctions: Junctions,
    /// Taken from the first segment of the group as-is.
    pub representative_attributes: FieldValues,
}

/// Exact coordinate identity. `-0.0` and `0.0` are the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeKey(u64, u64);

impl NodeKey {
    fn of(c: Coord<f64>) -> Self {
        NodeKey(canonical_bits(c.x), canonical_bits(c.y))
    }
}

fn canonical_bits(v: f64) -> u64 {
    if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() }
}

/// Branch points of a network: nodes where three or more fragment ends met.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Junctions(AHashSet<NodeKey>);

impl Junctions {
    pub fn from_coords(coords: impl IntoIterator<Item = Coord<f64>>) -> Self {
        Junctions(coords.into_iter().map(NodeKey::of).collect())
    }

    pub fn contains(&self, c: Coord<f64>) -> bool {
        self.0.contains(&NodeKey::of(c))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Start,
    Finish,
}

type Incidence = AHashMap<NodeKey, Vec<(usize, End)>>;

/// Merges a group into a forest of maximal paths. Returns `None` when the
/// group has no usable line geometry.
pub fn reconstruct(group: NetworkGroup) -> Option<MergedPath> {
    let NetworkGroup {
        network_id,
        source_id,
        segments,
    } = group;

    let representative_attributes = segments
        .first()
        .map(|s| s.attributes.clone())
        .unwrap_or_default();

    let pieces = flatten_pieces(segments);
    let junctions = find_junctions(&pieces);
    let components = line_merge(pieces);

    if components.is_empty() {
        return None;
    }

    Some(MergedPath {
        network_id,
        source_id,
        geometry: MultiLineString::new(components),
        junctions,
        representative_attributes,
    })
}

/// Splits every segment into single-part pieces. Missing geometries and
/// parts with fewer than two coordinates are dropped.
pub fn flatten_pieces(segments: Vec<RawSegment>) -> Vec<LineString<f64>> {
    segments
        .into_iter()
        .filter_map(|s| s.geometry)
        .flat_map(|ml| ml.0)
        .filter(|ls| ls.0.len() >= 2)
        .collect()
}

fn incidence(pieces: &[LineString<f64>]) -> Incidence {
    let mut incidence: Incidence = AHashMap::new();
    for (i, piece) in pieces.iter().enumerate() {
        if let (Some(&first), Some(&last)) = (piece.0.first(), piece.0.last()) {
            incidence.entry(NodeKey::of(first)).or_default().push((i, End::Start));
            incidence.entry(NodeKey::of(last)).or_default().push((i, End::Finish));
        }
    }
    incidence
}

pub fn find_junctions(pieces: &[LineString<f64>]) -> Junctions {
    Junctions(
        incidence(pieces)
            .into_iter()
            .filter(|(_, ends)| ends.len() >= 3)
            .map(|(node, _)| node)
            .collect(),
    )
}

/// Joins pieces end to end into maximal simple paths.
///
/// At a branch point the chain carries on through the straightest unvisited
/// piece, so only the remaining branches end there, on the interior of the
/// line that passed through. No two output lines share an endpoint. A chain
/// never passes the same node twice, but may close on its own start.
/// Components are emitted in order of their lowest-indexed piece.
pub fn line_merge(pieces: Vec<LineString<f64>>) -> Vec<LineString<f64>> {
    let incidence = incidence(&pieces);
    let mut visited = vec![false; pieces.len()];
    let mut components = Vec::new();

    for seed in 0..pieces.len() {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;

        let mut chain: Vec<Coord<f64>> = pieces[seed].0.clone();
        let mut joints: AHashSet<NodeKey> = AHashSet::new();

        extend_tail(&mut chain, &pieces, &incidence, &mut visited, &mut joints);
        // the head is grown as the tail of the reversed chain
        chain.reverse();
        extend_tail(&mut chain, &pieces, &incidence, &mut visited, &mut joints);
        chain.reverse();

        components.push(LineString::new(chain));
    }

    components
}

fn extend_tail(
    chain: &mut Vec<Coord<f64>>,
    pieces: &[LineString<f64>],
    incidence: &Incidence,
    visited: &mut [bool],
    joints: &mut AHashSet<NodeKey>,
) {
    loop {
        let (Some(&head), Some(&tail)) = (chain.first(), chain.last()) else {
            return;
        };
        let node = NodeKey::of(tail);
        if joints.contains(&node) || NodeKey::of(head) == node {
            return;
        }
        let Some((next, end)) = next_piece(incidence, visited, pieces, chain) else {
            return;
        };

        visited[next] = true;
        joints.insert(node);
        let coords = &pieces[next].0;
        match end {
            End::Start => chain.extend(coords.iter().skip(1).copied()),
            End::Finish => chain.extend(coords.iter().rev().skip(1).copied()),
        }
    }
}

/// The unvisited piece continuing from the chain's tail. With several
/// candidates the one bending least wins, ties going to the lowest index.
fn next_piece(
    incidence: &Incidence,
    visited: &[bool],
    pieces: &[LineString<f64>],
    chain: &[Coord<f64>],
) -> Option<(usize, End)> {
    let tail = *chain.last()?;
    let ends = incidence.get(&NodeKey::of(tail))?;
    let back = heading(chain.iter().rev(), tail);

    ends.iter()
        .copied()
        .filter(|&(i, _)| !visited[i])
        .map(|(i, end)| {
            let out = match end {
                End::Start => heading(pieces[i].0.iter(), tail),
                End::Finish => heading(pieces[i].0.iter().rev(), tail),
            };
            // -1 is straight through
            let bend = match (back, out) {
                (Some(b), Some(o)) => b.x * o.x + b.y * o.y,
                _ => 0.0,
            };
            (i, end, bend)
        })
        .reduce(|best, candidate| if candidate.2 < best.2 { candidate } else { best })
        .map(|(i, end, _)| (i, end))
}

/// Unit direction from `from` towards the first coordinate that differs.
fn heading<'a>(
    coords: impl Iterator<Item = &'a Coord<f64>>,
    from: Coord<f64>,
) -> Option<Coord<f64>> {
    let to = coords.copied().find(|c| *c != from)?;
    let length = Euclidean.distance(from, to);
    Some(Coord {
        x: (to.x - from.x) / length,
        y: (to.y - from.y) / length,
    })
}
