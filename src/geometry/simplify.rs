//! LOD generation: error-bounded quadric simplification with a sloppy
//! vertex-clustering fallback.
//!
//! Every LOD is an index sequence over the *same* vertex buffer, so the
//! simplifiers here never create or move vertices. Edge collapses always
//! snap one endpoint onto the other and clustering picks an existing vertex
//! as the cell representative.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use cgmath::{InnerSpace, Vector3};

use crate::geometry::vertex_cache::optimize_vertex_cache;

/// Tuning for [`build_lod_chain`].
#[derive(Clone, Debug, PartialEq)]
pub struct SimplifyConfig {
    /// Upper bound on the chain length, LOD0 included.
    pub max_lods: usize,
    /// A level with this many indices or fewer is not simplified further.
    pub min_index_count: usize,
    /// Error bound for the quadric pass, relative to the mesh extent.
    pub target_error: f32,
    /// A pass that removes less than this fraction of indices counts as stalled.
    pub min_reduction: f32,
    /// Retry stalled passes (except the first) with vertex clustering.
    pub sloppy_fallback: bool,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            max_lods: 8,
            min_index_count: 1024,
            target_error: 1e-2,
            min_reduction: 0.1,
            sloppy_fallback: true,
        }
    }
}

impl SimplifyConfig {
    pub fn with_max_lods(mut self, max_lods: usize) -> Self {
        self.max_lods = max_lods.max(1);
        self
    }

    pub fn with_min_index_count(mut self, min_index_count: usize) -> Self {
        self.min_index_count = min_index_count;
        self
    }

    pub fn with_target_error(mut self, target_error: f32) -> Self {
        self.target_error = target_error;
        self
    }
}

/// Build the LOD chain for a triangle list.
///
/// The first entry is always `indices` verbatim. Each following entry targets
/// half the previous index count and never has more indices than its
/// predecessor. The chain ends at `max_lods`, once a level is small enough, or
/// when a level cannot be reduced meaningfully.
pub fn build_lod_chain(indices: &[u32], positions: &[[f32; 3]], config: &SimplifyConfig) -> Vec<Vec<u32>> {
    build_lod_chain_with(indices, positions, config, simplify)
}

fn build_lod_chain_with(
    indices: &[u32],
    positions: &[[f32; 3]],
    config: &SimplifyConfig,
    mut quadric_pass: impl FnMut(&[u32], &[[f32; 3]], usize, f32) -> Vec<u32>,
) -> Vec<Vec<u32>> {
    let mut lods = vec![indices.to_vec()];
    while lods.len() < config.max_lods {
        let current = &lods[lods.len() - 1];
        if current.len() <= config.min_index_count {
            break;
        }
        let target = (current.len() / 2) / 3 * 3;
        let mut next = quadric_pass(current, positions, target, config.target_error);

        if !reduced_enough(current.len(), next.len(), config.min_reduction) {
            // the very first pass gets no sloppy retry
            if lods.len() == 1 || !config.sloppy_fallback {
                log::debug!(
                    "simplification stalled at LOD{} ({} -> {} indices)",
                    lods.len(),
                    current.len(),
                    next.len()
                );
                break;
            }
            next = simplify_sloppy(current, positions, target);
            if next.is_empty() || next.len() >= current.len() {
                log::debug!("sloppy simplification stalled at LOD{}", lods.len());
                break;
            }
        }
        lods.push(optimize_vertex_cache(&next, positions.len()));
    }
    lods
}

fn reduced_enough(before: usize, after: usize, min_reduction: f32) -> bool {
    if after >= before {
        return false;
    }
    ((before - after) as f32 / before as f32) >= min_reduction
}

/// A 4x4 symmetric error quadric stored as its 10 unique coefficients.
#[derive(Clone, Copy, Debug, Default)]
struct Quadric([f64; 10]);

impl Quadric {
    fn from_plane(n: Vector3<f64>, d: f64, weight: f64) -> Self {
        let (a, b, c) = (n.x, n.y, n.z);
        let w = weight;
        Self([
            w * a * a,
            w * a * b,
            w * a * c,
            w * a * d,
            w * b * b,
            w * b * c,
            w * b * d,
            w * c * c,
            w * c * d,
            w * d * d,
        ])
    }

    fn add(&mut self, other: &Quadric) {
        for (s, o) in self.0.iter_mut().zip(other.0.iter()) {
            *s += o;
        }
    }

    fn sum(&self, other: &Quadric) -> Quadric {
        let mut q = *self;
        q.add(other);
        q
    }

    fn evaluate(&self, p: Vector3<f64>) -> f64 {
        let [a, b, c, d, e, f, g, h, i, j] = self.0;
        let (x, y, z) = (p.x, p.y, p.z);
        let err = a * x * x + 2.0 * b * x * y + 2.0 * c * x * z + 2.0 * d * x + e * y * y + 2.0 * f * y * z
            + 2.0 * g * y
            + h * z * z
            + 2.0 * i * z
            + j;
        err.max(0.0)
    }
}

#[derive(Debug)]
struct Collapse {
    error: f64,
    from: u32,
    to: u32,
    stamp: (u32, u32),
}

impl PartialEq for Collapse {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Collapse {}

impl PartialOrd for Collapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Collapse {
    // reversed: BinaryHeap pops the cheapest collapse first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .error
            .partial_cmp(&self.error)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.from.cmp(&self.from))
            .then_with(|| other.to.cmp(&self.to))
    }
}

struct QuadricSimplifier {
    positions: Vec<Vector3<f64>>,
    triangles: Vec<[u32; 3]>,
    alive: Vec<bool>,
    alive_count: usize,
    vertex_triangles: Vec<Vec<usize>>,
    quadrics: Vec<Quadric>,
    removed: Vec<bool>,
    locked: Vec<bool>,
    version: Vec<u32>,
    heap: BinaryHeap<Collapse>,
}

impl QuadricSimplifier {
    fn new(indices: &[u32], positions: &[[f32; 3]]) -> Self {
        let vertex_count = positions.len();
        let positions: Vec<Vector3<f64>> = positions
            .iter()
            .map(|p| Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64))
            .collect();
        let triangles: Vec<[u32; 3]> = indices
            .chunks_exact(3)
            .filter(|t| t.iter().all(|&i| (i as usize) < vertex_count))
            .map(|t| [t[0], t[1], t[2]])
            .collect();

        let mut vertex_triangles = vec![Vec::new(); vertex_count];
        let mut quadrics = vec![Quadric::default(); vertex_count];
        let mut edge_use: HashMap<(u32, u32), (usize, u32)> = HashMap::new();

        for (t, tri) in triangles.iter().enumerate() {
            for &v in tri {
                vertex_triangles[v as usize].push(t);
            }
            let [p0, p1, p2] = tri.map(|v| positions[v as usize]);
            let normal = (p1 - p0).cross(p2 - p0);
            let len = normal.magnitude();
            if len > 1e-12 {
                let n = normal / len;
                let q = Quadric::from_plane(n, -n.dot(p0), 1.0);
                for &v in tri {
                    quadrics[v as usize].add(&q);
                }
            }
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                let key = (a.min(b), a.max(b));
                edge_use.entry(key).and_modify(|e| e.1 += 1).or_insert((t, 1));
            }
        }

        // Boundary edges get a perpendicular constraint plane so open borders
        // keep their outline.
        for (&(a, b), &(t, uses)) in edge_use.iter() {
            if uses != 1 {
                continue;
            }
            let tri = triangles[t];
            let [p0, p1, p2] = tri.map(|v| positions[v as usize]);
            let face = (p1 - p0).cross(p2 - p0);
            let edge = positions[b as usize] - positions[a as usize];
            let n = edge.cross(face);
            let len = n.magnitude();
            if len > 1e-12 {
                let n = n / len;
                let q = Quadric::from_plane(n, -n.dot(positions[a as usize]), 10.0);
                quadrics[a as usize].add(&q);
                quadrics[b as usize].add(&q);
            }
        }

        // Vertices sharing a position with another vertex sit on an attribute
        // seam and must not move.
        let mut locked = vec![false; vertex_count];
        let mut by_position: HashMap<[u64; 3], u32> = HashMap::new();
        for (v, tris) in vertex_triangles.iter().enumerate() {
            if tris.is_empty() {
                continue;
            }
            let p = positions[v];
            let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
            if let Some(&other) = by_position.get(&key) {
                locked[v] = true;
                locked[other as usize] = true;
            } else {
                by_position.insert(key, v as u32);
            }
        }

        let alive_count = triangles.len();
        let mut simplifier = Self {
            positions,
            alive: vec![true; triangles.len()],
            triangles,
            alive_count,
            vertex_triangles,
            quadrics,
            removed: vec![false; vertex_count],
            locked,
            version: vec![0; vertex_count],
            heap: BinaryHeap::new(),
        };
        let edges: Vec<(u32, u32)> = edge_use.keys().copied().collect();
        for (a, b) in edges {
            simplifier.push_edge(a, b);
        }
        simplifier
    }

    fn push_edge(&mut self, a: u32, b: u32) {
        let q = self.quadrics[a as usize].sum(&self.quadrics[b as usize]);
        let mut best: Option<Collapse> = None;
        for (from, to) in [(a, b), (b, a)] {
            if self.locked[from as usize] {
                continue;
            }
            let error = q.evaluate(self.positions[to as usize]);
            if best.as_ref().is_none_or(|c| error < c.error) {
                best = Some(Collapse {
                    error,
                    from,
                    to,
                    stamp: (self.version[from as usize], self.version[to as usize]),
                });
            }
        }
        if let Some(collapse) = best {
            self.heap.push(collapse);
        }
    }

    fn is_stale(&self, c: &Collapse) -> bool {
        self.removed[c.from as usize]
            || self.removed[c.to as usize]
            || self.version[c.from as usize] != c.stamp.0
            || self.version[c.to as usize] != c.stamp.1
    }

    /// Rejects collapses that would flip or flatten a surviving triangle.
    fn flips(&self, from: u32, to: u32) -> bool {
        let target = self.positions[to as usize];
        for &t in &self.vertex_triangles[from as usize] {
            if !self.alive[t] {
                continue;
            }
            let tri = self.triangles[t];
            if tri.contains(&to) {
                continue;
            }
            let [p0, p1, p2] = tri.map(|v| self.positions[v as usize]);
            let before = (p1 - p0).cross(p2 - p0);
            if before.magnitude2() < 1e-24 {
                continue;
            }
            let moved = tri.map(|v| if v == from { target } else { self.positions[v as usize] });
            let after = (moved[1] - moved[0]).cross(moved[2] - moved[0]);
            if before.dot(after) <= 0.0 {
                return true;
            }
        }
        false
    }

    fn collapse(&mut self, from: u32, to: u32) {
        let affected = std::mem::take(&mut self.vertex_triangles[from as usize]);
        for t in affected {
            if !self.alive[t] {
                continue;
            }
            let tri = &mut self.triangles[t];
            for v in tri.iter_mut() {
                if *v == from {
                    *v = to;
                }
            }
            if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
                self.alive[t] = false;
                self.alive_count -= 1;
            } else {
                self.vertex_triangles[to as usize].push(t);
            }
        }
        self.removed[from as usize] = true;
        let q = self.quadrics[from as usize];
        self.quadrics[to as usize].add(&q);
        self.version[from as usize] += 1;
        self.version[to as usize] += 1;

        let alive = &self.alive;
        let list = &mut self.vertex_triangles[to as usize];
        list.retain(|&t| alive[t]);
        list.sort_unstable();
        list.dedup();

        let mut neighbours: Vec<u32> = list
            .iter()
            .flat_map(|&t| self.triangles[t])
            .filter(|&v| v != to)
            .collect();
        neighbours.sort_unstable();
        neighbours.dedup();
        for n in neighbours {
            self.push_edge(to, n);
        }
    }

    fn run(&mut self, target_triangles: usize, max_error: f64) {
        while self.alive_count > target_triangles {
            let Some(candidate) = self.heap.pop() else {
                break;
            };
            if self.is_stale(&candidate) {
                continue;
            }
            if candidate.error > max_error {
                break;
            }
            if self.flips(candidate.from, candidate.to) {
                continue;
            }
            self.collapse(candidate.from, candidate.to);
        }
    }

    fn into_indices(self) -> Vec<u32> {
        self.triangles
            .iter()
            .zip(self.alive.iter())
            .filter(|(_, alive)| **alive)
            .flat_map(|(tri, _)| *tri)
            .collect()
    }
}

fn extent(indices: &[u32], positions: &[[f32; 3]]) -> f32 {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for &i in indices {
        if let Some(p) = positions.get(i as usize) {
            for k in 0..3 {
                min[k] = min[k].min(p[k]);
                max[k] = max[k].max(p[k]);
            }
        }
    }
    (0..3).map(|k| max[k] - min[k]).fold(0.0f32, f32::max)
}

/// Error-bounded edge-collapse simplification towards `target_index_count`.
///
/// `target_error` is relative to the largest extent of the referenced
/// geometry. Returns a subset of triangles remapped onto surviving vertices;
/// may stop above the target when the error bound is hit.
pub fn simplify(indices: &[u32], positions: &[[f32; 3]], target_index_count: usize, target_error: f32) -> Vec<u32> {
    let indices = valid_triangles(indices, positions.len());
    if indices.len() <= target_index_count || indices.len() < 3 {
        return indices;
    }
    let scale = extent(&indices, positions) as f64;
    let limit = (target_error as f64 * scale).powi(2);
    let mut simplifier = QuadricSimplifier::new(&indices, positions);
    simplifier.run(target_index_count / 3, limit);
    simplifier.into_indices()
}

/// Lossy simplification by uniform-grid vertex clustering.
///
/// Ignores topology and error bounds. Picks the finest grid whose output stays
/// within `target_index_count`; each cell collapses onto its member vertex
/// closest to the cell average.
pub fn simplify_sloppy(indices: &[u32], positions: &[[f32; 3]], target_index_count: usize) -> Vec<u32> {
    let indices = valid_triangles(indices, positions.len());
    if indices.len() <= target_index_count {
        return indices;
    }
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for &i in &indices {
        let p = positions[i as usize];
        for k in 0..3 {
            min[k] = min[k].min(p[k]);
            max[k] = max[k].max(p[k]);
        }
    }
    let size = (0..3).map(|k| max[k] - min[k]).fold(0.0f32, f32::max).max(f32::EPSILON);

    let mut best: Vec<u32> = Vec::new();
    let (mut lo, mut hi) = (1u32, 1024u32);
    while lo <= hi {
        let grid = lo + (hi - lo) / 2;
        let candidate = cluster(&indices, positions, min, size, grid);
        if candidate.len() <= target_index_count {
            if candidate.len() >= best.len() {
                best = candidate;
            }
            lo = grid + 1;
        } else {
            hi = grid - 1;
        }
    }
    best
}

/// Whole triangles of `indices` whose corners all exist; a trailing partial triangle is dropped.
fn valid_triangles(indices: &[u32], vertex_count: usize) -> Vec<u32> {
    indices
        .chunks_exact(3)
        .filter(|t| t.iter().all(|&i| (i as usize) < vertex_count))
        .flatten()
        .copied()
        .collect()
}

fn cluster(indices: &[u32], positions: &[[f32; 3]], min: [f32; 3], size: f32, grid: u32) -> Vec<u32> {
    let cell_of = |p: [f32; 3]| -> (u32, u32, u32) {
        let c = |k: usize| (((p[k] - min[k]) / size * grid as f32) as u32).min(grid - 1);
        (c(0), c(1), c(2))
    };

    let mut members: HashMap<(u32, u32, u32), Vec<u32>> = HashMap::new();
    let mut seen = HashSet::new();
    for &i in indices {
        if seen.insert(i) {
            members.entry(cell_of(positions[i as usize])).or_default().push(i);
        }
    }

    let mut representative: HashMap<u32, u32> = HashMap::new();
    for verts in members.values() {
        let n = verts.len() as f32;
        let mut avg = [0.0f32; 3];
        for &v in verts {
            for k in 0..3 {
                avg[k] += positions[v as usize][k] / n;
            }
        }
        let dist = |v: u32| {
            let p = positions[v as usize];
            (0..3).map(|k| (p[k] - avg[k]).powi(2)).sum::<f32>()
        };
        let mut chosen = verts[0];
        for &v in &verts[1..] {
            let (dv, dc) = (dist(v), dist(chosen));
            if dv < dc || (dv == dc && v < chosen) {
                chosen = v;
            }
        }
        for &v in verts {
            representative.insert(v, chosen);
        }
    }

    let mut out = Vec::new();
    let mut emitted: HashSet<[u32; 3]> = HashSet::new();
    for tri in indices.chunks_exact(3) {
        let r = [representative[&tri[0]], representative[&tri[1]], representative[&tri[2]]];
        if r[0] == r[1] || r[1] == r[2] || r[0] == r[2] {
            continue;
        }
        // rotate so the smallest index leads; keeps winding for deduplication
        let lead = (0..3).min_by_key(|&k| r[k]).unwrap_or(0);
        let key = [r[lead], r[(lead + 1) % 3], r[(lead + 2) % 3]];
        if emitted.insert(key) {
            out.extend_from_slice(&r);
        }
    }
    out
}
