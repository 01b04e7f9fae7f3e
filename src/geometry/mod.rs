//! Geometry processing: bounding volumes, LOD simplification and index reordering.
//!
//! - `simplify` builds LOD chains from an index buffer and vertex positions
//! - `vertex_cache` reorders triangles for post-transform cache locality
//!
//! [`BoundingVolume`] lives here because meshes, scene nodes and render objects
//! all carry one.

pub mod simplify;
pub mod vertex_cache;

use cgmath::{InnerSpace, Matrix4, Point3, Transform, Vector3};

/// Axis-aligned box plus the sphere enclosing it.
///
/// `center` is the midpoint of `min`/`max` and `radius` the distance from the
/// center to `max`. An empty volume has `min > max` and a zero radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingVolume {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
    pub center: Vector3<f32>,
    pub radius: f32,
}

impl BoundingVolume {
    pub fn empty() -> Self {
        Self {
            min: Vector3::new(f32::MAX, f32::MAX, f32::MAX),
            max: Vector3::new(f32::MIN, f32::MIN, f32::MIN),
            center: Vector3::new(0.0, 0.0, 0.0),
            radius: 0.0,
        }
    }

    /// Build the volume for a box, deriving center and radius.
    pub fn from_min_max(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        if min.x > max.x || min.y > max.y || min.z > max.z {
            return Self::empty();
        }
        let center = (min + max) * 0.5;
        Self {
            min,
            max,
            center,
            radius: (max - center).magnitude(),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vector3<f32>>) -> Self {
        let mut bounds = Self::empty();
        for p in points {
            bounds.expand(*p);
        }
        bounds.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow the box to contain `p`. Call [`finish`](Self::finish) afterwards
    /// to refresh center and radius.
    pub fn expand(&mut self, p: Vector3<f32>) {
        self.min = Vector3::new(self.min.x.min(p.x), self.min.y.min(p.y), self.min.z.min(p.z));
        self.max = Vector3::new(self.max.x.max(p.x), self.max.y.max(p.y), self.max.z.max(p.z));
    }

    pub fn finish(self) -> Self {
        Self::from_min_max(self.min, self.max)
    }

    pub fn union(&self, other: &BoundingVolume) -> BoundingVolume {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => *other,
            (_, true) => *self,
            _ => {
                let mut merged = *self;
                merged.expand(other.min);
                merged.expand(other.max);
                merged.finish()
            }
        }
    }

    pub fn corners(&self) -> [Vector3<f32>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vector3::new(a.x, a.y, a.z),
            Vector3::new(b.x, a.y, a.z),
            Vector3::new(a.x, b.y, a.z),
            Vector3::new(b.x, b.y, a.z),
            Vector3::new(a.x, a.y, b.z),
            Vector3::new(b.x, a.y, b.z),
            Vector3::new(a.x, b.y, b.z),
            Vector3::new(b.x, b.y, b.z),
        ]
    }

    /// Axis-aligned box enclosing this box after applying `matrix`.
    pub fn transformed(&self, matrix: &Matrix4<f32>) -> BoundingVolume {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::empty();
        for corner in self.corners() {
            let p = matrix.transform_point(Point3::new(corner.x, corner.y, corner.z));
            out.expand(Vector3::new(p.x, p.y, p.z));
        }
        out.finish()
    }
}

impl Default for BoundingVolume {
    fn default() -> Self {
        Self::empty()
    }
}
