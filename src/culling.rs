//! View-frustum culling against bounding spheres.

use cgmath::{InnerSpace, Matrix, Matrix4, Vector3, Vector4};

use crate::geometry::BoundingVolume;

/// `normal · p + d = 0`; points with a positive distance are on the inner side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f32>,
    pub d: f32,
}

impl Plane {
    fn from_row(v: Vector4<f32>) -> Self {
        let normal = v.truncate();
        let length = normal.magnitude();
        // A zero-length normal is kept as is rather than divided by zero
        if length > f32::EPSILON {
            Self {
                normal: normal / length,
                d: v.w / length,
            }
        } else {
            Self { normal, d: v.w }
        }
    }

    pub fn signed_distance(&self, point: Vector3<f32>) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// Six clip planes: left, right, bottom, top, near, far.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /**
     * Extract the planes of a combined projection-view matrix by adding and
     * subtracting its rows.
     *
     * Near and far use the `w ± z` rows, which matches a `[-1, 1]` depth range.
     * For `[0, 1]` depth projections the near plane ends up slightly behind the
     * real one, which only ever keeps more objects.
     */
    pub fn from_matrix(proj_view: &Matrix4<f32>) -> Self {
        let r0 = proj_view.row(0);
        let r1 = proj_view.row(1);
        let r2 = proj_view.row(2);
        let r3 = proj_view.row(3);
        Self {
            planes: [
                Plane::from_row(r3 + r0),
                Plane::from_row(r3 - r0),
                Plane::from_row(r3 + r1),
                Plane::from_row(r3 - r1),
                Plane::from_row(r3 + r2),
                Plane::from_row(r3 - r2),
            ],
        }
    }

    /// Re-extract the planes in place, once per frame.
    pub fn extract_planes(&mut self, proj_view: &Matrix4<f32>) {
        *self = Self::from_matrix(proj_view);
    }

    /// Conservative: only spheres fully behind some plane are rejected.
    pub fn is_visible(&self, center: Vector3<f32>, radius: f32) -> bool {
        self.planes.iter().all(|plane| plane.signed_distance(center) >= -radius)
    }

    /// Tests the volume's bounding sphere. Empty volumes are never visible.
    pub fn is_volume_visible(&self, bounds: &BoundingVolume) -> bool {
        !bounds.is_empty() && self.is_visible(bounds.center, bounds.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Deg, Point3, perspective};

    fn camera_frustum() -> Frustum {
        let proj = perspective(Deg(60.0), 1.0, 0.1, 100.0);
        let view = Matrix4::look_at_rh(Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, -1.0), Vector3::unit_y());
        Frustum::from_matrix(&(proj * view))
    }

    #[test]
    fn planes_are_normalized() {
        for plane in camera_frustum().planes {
            assert!((plane.normal.magnitude() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn spheres_outside_are_culled() {
        let frustum = camera_frustum();
        assert!(!frustum.is_visible(Vector3::new(0.0, 0.0, -500.0), 1.0));
        assert!(!frustum.is_visible(Vector3::new(0.0, 0.0, 10.0), 1.0));
        assert!(!frustum.is_visible(Vector3::new(100.0, 0.0, -10.0), 1.0));
    }

    #[test]
    fn spheres_inside_or_touching_are_kept() {
        let frustum = camera_frustum();
        assert!(frustum.is_visible(Vector3::new(0.0, 0.0, -10.0), 0.5));
        // Centre outside the right plane, but the radius reaches in
        assert!(frustum.is_visible(Vector3::new(7.0, 0.0, -10.0), 2.0));
        // Sphere around the camera position itself
        assert!(frustum.is_visible(Vector3::new(0.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn degenerate_matrix_keeps_planes_unnormalized() {
        let frustum = Frustum::from_matrix(&Matrix4::from_scale(0.0));
        assert_eq!(frustum.planes[0].normal, Vector3::new(0.0, 0.0, 0.0));
    }
}
