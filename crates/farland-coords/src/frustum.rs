//! Visibility predicates for tile selection.
//!
//! Selection only asks one question of a frustum: does this tile's bounding
//! box intersect it? Anything answering that question can drive selection,
//! from a plain box around the observer to planes extracted from a camera.

use glam::{DMat4, DVec3, DVec4};

use crate::TileAabb;

/// A volume tile bounding boxes can be tested against.
pub trait Frustum<const D: usize> {
    /// Returns `true` if `aabb` is at least partially inside this volume.
    fn intersects(&self, aabb: &TileAabb<D>) -> bool;
}

/// A box selects every tile whose bounds overlap it.
impl<const D: usize> Frustum<D> for TileAabb<D> {
    fn intersects(&self, aabb: &TileAabb<D>) -> bool {
        TileAabb::intersects(self, aabb)
    }
}

impl<const D: usize, F> Frustum<D> for F
where
    F: Fn(&TileAabb<D>) -> bool,
{
    fn intersects(&self, aabb: &TileAabb<D>) -> bool {
        self(aabb)
    }
}

/// Accepts everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct InfiniteFrustum;

impl<const D: usize> Frustum<D> for InfiniteFrustum {
    fn intersects(&self, _aabb: &TileAabb<D>) -> bool {
        true
    }
}

const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// A camera frustum made of six inward-facing planes, in f64 world space.
#[derive(Clone, Debug)]
pub struct PlaneFrustum {
    /// `DVec4(a, b, c, d)` with unit normal `(a, b, c)`.
    planes: [DVec4; 6],
}

impl PlaneFrustum {
    /// Extract the planes from a view-projection matrix with a `[0, 1]` depth range
    /// (Gribb-Hartmann).
    pub fn from_view_projection(vp: &DMat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [DVec4::ZERO; 6];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[2];
        planes[FAR] = rows[3] - rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        Self { planes }
    }

    /// Conservative p-vertex test: rejects a box only when its corner
    /// furthest along some plane normal is behind that plane.
    pub fn is_visible(&self, min: DVec3, max: DVec3) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let p = DVec3::new(
                if normal.x >= 0.0 { max.x } else { min.x },
                if normal.y >= 0.0 { max.y } else { min.y },
                if normal.z >= 0.0 { max.z } else { min.z },
            );
            normal.dot(p) + plane.w >= 0.0
        })
    }
}

impl Frustum<3> for PlaneFrustum {
    fn intersects(&self, aabb: &TileAabb<3>) -> bool {
        let min = DVec3::new(aabb.min[0] as f64, aabb.min[1] as f64, aabb.min[2] as f64);
        let max = DVec3::new(aabb.max[0] as f64, aabb.max[1] as f64, aabb.max[2] as f64);
        self.is_visible(min, max)
    }
}
