/// An axis-aligned box in world units, half-open on every axis: `[min, max)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileAabb<const D: usize> {
    /// Minimum corner (inclusive).
    pub min: [i64; D],
    /// Maximum corner (exclusive).
    pub max: [i64; D],
}

impl<const D: usize> TileAabb<D> {
    /// Create a box from its corners.
    pub fn new(min: [i64; D], max: [i64; D]) -> Self {
        Self { min, max }
    }

    /// Returns `true` if the interiors of both boxes overlap.
    ///
    /// Boxes that only share a face do not intersect.
    pub fn intersects(&self, other: &Self) -> bool {
        (0..D).all(|i| self.min[i] < other.max[i] && other.min[i] < self.max[i])
    }

    /// Returns `true` if `other` lies entirely inside this box.
    pub fn contains(&self, other: &Self) -> bool {
        (0..D).all(|i| self.min[i] <= other.min[i] && other.max[i] <= self.max[i])
    }

    /// Size along each axis.
    pub fn extents(&self) -> [i64; D] {
        let mut out = [0; D];
        for (i, e) in out.iter_mut().enumerate() {
            *e = self.max[i] - self.min[i];
        }
        out
    }
}
