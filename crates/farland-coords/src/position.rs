//! Hierarchical tile positions: a detail level plus an integer coordinate per axis.
//!
//! A position at level `L` covers `2^L` level-0 tiles along every axis. Moving
//! one level up halves every coordinate (arithmetic shift, so negative
//! coordinates round towards negative infinity).

use std::fmt;

use crate::TileAabb;

/// The highest root level a tree may use. A root at this level addresses the
/// whole `i32` coordinate range of level-0 tiles.
pub const MAX_ROOT_LEVEL: u8 = 32;

/// Immutable spatial key identifying one tile at one level of detail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilePos<const D: usize> {
    level: u8,
    coords: [i32; D],
}

/// Two-dimensional tile position (heightmap terrain).
pub type TilePos2 = TilePos<2>;
/// Three-dimensional tile position (voxel terrain).
pub type TilePos3 = TilePos<3>;

impl<const D: usize> TilePos<D> {
    /// Number of children a position has one level down.
    pub const CHILD_COUNT: usize = 1 << D;

    /// Creates a new position.
    pub const fn new(level: u8, coords: [i32; D]) -> Self {
        Self { level, coords }
    }

    /// Detail level (0 = finest).
    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Coordinate along `axis` at this position's level.
    #[inline]
    pub fn coord(&self, axis: usize) -> i32 {
        self.coords[axis]
    }

    /// All coordinates at this position's level.
    #[inline]
    pub fn coords(&self) -> [i32; D] {
        self.coords
    }

    /// Returns `true` if a tree rooted at `root_level` can address this position.
    ///
    /// Every coordinate must fit into `root_level - level` signed bits, which is
    /// exactly the range reachable by descending from the root.
    pub fn is_valid(&self, root_level: u8) -> bool {
        let root_level = root_level.min(MAX_ROOT_LEVEL);
        if self.level >= root_level {
            return false;
        }
        let bits = u32::from(root_level - self.level);
        self.coords.iter().all(|&c| {
            let high = c >> (bits - 1);
            high == 0 || high == -1
        })
    }

    /// Index of the child of the ancestor at `ancestor_level` that contains this position.
    ///
    /// Bit `dim` of the result is the coordinate bit immediately below
    /// `ancestor_level` along axis `dim`.
    ///
    /// # Panics
    ///
    /// Panics if `ancestor_level <= self.level()`.
    #[inline]
    pub fn child_index(&self, ancestor_level: u8) -> usize {
        assert!(
            ancestor_level > self.level,
            "{self} has no ancestor at level {ancestor_level}"
        );
        let shift = u32::from(ancestor_level - self.level - 1);
        let mut index = 0;
        for (dim, &c) in self.coords.iter().enumerate() {
            index |= (((c >> shift.min(31)) & 1) as usize) << dim;
        }
        index
    }

    /// The ancestor (or self) at `level`.
    ///
    /// # Panics
    ///
    /// Panics if `level < self.level()`.
    pub fn parent_at_level(&self, level: u8) -> Self {
        assert!(
            level >= self.level,
            "{self} cannot be raised to finer level {level}"
        );
        let shift = u32::from(level - self.level).min(31);
        Self {
            level,
            coords: self.coords.map(|c| c >> shift),
        }
    }

    /// The direct parent one level up.
    pub fn parent(&self) -> Self {
        self.parent_at_level(self.level + 1)
    }

    /// The child with the given index one level down.
    ///
    /// # Panics
    ///
    /// Panics if this position is at level 0 or `index >= 2^D`.
    pub fn child(&self, index: usize) -> Self {
        assert!(self.level > 0, "{self} is at level 0 and has no children");
        assert!(index < Self::CHILD_COUNT, "child index {index} out of range");
        let mut coords = self.coords;
        for (dim, c) in coords.iter_mut().enumerate() {
            *c = (*c << 1) | ((index >> dim) & 1) as i32;
        }
        Self {
            level: self.level - 1,
            coords,
        }
    }

    /// The `2^D` children tiling this position's footprint one level down.
    pub fn children(&self) -> impl Iterator<Item = Self> + use<D> {
        let this = *self;
        (0..Self::CHILD_COUNT).map(move |i| this.child(i))
    }

    /// The position at the same level shifted by `delta`, or `None` if a
    /// coordinate would leave the `i32` range.
    pub fn offset(&self, delta: [i32; D]) -> Option<Self> {
        let mut coords = self.coords;
        for (c, d) in coords.iter_mut().zip(delta) {
            *c = c.checked_add(d)?;
        }
        Some(Self {
            level: self.level,
            coords,
        })
    }

    /// Every position at this level whose coordinates lie within
    /// `[c - min_offset, c + max_offset]` on each axis.
    ///
    /// Positions are produced in a fixed order with the last axis varying
    /// fastest. Positions outside the `i32` range are left out.
    pub fn neighborhood(&self, min_offset: i32, max_offset: i32) -> Vec<Self> {
        offsets::<D>(-min_offset, max_offset)
            .into_iter()
            .filter_map(|delta| self.offset(delta))
            .collect()
    }

    /// World-space bounding box. A level-0 tile spans `2^tile_shift` units per axis.
    pub fn bounding_box(&self, tile_shift: u8) -> TileAabb<D> {
        let shift = u32::from(self.level) + u32::from(tile_shift);
        TileAabb {
            min: self.coords.map(|c| i64::from(c) << shift),
            max: self.coords.map(|c| (i64::from(c) + 1) << shift),
        }
    }
}

/// All offset vectors with each component in `[lo, hi]`, last axis fastest.
pub fn offsets<const D: usize>(lo: i32, hi: i32) -> Vec<[i32; D]> {
    if hi < lo {
        return Vec::new();
    }
    let side = (hi - lo + 1) as usize;
    let total = side.pow(D as u32);
    let mut out = Vec::with_capacity(total);
    let mut current = [lo; D];
    for _ in 0..total {
        out.push(current);
        for axis in (0..D).rev() {
            if current[axis] < hi {
                current[axis] += 1;
                break;
            }
            current[axis] = lo;
        }
    }
    out
}

impl<const D: usize> fmt::Display for TilePos<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}(", self.level)?;
        for (i, c) in self.coords.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}
