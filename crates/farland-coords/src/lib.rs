//! Tile addressing for level-of-detail terrain.
//!
//! - [`TilePos`]: a level plus `D` integer coordinates, with parent/child
//!   navigation and neighborhood enumeration.
//! - [`TileAabb`]: integer world-space bounds of a tile.
//! - [`Frustum`]: the visibility predicate used by selection.

mod aabb;
mod frustum;
mod position;

pub use aabb::TileAabb;
pub use frustum::{Frustum, InfiniteFrustum, PlaneFrustum};
pub use position::{MAX_ROOT_LEVEL, TilePos, TilePos2, TilePos3, offsets};
