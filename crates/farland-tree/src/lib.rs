//! Hierarchical level-of-detail store for baked terrain tiles.
//!
//! [`LodTree`] owns render payloads keyed by [`TilePos`](farland_coords::TilePos)
//! and picks, per frame, the set of tiles that covers the visible world without
//! two levels of detail drawing the same fully refined region.

mod node;
mod select;
mod tree;

pub use node::{BAKED, EMPTY, HAS_DATA, NodeFlags, NodeId, SELECTABLE};
pub use select::SelectionOutput;
pub use tree::LodTree;
