//! Immutable raw tile snapshots held by the cache.

use std::sync::Arc;

use farland_coords::TilePos;

/// Raw source data for one tile position, as received from the world.
pub trait Snapshot<const D: usize>: Send + Sync + 'static {
    /// Decoded form handed to the bake function.
    type Tile;

    /// Position this snapshot describes.
    fn pos(&self) -> TilePos<D>;

    /// Returns `true` if the tile is known to contain nothing.
    fn is_empty(&self) -> bool;

    /// Decodes the snapshot. `None` for empty snapshots.
    fn decode(&self) -> Option<Self::Tile>;
}

/// A snapshot that stores its tile already decoded behind an [`Arc`].
#[derive(Debug)]
pub struct TileSnapshot<T, const D: usize> {
    pos: TilePos<D>,
    data: Option<Arc<T>>,
}

impl<T, const D: usize> TileSnapshot<T, D> {
    /// A snapshot carrying `data`.
    pub fn new(pos: TilePos<D>, data: T) -> Self {
        Self {
            pos,
            data: Some(Arc::new(data)),
        }
    }

    /// A snapshot of a tile with no content.
    pub fn empty(pos: TilePos<D>) -> Self {
        Self { pos, data: None }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_deref()
    }
}

impl<T, const D: usize> Snapshot<D> for TileSnapshot<T, D>
where
    T: Send + Sync + 'static,
{
    type Tile = Arc<T>;

    fn pos(&self) -> TilePos<D> {
        self.pos
    }

    fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    fn decode(&self) -> Option<Arc<T>> {
        self.data.clone()
    }
}
