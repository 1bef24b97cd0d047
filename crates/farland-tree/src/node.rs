//! Arena node storage and node flag bits.

use farland_coords::TilePos;

/// Bitfield of per-node state.
pub type NodeFlags = u8;

/// Flag bit: the node holds a baked payload.
pub const HAS_DATA: NodeFlags = 0b0000_0001;
/// Flag bit: the node was baked and is known to contain nothing.
pub const EMPTY: NodeFlags = 0b0000_0010;
/// Flag bit: the node may be emitted by selection.
pub const SELECTABLE: NodeFlags = 0b0000_0100;

/// Flags that mark a node as baked. A node with neither set has never been baked.
pub const BAKED: NodeFlags = HAS_DATA | EMPTY;

/// Handle to a node inside one [`LodTree`](crate::LodTree).
///
/// Handles are slab keys: they stay valid until the node is removed and may be
/// reused afterwards, so they must not be kept across tree mutations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Raw arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

pub(crate) struct Node<P, const D: usize> {
    /// `None` only for the synthetic root.
    pub(crate) pos: Option<TilePos<D>>,
    pub(crate) level: u8,
    pub(crate) flags: NodeFlags,
    pub(crate) payload: Option<P>,
    pub(crate) children: Box<[Option<NodeId>]>,
}

impl<P, const D: usize> Node<P, D> {
    pub(crate) fn new(pos: Option<TilePos<D>>, level: u8) -> Self {
        Self {
            pos,
            level,
            flags: 0,
            payload: None,
            children: vec![None; TilePos::<D>::CHILD_COUNT].into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn has(&self, flag: NodeFlags) -> bool {
        self.flags & flag == flag
    }

    #[inline]
    pub(crate) fn is_baked(&self) -> bool {
        self.flags & BAKED != 0
    }

    /// No payload flags and no children: nothing keeps this node alive.
    pub(crate) fn is_garbage(&self) -> bool {
        !self.is_baked() && self.children.iter().all(Option::is_none)
    }
}
