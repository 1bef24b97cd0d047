//! The hierarchical tile store.
//!
//! [`LodTree`] maps [`TilePos`] keys to render payloads through a `2^D`-ary
//! tree hanging off a synthetic root. Nodes live in a [`Slab`] arena and are
//! also reachable through a position index, so lookups never walk the tree.
//!
//! Two invariants hold after every public mutation:
//!
//! - A node with no payload flags and no children does not exist.
//! - A node is [`SELECTABLE`] iff it is at level 0 or at least one of the
//!   `2^D` children tiling its footprint has not been baked.
//!
//! The tree holds no locks. Whoever owns it (through `&mut`) is the only
//! thread that may mutate or select from it.

use farland_coords::{MAX_ROOT_LEVEL, TilePos};
use rustc_hash::FxHashMap;
use slab::Slab;
use tracing::{debug, trace};

use crate::node::{BAKED, EMPTY, HAS_DATA, Node, NodeFlags, NodeId, SELECTABLE};

type Release<P> = Box<dyn FnMut(P) + Send>;

/// Multi-resolution store of render payloads keyed by tile position.
pub struct LodTree<P, const D: usize> {
    pub(crate) nodes: Slab<Node<P, D>>,
    index: FxHashMap<TilePos<D>, NodeId>,
    pub(crate) root: NodeId,
    root_level: u8,
    pub(crate) tile_shift: u8,
    /// Payload destructor. Plain `drop` when unset.
    release: Option<Release<P>>,
}

impl<P, const D: usize> LodTree<P, D> {
    /// Creates an empty tree whose payloads are simply dropped when released.
    ///
    /// # Panics
    ///
    /// Panics if `root_level` is not in `1..=32`.
    pub fn new(root_level: u8, tile_shift: u8) -> Self {
        assert!(
            (1..=MAX_ROOT_LEVEL).contains(&root_level),
            "root level {root_level} outside 1..={MAX_ROOT_LEVEL}"
        );
        let mut nodes = Slab::new();
        let root = NodeId(nodes.insert(Node::new(None, root_level)));
        Self {
            nodes,
            index: FxHashMap::default(),
            root,
            root_level,
            tile_shift,
            release: None,
        }
    }

    /// Creates an empty tree that hands every released payload to `release`.
    ///
    /// `release` runs before a payload is overwritten, when its node is
    /// removed, and for every remaining payload when the tree is dropped.
    pub fn with_release<F>(root_level: u8, tile_shift: u8, release: F) -> Self
    where
        F: FnMut(P) + Send + 'static,
    {
        let mut tree = Self::new(root_level, tile_shift);
        tree.release = Some(Box::new(release));
        tree
    }

    /// Level of the synthetic root. Every stored position is below it.
    #[must_use]
    pub fn root_level(&self) -> u8 {
        self.root_level
    }

    /// World units per level-0 tile, as a power of two.
    #[must_use]
    pub fn tile_shift(&self) -> u8 {
        self.tile_shift
    }

    /// Number of nodes, excluding the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if only the root remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Stores `payload` at `pos`, or marks `pos` as baked-but-empty when `None`.
    ///
    /// Missing intermediate nodes are created on the way down. Any payload
    /// already stored at `pos` is released first.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is not addressable from this tree's root.
    pub fn put_render_data(&mut self, pos: TilePos<D>, payload: Option<P>) -> NodeId {
        self.check_pos(&pos);
        let id = self.get_or_create(pos);

        let previous = {
            let node = &mut self.nodes[id.0];
            node.flags &= !BAKED;
            node.payload.take()
        };
        if let Some(previous) = previous {
            self.release_payload(previous);
        }

        let node = &mut self.nodes[id.0];
        match payload {
            Some(payload) => {
                node.payload = Some(payload);
                node.flags |= HAS_DATA;
            }
            None => node.flags |= EMPTY,
        }

        self.recheck_neighborhood(pos);
        id
    }

    /// Releases the payload at `pos`, clears its flags and collapses every
    /// node on the path that no longer has a reason to exist.
    ///
    /// Returns `false` if there was no node at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is not addressable from this tree's root.
    pub fn remove_node(&mut self, pos: TilePos<D>) -> bool {
        self.check_pos(&pos);

        let mut path = Vec::with_capacity(usize::from(self.root_level - pos.level()));
        let mut id = self.root;
        for level in (pos.level() + 1..=self.root_level).rev() {
            let slot = pos.child_index(level);
            path.push((id, slot));
            match self.nodes[id.0].children[slot] {
                Some(child) => id = child,
                None => return false,
            }
        }

        let previous = {
            let node = &mut self.nodes[id.0];
            node.flags &= !(BAKED | SELECTABLE);
            node.payload.take()
        };
        if let Some(previous) = previous {
            self.release_payload(previous);
        }

        let mut current = id;
        let mut collapsed = 0;
        while let Some((parent, slot)) = path.pop() {
            if !self.nodes[current.0].is_garbage() {
                break;
            }
            let node = self.nodes.remove(current.0);
            if let Some(node_pos) = node.pos {
                self.index.remove(&node_pos);
            }
            self.nodes[parent.0].children[slot] = None;
            collapsed += 1;
            current = parent;
        }
        if collapsed > 0 {
            trace!("Removed {pos}, collapsed {collapsed} nodes");
        }

        self.recheck_neighborhood(pos);
        true
    }

    /// Recomputes [`SELECTABLE`] for every node whose flag may depend on `pos`:
    /// `pos` itself, its ancestors, and the parent-level neighbors of `pos`.
    ///
    /// Mutations call this automatically. Missing nodes are skipped.
    pub fn recheck_neighborhood(&mut self, pos: TilePos<D>) {
        self.recheck(pos);
        if pos.level() + 1 >= self.root_level {
            return;
        }
        for neighbor in pos.parent().neighborhood(1, 1) {
            self.recheck(neighbor);
        }
        for level in pos.level() + 2..self.root_level {
            self.recheck(pos.parent_at_level(level));
        }
    }

    fn recheck(&mut self, pos: TilePos<D>) {
        let Some(&id) = self.index.get(&pos) else {
            return;
        };
        let selectable = self.compute_selectable(id);
        let node = &mut self.nodes[id.0];
        if selectable {
            node.flags |= SELECTABLE;
        } else {
            node.flags &= !SELECTABLE;
        }
    }

    fn compute_selectable(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        if node.level == 0 {
            return true;
        }
        !node
            .children
            .iter()
            .all(|child| child.is_some_and(|c| self.nodes[c.0].is_baked()))
    }

    fn get_or_create(&mut self, pos: TilePos<D>) -> NodeId {
        if let Some(&id) = self.index.get(&pos) {
            return id;
        }
        let mut id = self.root;
        for level in (pos.level() + 1..=self.root_level).rev() {
            let slot = pos.child_index(level);
            id = match self.nodes[id.0].children[slot] {
                Some(child) => child,
                None => {
                    let child_pos = pos.parent_at_level(level - 1);
                    let child = NodeId(self.nodes.insert(Node::new(Some(child_pos), level - 1)));
                    self.nodes[id.0].children[slot] = Some(child);
                    self.index.insert(child_pos, child);
                    child
                }
            };
        }
        id
    }

    fn check_pos(&self, pos: &TilePos<D>) {
        assert!(
            pos.is_valid(self.root_level),
            "{pos} is not addressable below root level {}",
            self.root_level
        );
    }

    /// Handle of the node at `pos`, if one exists.
    #[must_use]
    pub fn get(&self, pos: &TilePos<D>) -> Option<NodeId> {
        self.index.get(pos).copied()
    }

    /// Returns `true` if a node (baked or structural) exists at `pos`.
    #[must_use]
    pub fn contains(&self, pos: &TilePos<D>) -> bool {
        self.index.contains_key(pos)
    }

    /// Flags of a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not refer to a live node.
    #[must_use]
    pub fn flags(&self, id: NodeId) -> NodeFlags {
        self.nodes[id.0].flags
    }

    /// Position of a node. `None` for the root.
    #[must_use]
    pub fn position(&self, id: NodeId) -> Option<TilePos<D>> {
        self.nodes[id.0].pos
    }

    /// Payload of a node, if it holds one.
    #[must_use]
    pub fn payload(&self, id: NodeId) -> Option<&P> {
        self.nodes[id.0].payload.as_ref()
    }

    /// Mutable payload of a node, if it holds one.
    pub fn payload_mut(&mut self, id: NodeId) -> Option<&mut P> {
        self.nodes[id.0].payload.as_mut()
    }

    /// Returns `true` if a node exists at `pos` and is currently selectable.
    #[must_use]
    pub fn is_selectable(&self, pos: &TilePos<D>) -> bool {
        self.get(pos).is_some_and(|id| self.nodes[id.0].has(SELECTABLE))
    }

    /// Runs the destructor on a payload that never made it into a node.
    pub fn release_payload(&mut self, payload: P) {
        match &mut self.release {
            Some(release) => release(payload),
            None => drop(payload),
        }
    }

    /// Releases every payload and drops all nodes except the root.
    pub fn clear(&mut self) {
        let released = self.release_all();
        let root_level = self.root_level;
        self.nodes.clear();
        self.index.clear();
        self.root = NodeId(self.nodes.insert(Node::new(None, root_level)));
        debug!("Cleared LOD tree, released {released} payloads");
    }

    fn release_all(&mut self) -> usize {
        let mut released = 0;
        let release = &mut self.release;
        for (_, node) in self.nodes.iter_mut() {
            if let Some(payload) = node.payload.take() {
                match release {
                    Some(release) => release(payload),
                    None => drop(payload),
                }
                released += 1;
            }
            node.flags = 0;
        }
        released
    }
}

impl<P, const D: usize> Drop for LodTree<P, D> {
    fn drop(&mut self) {
        let released = self.release_all();
        if released > 0 {
            debug!("Dropped LOD tree, released {released} payloads");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
