//! Frustum-driven selection and full-tree traversal.

use farland_coords::{Frustum, TilePos};

use crate::node::{EMPTY, HAS_DATA, NodeFlags, NodeId, SELECTABLE};
use crate::tree::LodTree;

/// Ordered, append-only list of nodes picked by [`LodTree::select`].
///
/// Reused across frames: call [`clear`](Self::clear) before each pass.
#[derive(Clone, Debug, Default)]
pub struct SelectionOutput {
    nodes: Vec<NodeId>,
}

impl SelectionOutput {
    /// Creates an empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node handle.
    pub fn push(&mut self, id: NodeId) {
        self.nodes.push(id);
    }

    /// Forgets every selected node, keeping the allocation.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Number of selected nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Selected handles in output order.
    #[must_use]
    pub fn as_slice(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Selected handles in output order, by value.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }
}

impl<P, const D: usize> LodTree<P, D> {
    /// Appends every visible, selectable node holding data to `output`.
    ///
    /// Depth-first from the root. A subtree is pruned when its node is an
    /// empty level-0 tile, when its bounds miss `frustum` (the root is never
    /// tested), or when it is a level-0 tile `foreign` reports as covered by
    /// another renderer. Children are always visited before their parent is
    /// considered, and a parent is emitted only while [`SELECTABLE`], so a
    /// partially refined region may yield both levels.
    pub fn select<F, R>(&self, frustum: &F, foreign: R, output: &mut SelectionOutput)
    where
        F: Frustum<D> + ?Sized,
        R: Fn(&TilePos<D>) -> bool,
    {
        for child in self.nodes[self.root.0].children.iter().flatten() {
            self.select_node(*child, frustum, &foreign, output);
        }
    }

    fn select_node<F, R>(&self, id: NodeId, frustum: &F, foreign: &R, output: &mut SelectionOutput)
    where
        F: Frustum<D> + ?Sized,
        R: Fn(&TilePos<D>) -> bool,
    {
        let node = &self.nodes[id.0];
        let Some(pos) = node.pos else {
            return;
        };

        if node.level == 0 && node.has(EMPTY) {
            return;
        }
        if !frustum.intersects(&pos.bounding_box(self.tile_shift)) {
            return;
        }
        if node.level == 0 && foreign(&pos) {
            return;
        }

        for child in node.children.iter().flatten() {
            self.select_node(*child, frustum, foreign, output);
        }

        if node.has(HAS_DATA | SELECTABLE) {
            output.push(id);
        }
    }

    /// Visits every node whose flags contain all of `required`, parents before children.
    pub fn for_each<V>(&self, required: NodeFlags, mut visitor: V)
    where
        V: FnMut(NodeId, &TilePos<D>, NodeFlags, Option<&P>),
    {
        for id in self.preorder() {
            let node = &self.nodes[id.0];
            if let Some(pos) = &node.pos
                && node.has(required)
            {
                visitor(id, pos, node.flags, node.payload.as_ref());
            }
        }
    }

    /// Like [`for_each`](Self::for_each) with mutable payload access.
    pub fn for_each_mut<V>(&mut self, required: NodeFlags, mut visitor: V)
    where
        V: FnMut(NodeId, &TilePos<D>, NodeFlags, Option<&mut P>),
    {
        for id in self.preorder() {
            let node = &mut self.nodes[id.0];
            if let Some(pos) = &node.pos
                && node.flags & required == required
            {
                visitor(id, pos, node.flags, node.payload.as_mut());
            }
        }
    }

    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if id != self.root {
                order.push(id);
            }
            stack.extend(self.nodes[id.0].children.iter().rev().flatten());
        }
        order
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
