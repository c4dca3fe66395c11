//! Binary split tree stored in an arena.
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`]. Freed slots
//! go on a free list and are reused by later splits, so the arena never
//! holds more slots than the largest tree it has held. Each slot carries a
//! generation that is bumped on release; a `NodeId` kept past the removal
//! of its node becomes dangling and never resolves to a different node.

use std::collections::{HashMap, HashSet};

use super::geometry::{Rect, split_rect};
use super::types::{
    DEFAULT_RATIO, Divider, LayoutError, LayoutSettings, NodeId, PaneId, SplitDirection,
    clamp_ratio,
};

/// A node of the layout tree.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutNode {
    /// A single pane.
    Leaf(PaneId),
    /// Two children sharing the node's area.
    Split {
        /// How the area is divided.
        direction: SplitDirection,
        /// Share of the area given to `first`.
        ratio: f32,
        /// Left or top child.
        first: NodeId,
        /// Right or bottom child.
        second: NodeId,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    node: LayoutNode,
    parent: Option<NodeId>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Computed geometry of a whole tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeGeometry {
    /// Pane rectangles in pre-order.
    pub panes: Vec<(PaneId, Rect)>,
    /// Dividers in pre-order of their splits.
    pub dividers: Vec<Divider>,
    /// Area of every live node.
    pub nodes: HashMap<NodeId, Rect>,
}

impl TreeGeometry {
    /// Returns the rectangle of a pane.
    #[must_use]
    pub fn pane_rect(&self, pane: PaneId) -> Option<Rect> {
        self.panes
            .iter()
            .find(|(id, _)| *id == pane)
            .map(|(_, rect)| *rect)
    }
}

/// Binary split tree of panes.
#[derive(Debug, Clone)]
pub struct LayoutTree {
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: NodeId,
    leaves: HashMap<PaneId, NodeId>,
    splits: usize,
}

impl LayoutTree {
    /// Creates a tree holding a single pane.
    #[must_use]
    pub fn new(pane: PaneId) -> Self {
        let root = NodeId::new(0, 0);
        let mut leaves = HashMap::new();
        leaves.insert(pane, root);
        Self {
            slots: vec![Slot {
                generation: 0,
                entry: Some(Entry {
                    node: LayoutNode::Leaf(pane),
                    parent: None,
                }),
            }],
            free: Vec::new(),
            root,
            leaves,
            splits: 0,
        }
    }

    /// Returns the root node.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Returns a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&LayoutNode> {
        self.entry(id).map(|entry| &entry.node)
    }

    /// Returns a node's parent.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.entry(id).and_then(|entry| entry.parent)
    }

    /// Returns the leaf node holding `pane`.
    #[must_use]
    pub fn leaf_of(&self, pane: PaneId) -> Option<NodeId> {
        self.leaves.get(&pane).copied()
    }

    /// Checks if the pane is part of the tree.
    #[must_use]
    pub fn contains(&self, pane: PaneId) -> bool {
        self.leaves.contains_key(&pane)
    }

    /// Returns the number of panes.
    #[must_use]
    pub fn pane_count(&self) -> usize {
        self.leaves.len()
    }

    /// Returns the number of splits.
    #[must_use]
    pub const fn split_count(&self) -> usize {
        self.splits
    }

    /// Returns the number of arena slots, live or free.
    #[must_use]
    pub fn arena_len(&self) -> usize {
        self.slots.len()
    }

    /// Returns every pane in pre-order (left/top first).
    #[must_use]
    pub fn panes(&self) -> Vec<PaneId> {
        let mut panes = Vec::with_capacity(self.leaves.len());
        self.collect_panes(self.root, &mut panes);
        panes
    }

    fn collect_panes(&self, id: NodeId, out: &mut Vec<PaneId>) {
        match self.node(id) {
            Some(LayoutNode::Leaf(pane)) => out.push(*pane),
            Some(LayoutNode::Split { first, second, .. }) => {
                self.collect_panes(*first, out);
                self.collect_panes(*second, out);
            }
            None => {}
        }
    }

    /// Returns the first pane of a subtree in pre-order.
    #[must_use]
    pub fn first_leaf(&self, mut id: NodeId) -> Option<PaneId> {
        loop {
            match self.node(id)? {
                LayoutNode::Leaf(pane) => return Some(*pane),
                LayoutNode::Split { first, .. } => id = *first,
            }
        }
    }

    /// Returns the ratio of a split.
    #[must_use]
    pub fn ratio(&self, split: NodeId) -> Option<f32> {
        match self.node(split)? {
            LayoutNode::Split { ratio, .. } => Some(*ratio),
            LayoutNode::Leaf(_) => None,
        }
    }

    /// Replaces the leaf of `pane` with a split holding it and `new_pane`.
    ///
    /// The existing pane becomes the first child, the new pane the second.
    /// Returns the id of the new split node.
    ///
    /// # Errors
    /// Returns error if `pane` is unknown or `new_pane` already exists.
    pub fn split_leaf(
        &mut self,
        pane: PaneId,
        direction: SplitDirection,
        new_pane: PaneId,
    ) -> Result<NodeId, LayoutError> {
        let leaf = self.leaf_of(pane).ok_or(LayoutError::PaneNotFound(pane))?;
        if self.contains(new_pane) {
            return Err(LayoutError::DuplicatePane(new_pane));
        }
        let parent = self.parent(leaf);

        // The second child is patched in once the new leaf has an id.
        let split = self.alloc(Entry {
            node: LayoutNode::Split {
                direction,
                ratio: DEFAULT_RATIO,
                first: leaf,
                second: leaf,
            },
            parent,
        });
        let new_leaf = self.alloc(Entry {
            node: LayoutNode::Leaf(new_pane),
            parent: Some(split),
        });
        if let Some(LayoutNode::Split { second, .. }) =
            self.entry_mut(split).map(|entry| &mut entry.node)
        {
            *second = new_leaf;
        }
        self.splits += 1;

        self.replace_child(parent, leaf, split);
        self.set_parent(leaf, Some(split));
        self.leaves.insert(new_pane, new_leaf);
        Ok(split)
    }

    /// Removes the leaf of `pane`, promoting its sibling into the parent's place.
    ///
    /// Returns the first pane of the promoted subtree in pre-order.
    ///
    /// # Errors
    /// Returns error if `pane` is unknown or is the only pane.
    pub fn remove_leaf(&mut self, pane: PaneId) -> Result<PaneId, LayoutError> {
        let leaf = self.leaf_of(pane).ok_or(LayoutError::PaneNotFound(pane))?;
        let Some(parent) = self.parent(leaf) else {
            return Err(LayoutError::LastPane);
        };
        let sibling = match self.node(parent) {
            Some(LayoutNode::Split { first, second, .. }) => {
                if *first == leaf {
                    *second
                } else {
                    *first
                }
            }
            _ => return Err(LayoutError::Corrupt(format!("{parent} is not a split"))),
        };
        let grandparent = self.parent(parent);

        self.replace_child(grandparent, parent, sibling);
        self.set_parent(sibling, grandparent);
        self.release(leaf);
        self.release(parent);
        self.splits -= 1;
        self.leaves.remove(&pane);

        self.first_leaf(sibling)
            .ok_or_else(|| LayoutError::Corrupt(format!("{sibling} has no leaf")))
    }

    /// Sets a split's ratio, clamped to `[min_ratio, 1 - min_ratio]`.
    ///
    /// Returns the ratio actually stored.
    ///
    /// # Errors
    /// Returns error if `split` is not a split node.
    pub fn set_ratio(
        &mut self,
        split: NodeId,
        ratio: f32,
        min_ratio: f32,
    ) -> Result<f32, LayoutError> {
        match self.entry_mut(split).map(|entry| &mut entry.node) {
            Some(LayoutNode::Split { ratio: current, .. }) => {
                *current = clamp_ratio(ratio, min_ratio);
                Ok(*current)
            }
            _ => Err(LayoutError::NotASplit(split)),
        }
    }

    /// Moves a split's ratio by `delta`, saturating at the clamp bounds.
    ///
    /// # Errors
    /// Returns error if `split` is not a split node.
    pub fn adjust_ratio(
        &mut self,
        split: NodeId,
        delta: f32,
        min_ratio: f32,
    ) -> Result<f32, LayoutError> {
        let current = self.ratio(split).ok_or(LayoutError::NotASplit(split))?;
        let delta = if delta.is_finite() { delta } else { 0.0 };
        self.set_ratio(split, current + delta, min_ratio)
    }

    /// Computes pane, divider and node rectangles for `area`.
    #[must_use]
    pub fn geometry(&self, area: Rect, settings: &LayoutSettings) -> TreeGeometry {
        let mut geometry = TreeGeometry::default();
        self.layout_node(self.root, area, settings, &mut geometry);
        geometry
    }

    fn layout_node(
        &self,
        id: NodeId,
        area: Rect,
        settings: &LayoutSettings,
        out: &mut TreeGeometry,
    ) {
        out.nodes.insert(id, area);
        match self.node(id) {
            Some(LayoutNode::Leaf(pane)) => out.panes.push((*pane, area)),
            Some(LayoutNode::Split {
                direction,
                ratio,
                first,
                second,
            }) => {
                let parts = split_rect(
                    area,
                    *direction,
                    *ratio,
                    settings.divider_width,
                    settings.cell,
                );
                out.dividers.push(Divider {
                    split: id,
                    direction: *direction,
                    ratio: *ratio,
                    rect: parts.divider,
                });
                self.layout_node(*first, parts.first, settings, out);
                self.layout_node(*second, parts.second, settings, out);
            }
            None => {}
        }
    }

    /// Verifies the structural invariants of the tree.
    ///
    /// # Errors
    /// Returns [`LayoutError::Corrupt`] describing the first violation found.
    pub fn check_invariants(&self, min_ratio: f32) -> Result<(), LayoutError> {
        let corrupt = |msg: String| Err(LayoutError::Corrupt(msg));

        if self.parent(self.root).is_some() {
            return corrupt(format!("root {} has a parent", self.root));
        }

        let mut seen_nodes = HashSet::new();
        let mut seen_panes = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !seen_nodes.insert(id) {
                return corrupt(format!("{id} reachable twice"));
            }
            match self.node(id) {
                None => return corrupt(format!("{id} is dangling")),
                Some(LayoutNode::Leaf(pane)) => {
                    if !seen_panes.insert(*pane) {
                        return corrupt(format!("pane {pane} appears twice"));
                    }
                    if self.leaf_of(*pane) != Some(id) {
                        return corrupt(format!("pane {pane} index is stale"));
                    }
                }
                Some(LayoutNode::Split {
                    ratio,
                    first,
                    second,
                    ..
                }) => {
                    if first == second {
                        return corrupt(format!("{id} has one child twice"));
                    }
                    if (clamp_ratio(*ratio, min_ratio) - ratio).abs() > f32::EPSILON {
                        return corrupt(format!("{id} ratio {ratio} out of bounds"));
                    }
                    for child in [*first, *second] {
                        if self.parent(child) != Some(id) {
                            return corrupt(format!("{child} does not point back to {id}"));
                        }
                        stack.push(child);
                    }
                }
            }
        }

        let live = self.slots.iter().filter(|slot| slot.entry.is_some()).count();
        if live != seen_nodes.len() {
            return corrupt(format!(
                "{} live nodes but {} reachable",
                live,
                seen_nodes.len()
            ));
        }
        if seen_panes.len() != self.leaves.len() {
            return corrupt("pane index out of sync".to_string());
        }
        if seen_panes.len() != self.splits + 1 {
            return corrupt(format!(
                "{} panes but {} splits",
                seen_panes.len(),
                self.splits
            ));
        }
        if live + self.free.len() != self.slots.len() {
            return corrupt("free list out of sync".to_string());
        }
        Ok(())
    }

    /// Stores `entry` in a free slot, growing the arena only when none is left.
    fn alloc(&mut self, entry: Entry) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.entry = Some(entry);
            return NodeId::new(index, slot.generation);
        }
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        NodeId::new(self.slots.len() - 1, 0)
    }

    /// Empties a node's slot and retires every handle issued for it.
    fn release(&mut self, id: NodeId) {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return;
        };
        if slot.generation == id.generation() && slot.entry.take().is_some() {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index());
        }
    }

    fn entry(&self, id: NodeId) -> Option<&Entry> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_mut())
    }

    fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        if let Some(entry) = self.entry_mut(id) {
            entry.parent = parent;
        }
    }

    /// Points `parent` (or the root, when `None`) at `new` instead of `old`.
    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: NodeId) {
        let Some(parent) = parent else {
            self.root = new;
            return;
        };
        if let Some(LayoutNode::Split { first, second, .. }) =
            self.entry_mut(parent).map(|entry| &mut entry.node)
        {
            if *first == old {
                *first = new;
            } else if *second == old {
                *second = new;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::geometry::CellMetrics;

    fn settings() -> LayoutSettings {
        LayoutSettings {
            cell: CellMetrics::default(),
            divider_width: 0.0,
            min_ratio: 0.1,
        }
    }

    #[test]
    fn test_new_tree_has_single_leaf() {
        let tree = LayoutTree::new(1);
        assert_eq!(tree.panes(), vec![1]);
        assert_eq!(tree.node(tree.root()), Some(&LayoutNode::Leaf(1)));
        assert!(tree.check_invariants(0.1).is_ok());
    }

    #[test]
    fn test_split_places_new_pane_second() {
        let mut tree = LayoutTree::new(1);
        let split = tree.split_leaf(1, SplitDirection::Vertical, 2).unwrap();

        assert_eq!(tree.root(), split);
        match tree.node(split) {
            Some(LayoutNode::Split {
                direction,
                ratio,
                first,
                second,
            }) => {
                assert_eq!(*direction, SplitDirection::Vertical);
                assert!((ratio - 0.5).abs() < f32::EPSILON);
                assert_eq!(tree.node(*first), Some(&LayoutNode::Leaf(1)));
                assert_eq!(tree.node(*second), Some(&LayoutNode::Leaf(2)));
            }
            other => panic!("expected split, got {other:?}"),
        }
        assert!(tree.check_invariants(0.1).is_ok());
    }

    #[test]
    fn test_split_errors() {
        let mut tree = LayoutTree::new(1);
        assert_eq!(
            tree.split_leaf(9, SplitDirection::Horizontal, 2),
            Err(LayoutError::PaneNotFound(9))
        );
        assert_eq!(
            tree.split_leaf(1, SplitDirection::Horizontal, 1),
            Err(LayoutError::DuplicatePane(1))
        );
    }

    #[test]
    fn test_remove_promotes_sibling_subtree() {
        let mut tree = LayoutTree::new(1);
        tree.split_leaf(1, SplitDirection::Horizontal, 2).unwrap();
        let inner = tree.split_leaf(2, SplitDirection::Vertical, 3).unwrap();

        // Removing 1 promotes the (2 | 3) split to the root.
        let hint = tree.remove_leaf(1).unwrap();
        assert_eq!(hint, 2);
        assert_eq!(tree.root(), inner);
        assert_eq!(tree.panes(), vec![2, 3]);
        assert!(tree.check_invariants(0.1).is_ok());
    }

    #[test]
    fn test_remove_last_pane_is_rejected() {
        let mut tree = LayoutTree::new(1);
        assert_eq!(tree.remove_leaf(1), Err(LayoutError::LastPane));
        assert_eq!(tree.remove_leaf(5), Err(LayoutError::PaneNotFound(5)));
        assert_eq!(tree.panes(), vec![1]);
    }

    #[test]
    fn test_removed_split_id_is_dangling() {
        let mut tree = LayoutTree::new(1);
        let split = tree.split_leaf(1, SplitDirection::Horizontal, 2).unwrap();
        tree.remove_leaf(2).unwrap();

        assert!(tree.node(split).is_none());
        assert_eq!(
            tree.adjust_ratio(split, 0.1, 0.1),
            Err(LayoutError::NotASplit(split))
        );
    }

    #[test]
    fn test_reused_slot_does_not_revive_stale_id() {
        let mut tree = LayoutTree::new(1);
        let old = tree.split_leaf(1, SplitDirection::Horizontal, 2).unwrap();
        tree.remove_leaf(2).unwrap();
        let new = tree.split_leaf(1, SplitDirection::Vertical, 3).unwrap();

        assert_ne!(old, new);
        assert!(tree.node(old).is_none());
        assert!(tree.ratio(new).is_some());
        assert_eq!(
            tree.set_ratio(old, 0.3, 0.1),
            Err(LayoutError::NotASplit(old))
        );
        assert!(tree.check_invariants(0.1).is_ok());
    }

    #[test]
    fn test_split_close_cycles_keep_arena_bounded() {
        let mut tree = LayoutTree::new(1);
        tree.split_leaf(1, SplitDirection::Horizontal, 2).unwrap();
        let peak = tree.arena_len();

        for pane in 3..1003 {
            tree.split_leaf(1, SplitDirection::Vertical, pane).unwrap();
            assert_eq!(tree.split_count(), 2);
            tree.remove_leaf(pane).unwrap();
            assert_eq!(tree.split_count(), 1);
        }

        assert_eq!(tree.arena_len(), peak + 2);
        assert_eq!(tree.panes(), vec![1, 2]);
        assert!(tree.check_invariants(0.1).is_ok());
    }

    #[test]
    fn test_adjust_ratio_saturates() {
        let mut tree = LayoutTree::new(1);
        let split = tree.split_leaf(1, SplitDirection::Horizontal, 2).unwrap();

        assert!((tree.adjust_ratio(split, 0.9, 0.1).unwrap() - 0.9).abs() < 1e-6);
        assert!((tree.adjust_ratio(split, -5.0, 0.1).unwrap() - 0.1).abs() < 1e-6);
        assert!((tree.adjust_ratio(split, f32::NAN, 0.1).unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_leaf_is_not_a_split() {
        let mut tree = LayoutTree::new(1);
        let root = tree.root();
        assert_eq!(
            tree.set_ratio(root, 0.3, 0.1),
            Err(LayoutError::NotASplit(root))
        );
    }

    #[test]
    fn test_geometry_nested() {
        let mut tree = LayoutTree::new(1);
        tree.split_leaf(1, SplitDirection::Horizontal, 2).unwrap();
        tree.split_leaf(2, SplitDirection::Vertical, 3).unwrap();

        let geometry = tree.geometry(Rect::new(0.0, 0.0, 80.0, 24.0), &settings());

        assert_eq!(
            geometry.panes,
            vec![
                (1, Rect::new(0.0, 0.0, 40.0, 24.0)),
                (2, Rect::new(40.0, 0.0, 40.0, 12.0)),
                (3, Rect::new(40.0, 12.0, 40.0, 12.0)),
            ]
        );
        assert_eq!(geometry.dividers.len(), 2);
        assert_eq!(geometry.dividers[0].direction, SplitDirection::Horizontal);
    }
}
