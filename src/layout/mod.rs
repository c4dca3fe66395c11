//! Pane layout engine.
//!
//! Each tab owns a [`LayoutEngine`]: a binary split tree of panes plus the
//! pixel area it covers, the active pane, and the grid size last applied to
//! every pane's terminal. The engine is pure bookkeeping; it never talks to
//! sessions. The pane manager asks it for geometry before creating a
//! session and for the list of changed sizes after every mutation.

pub mod geometry;
pub mod snapshot;
pub mod tree;
pub mod types;

use std::collections::HashMap;

use tracing::debug;

pub use geometry::{CellMetrics, GridSize, Rect, SplitRects, split_rect};
pub use snapshot::{LayoutSnapshot, PaneLaunch};
pub use tree::{LayoutNode, LayoutTree, TreeGeometry};
pub use types::{
    DEFAULT_MIN_RATIO, DEFAULT_RATIO, Divider, FocusDirection, LayoutError, LayoutSettings,
    MAX_MIN_RATIO, NodeId, PaneId, PaneResize, SplitDirection, clamp_ratio,
};

/// Extra pixels around a divider that still count as a hit.
const DIVIDER_HIT_SLOP: f32 = 2.0;

/// Layout state of one tab.
#[derive(Debug, Clone)]
pub struct LayoutEngine {
    /// The split tree.
    tree: LayoutTree,
    /// Pixel area the tree is laid out in.
    area: Rect,
    /// Geometry settings.
    settings: LayoutSettings,
    /// Pane that receives input.
    active: PaneId,
    /// Next pane id to hand out.
    next_pane: PaneId,
    /// Grid size last applied to each pane's terminal.
    applied: HashMap<PaneId, GridSize>,
}

impl LayoutEngine {
    /// Creates a layout with a single pane (id 1) covering `area`.
    #[must_use]
    pub fn new(area: Rect, settings: LayoutSettings) -> Self {
        let root = 1;
        Self {
            tree: LayoutTree::new(root),
            area,
            settings,
            active: root,
            next_pane: root + 1,
            applied: HashMap::new(),
        }
    }

    /// Rebuilds a layout from a snapshot.
    ///
    /// Returns the engine and every pane's launch description in pre-order.
    /// Ratios are clamped to the current settings.
    #[must_use]
    pub fn from_snapshot(
        snapshot: &LayoutSnapshot,
        area: Rect,
        settings: LayoutSettings,
    ) -> (Self, Vec<(PaneId, PaneLaunch)>) {
        let mut engine = Self::new(area, settings);
        let mut launches = Vec::with_capacity(snapshot.pane_count());
        let root = engine.active;
        engine.restore_node(snapshot, root, &mut launches);
        (engine, launches)
    }

    fn restore_node(
        &mut self,
        snapshot: &LayoutSnapshot,
        pane: PaneId,
        launches: &mut Vec<(PaneId, PaneLaunch)>,
    ) {
        match snapshot {
            LayoutSnapshot::Pane { shell, cwd } => {
                launches.push((pane, PaneLaunch::new(shell.clone(), cwd.clone())));
            }
            LayoutSnapshot::Split {
                direction,
                ratio,
                first,
                second,
            } => {
                let new_pane = self.allocate_pane();
                // Cannot fail: `pane` is in the tree and `new_pane` is fresh.
                if let Ok(split) = self.tree.split_leaf(pane, *direction, new_pane) {
                    let _ = self.tree.set_ratio(split, *ratio, self.settings.min_ratio);
                }
                self.restore_node(first, pane, launches);
                self.restore_node(second, new_pane, launches);
            }
        }
    }

    /// Captures the layout, asking `launch_of` how each pane was started.
    #[must_use]
    pub fn snapshot(&self, launch_of: &impl Fn(PaneId) -> PaneLaunch) -> LayoutSnapshot {
        LayoutSnapshot::capture(&self.tree, launch_of)
    }

    /// Returns the split tree.
    #[must_use]
    pub const fn tree(&self) -> &LayoutTree {
        &self.tree
    }

    /// Returns the pixel area.
    #[must_use]
    pub const fn area(&self) -> Rect {
        self.area
    }

    /// Returns the geometry settings.
    #[must_use]
    pub const fn settings(&self) -> &LayoutSettings {
        &self.settings
    }

    /// Sets the pixel area. Call [`Self::relayout`] to learn what changed.
    pub fn set_area(&mut self, area: Rect) {
        self.area = area;
    }

    /// Returns the active pane.
    #[must_use]
    pub const fn active_pane(&self) -> PaneId {
        self.active
    }

    /// Marks a pane as active.
    ///
    /// # Errors
    /// Returns error if the pane is not in this layout.
    pub fn set_focus(&mut self, pane: PaneId) -> Result<(), LayoutError> {
        if !self.tree.contains(pane) {
            return Err(LayoutError::PaneNotFound(pane));
        }
        self.active = pane;
        Ok(())
    }

    /// Returns the number of panes.
    #[must_use]
    pub fn pane_count(&self) -> usize {
        self.tree.pane_count()
    }

    /// Returns every pane in pre-order.
    #[must_use]
    pub fn panes(&self) -> Vec<PaneId> {
        self.tree.panes()
    }

    /// Checks if the pane is part of this layout.
    #[must_use]
    pub fn contains(&self, pane: PaneId) -> bool {
        self.tree.contains(pane)
    }

    /// Computes the current geometry.
    #[must_use]
    pub fn geometry(&self) -> TreeGeometry {
        self.tree.geometry(self.area, &self.settings)
    }

    /// Returns a pane's rectangle.
    #[must_use]
    pub fn pane_rect(&self, pane: PaneId) -> Option<Rect> {
        if !self.tree.contains(pane) {
            return None;
        }
        self.geometry().pane_rect(pane)
    }

    /// Returns a pane's terminal size for the current geometry.
    #[must_use]
    pub fn pane_size(&self, pane: PaneId) -> Option<GridSize> {
        self.pane_rect(pane)
            .map(|rect| self.settings.cell.grid_size(&rect))
    }

    /// Returns the split directly containing a pane.
    #[must_use]
    pub fn split_of(&self, pane: PaneId) -> Option<NodeId> {
        self.tree
            .leaf_of(pane)
            .and_then(|leaf| self.tree.parent(leaf))
    }

    /// Returns the size the new pane would get if `pane` were split.
    ///
    /// # Errors
    /// Returns error if the pane is not in this layout.
    pub fn preview_split(
        &self,
        pane: PaneId,
        direction: SplitDirection,
    ) -> Result<GridSize, LayoutError> {
        let rect = self.pane_rect(pane).ok_or(LayoutError::PaneNotFound(pane))?;
        let parts = split_rect(
            rect,
            direction,
            self.settings.clamp_ratio(DEFAULT_RATIO),
            self.settings.divider_width,
            self.settings.cell,
        );
        Ok(self.settings.cell.grid_size(&parts.second))
    }

    /// Splits a pane in two. The new pane becomes the second child and
    /// receives focus.
    ///
    /// # Errors
    /// Returns error if the pane is not in this layout.
    pub fn split(&mut self, pane: PaneId, direction: SplitDirection) -> Result<PaneId, LayoutError> {
        if !self.tree.contains(pane) {
            return Err(LayoutError::PaneNotFound(pane));
        }
        let new_pane = self.allocate_pane();
        let split = self.tree.split_leaf(pane, direction, new_pane)?;
        let ratio = self.settings.clamp_ratio(DEFAULT_RATIO);
        self.tree.set_ratio(split, ratio, self.settings.min_ratio)?;
        self.active = new_pane;
        debug!("Split pane {} {:?} into {}", pane, direction, new_pane);
        Ok(new_pane)
    }

    /// Removes a pane. Returns the pane that should receive focus.
    ///
    /// If the closed pane was active, focus moves to the returned pane.
    ///
    /// # Errors
    /// Returns error if the pane is unknown or is the only pane.
    pub fn close(&mut self, pane: PaneId) -> Result<PaneId, LayoutError> {
        let hint = self.tree.remove_leaf(pane)?;
        self.applied.remove(&pane);
        if self.active == pane {
            self.active = hint;
        }
        debug!("Closed pane {}, focus hint {}", pane, hint);
        Ok(hint)
    }

    /// Moves a divider by `delta`, a fraction of the split's extent.
    ///
    /// Saturates at the ratio bounds. Returns the new ratio.
    ///
    /// # Errors
    /// Returns error if `split` is not a split of this layout.
    pub fn resize_divider(&mut self, split: NodeId, delta: f32) -> Result<f32, LayoutError> {
        self.tree
            .adjust_ratio(split, delta, self.settings.min_ratio)
    }

    /// Moves a divider by `pixels` along its split's axis.
    ///
    /// # Errors
    /// Returns error if `split` is not a split of this layout.
    pub fn drag_divider(&mut self, split: NodeId, pixels: f32) -> Result<f32, LayoutError> {
        let Some(LayoutNode::Split { direction, ratio, .. }) = self.tree.node(split) else {
            return Err(LayoutError::NotASplit(split));
        };
        let (direction, ratio) = (*direction, *ratio);

        let extent = self
            .geometry()
            .nodes
            .get(&split)
            .map_or(0.0, |rect| rect.extent(direction) - self.settings.divider_width);
        if extent <= 0.0 {
            return Ok(ratio);
        }
        self.resize_divider(split, pixels / extent)
    }

    /// Returns every divider with its rectangle.
    #[must_use]
    pub fn dividers(&self) -> Vec<Divider> {
        self.geometry().dividers
    }

    /// Finds the divider under a point.
    ///
    /// Nested dividers are drawn last, so the innermost hit wins.
    #[must_use]
    pub fn divider_at(&self, x: f32, y: f32) -> Option<NodeId> {
        self.dividers()
            .iter()
            .rev()
            .find(|divider| divider.rect.inflate(DIVIDER_HIT_SLOP).contains(x, y))
            .map(|divider| divider.split)
    }

    /// Finds the pane under a point.
    #[must_use]
    pub fn pane_at(&self, x: f32, y: f32) -> Option<PaneId> {
        self.geometry()
            .panes
            .iter()
            .find(|(_, rect)| rect.contains(x, y))
            .map(|(pane, _)| *pane)
    }

    /// Moves focus to the nearest pane in `direction`.
    ///
    /// Returns the newly focused pane, or `None` if there is no pane that way.
    pub fn focus_direction(&mut self, direction: FocusDirection) -> Option<PaneId> {
        let geometry = self.geometry();
        let (fx, fy) = geometry.pane_rect(self.active)?.center();

        let mut best: Option<(PaneId, f32)> = None;
        for (pane, rect) in &geometry.panes {
            if *pane == self.active {
                continue;
            }
            let (cx, cy) = rect.center();
            let in_direction = match direction {
                FocusDirection::Left => cx < fx,
                FocusDirection::Right => cx > fx,
                FocusDirection::Up => cy < fy,
                FocusDirection::Down => cy > fy,
            };
            if !in_direction {
                continue;
            }

            // Weight the off-axis distance so aligned panes win.
            let (dx, dy) = ((cx - fx).abs(), (cy - fy).abs());
            let distance = match direction {
                FocusDirection::Left | FocusDirection::Right => dx + dy * 2.0,
                FocusDirection::Up | FocusDirection::Down => dy + dx * 2.0,
            };
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((*pane, distance));
            }
        }

        let (pane, _) = best?;
        self.active = pane;
        Some(pane)
    }

    /// Recomputes the geometry and returns the panes whose terminal size
    /// differs from the size last applied, recording the new sizes.
    pub fn relayout(&mut self) -> Vec<PaneResize> {
        let geometry = self.geometry();
        let mut changed = Vec::new();
        for (pane, rect) in geometry.panes {
            let size = self.settings.cell.grid_size(&rect);
            if self.applied.get(&pane) != Some(&size) {
                self.applied.insert(pane, size);
                changed.push(PaneResize {
                    pane,
                    cols: size.cols,
                    rows: size.rows,
                });
            }
        }
        changed
    }

    /// Records the size a pane's terminal was created or resized with.
    pub fn mark_applied(&mut self, pane: PaneId, size: GridSize) {
        if self.tree.contains(pane) {
            self.applied.insert(pane, size);
        }
    }

    /// Returns the size last applied to a pane's terminal.
    #[must_use]
    pub fn applied_size(&self, pane: PaneId) -> Option<GridSize> {
        self.applied.get(&pane).copied()
    }

    /// Verifies the tree's structural invariants and the focus.
    ///
    /// # Errors
    /// Returns [`LayoutError::Corrupt`] on the first violation.
    pub fn check_invariants(&self) -> Result<(), LayoutError> {
        self.tree.check_invariants(self.settings.min_ratio)?;
        if !self.tree.contains(self.active) {
            return Err(LayoutError::Corrupt(format!(
                "active pane {} is not in the tree",
                self.active
            )));
        }
        Ok(())
    }

    fn allocate_pane(&mut self) -> PaneId {
        let pane = self.next_pane;
        self.next_pane += 1;
        pane
    }
}
