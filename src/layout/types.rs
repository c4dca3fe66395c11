//! Layout types and enums.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::geometry::{CellMetrics, Rect};

/// Identifier of a pane, unique within one tab.
pub type PaneId = u64;

/// Smallest share of a split either child may shrink to, by default.
pub const DEFAULT_MIN_RATIO: f32 = 0.1;

/// Largest accepted minimum ratio. Above this the clamp range would collapse.
pub const MAX_MIN_RATIO: f32 = 0.45;

/// Ratio given to a freshly created split.
pub const DEFAULT_RATIO: f32 = 0.5;

/// Handle to a node in a layout tree's arena.
///
/// Arena slots are recycled. The generation distinguishes a stale handle
/// from the node that later took over its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

impl NodeId {
    /// Builds a handle from an arena index and slot generation.
    #[must_use]
    pub const fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    /// Returns the slot generation this handle was issued for.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}.{}", self.index, self.generation)
    }
}

/// How a split divides its area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitDirection {
    /// Children side by side (left/right); the split divides the columns.
    Horizontal,
    /// Children stacked (top/bottom); the split divides the rows.
    Vertical,
}

/// Direction for focus navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusDirection {
    /// Move focus up.
    Up,
    /// Move focus down.
    Down,
    /// Move focus left.
    Left,
    /// Move focus right.
    Right,
}

/// Geometry settings shared by every tab.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutSettings {
    /// Pixel size of one terminal cell.
    pub cell: CellMetrics,
    /// Divider width in pixels.
    pub divider_width: f32,
    /// Minimum split ratio on either side.
    pub min_ratio: f32,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            cell: CellMetrics::default(),
            divider_width: 0.0,
            min_ratio: DEFAULT_MIN_RATIO,
        }
    }
}

impl LayoutSettings {
    /// Clamps a ratio into `[min_ratio, 1 - min_ratio]`.
    ///
    /// NaN becomes [`DEFAULT_RATIO`].
    #[must_use]
    pub fn clamp_ratio(&self, ratio: f32) -> f32 {
        clamp_ratio(ratio, self.min_ratio)
    }
}

/// Clamps `ratio` into `[min, 1 - min]`. `min` itself is kept in a sane range.
#[must_use]
pub fn clamp_ratio(ratio: f32, min: f32) -> f32 {
    let min = if min.is_finite() {
        min.clamp(0.0, MAX_MIN_RATIO)
    } else {
        DEFAULT_MIN_RATIO
    };
    if ratio.is_nan() {
        return DEFAULT_RATIO;
    }
    ratio.clamp(min, 1.0 - min)
}

/// A divider between the two children of a split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Divider {
    /// The split this divider belongs to.
    pub split: NodeId,
    /// Direction of the split.
    pub direction: SplitDirection,
    /// Current ratio of the split.
    pub ratio: f32,
    /// Divider rectangle in pixels.
    pub rect: Rect,
}

/// A pane whose terminal needs a new size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneResize {
    /// Pane to resize.
    pub pane: PaneId,
    /// New columns.
    pub cols: u16,
    /// New rows.
    pub rows: u16,
}

/// Layout error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// The pane is not part of this layout.
    #[error("Pane not found: {0}")]
    PaneNotFound(PaneId),

    /// The only pane of a tab cannot be closed.
    #[error("Cannot close the last pane")]
    LastPane,

    /// The node is not a split.
    #[error("Not a split: {0}")]
    NotASplit(NodeId),

    /// The pane id is already in use.
    #[error("Pane already exists: {0}")]
    DuplicatePane(PaneId),

    /// The tree violates a structural invariant.
    #[error("Corrupt layout: {0}")]
    Corrupt(String),
}
