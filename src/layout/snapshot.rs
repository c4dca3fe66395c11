//! Serializable layout snapshots.
//!
//! A snapshot records the shape of a tab (split directions, ratios and how
//! each pane was launched) so it can be rebuilt later with fresh sessions.
//! Session ids and process handles are never part of it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::tree::{LayoutNode, LayoutTree};
use super::types::{NodeId, PaneId, SplitDirection};

/// How a pane's shell is started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneLaunch {
    /// Shell program (None = default shell).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Working directory (None = home directory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl PaneLaunch {
    /// Creates a launch description.
    #[must_use]
    pub fn new(shell: Option<String>, cwd: Option<PathBuf>) -> Self {
        Self { shell, cwd }
    }
}

/// Saved shape of a layout tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayoutSnapshot {
    /// A pane.
    Pane {
        /// Shell program (None = default shell).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
        /// Working directory (None = home directory).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// A split.
    Split {
        /// How the area is divided.
        direction: SplitDirection,
        /// Share given to `first`.
        ratio: f32,
        /// Left or top child.
        first: Box<LayoutSnapshot>,
        /// Right or bottom child.
        second: Box<LayoutSnapshot>,
    },
}

impl LayoutSnapshot {
    /// Snapshot of a single pane.
    #[must_use]
    pub fn pane(launch: PaneLaunch) -> Self {
        Self::Pane {
            shell: launch.shell,
            cwd: launch.cwd,
        }
    }

    /// Snapshot of a split.
    #[must_use]
    pub fn split(direction: SplitDirection, ratio: f32, first: Self, second: Self) -> Self {
        Self::Split {
            direction,
            ratio,
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    /// Captures a tree, asking `launch_of` how each pane was started.
    #[must_use]
    pub fn capture(tree: &LayoutTree, launch_of: &impl Fn(PaneId) -> PaneLaunch) -> Self {
        Self::capture_node(tree, tree.root(), launch_of)
    }

    fn capture_node(
        tree: &LayoutTree,
        id: NodeId,
        launch_of: &impl Fn(PaneId) -> PaneLaunch,
    ) -> Self {
        match tree.node(id) {
            Some(LayoutNode::Split {
                direction,
                ratio,
                first,
                second,
            }) => Self::split(
                *direction,
                *ratio,
                Self::capture_node(tree, *first, launch_of),
                Self::capture_node(tree, *second, launch_of),
            ),
            Some(LayoutNode::Leaf(pane)) => Self::pane(launch_of(*pane)),
            None => Self::pane(PaneLaunch::default()),
        }
    }

    /// Returns the number of panes in the snapshot.
    #[must_use]
    pub fn pane_count(&self) -> usize {
        match self {
            Self::Pane { .. } => 1,
            Self::Split { first, second, .. } => first.pane_count() + second.pane_count(),
        }
    }

    /// Returns every pane's launch description in pre-order.
    #[must_use]
    pub fn launches(&self) -> Vec<PaneLaunch> {
        match self {
            Self::Pane { shell, cwd } => vec![PaneLaunch::new(shell.clone(), cwd.clone())],
            Self::Split { first, second, .. } => {
                let mut launches = first.launches();
                launches.extend(second.launches());
                launches
            }
        }
    }
}
