//! A tab: one layout tree and the panes bound to its leaves.

use std::collections::HashMap;

use super::display::DisplayConsumer;
use crate::layout::{LayoutEngine, PaneId, PaneLaunch};
use crate::session::SessionId;

/// Identifier of a tab, unique per pane manager.
pub type TabId = u64;

/// A pane: one session and the display showing it.
pub(crate) struct Pane {
    /// Bound session. Never changes.
    pub(crate) session: SessionId,
    /// How the session was started.
    pub(crate) launch: PaneLaunch,
    /// Where output goes.
    pub(crate) display: Box<dyn DisplayConsumer>,
}

/// A tab containing a tree of panes.
pub(crate) struct Tab {
    /// Layout of the tab's panes.
    pub(crate) engine: LayoutEngine,
    /// Panes by id.
    pub(crate) panes: HashMap<PaneId, Pane>,
}

impl Tab {
    pub(crate) fn new(engine: LayoutEngine) -> Self {
        Self {
            engine,
            panes: HashMap::new(),
        }
    }

    /// Returns the session bound to a pane.
    pub(crate) fn session_of(&self, pane: PaneId) -> Option<SessionId> {
        self.panes.get(&pane).map(|p| p.session)
    }

    /// Returns every bound session.
    pub(crate) fn sessions(&self) -> Vec<SessionId> {
        self.panes.values().map(|p| p.session).collect()
    }
}
