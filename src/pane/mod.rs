//! Pane manager.
//!
//! [`PaneManager`] is the one object UI code talks to. It owns the tabs,
//! each with a [`LayoutEngine`], and a [`SessionBackend`] that runs the
//! shells. Structural changes create or kill sessions first and touch the
//! tree only once that succeeded; session output is drained from the
//! backend on the caller's schedule and routed to pane displays.

pub mod display;
pub mod resize;
mod tab;

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub use display::DisplayConsumer;
pub use resize::{DueResize, ResizeCoalescer};
pub use tab::TabId;

use tab::{Pane, Tab};

use crate::config::{Config, DEFAULT_COLS, DEFAULT_RESIZE_DEBOUNCE_MS, DEFAULT_ROWS};
use crate::layout::{
    FocusDirection, GridSize, LayoutEngine, LayoutError, LayoutSettings, LayoutSnapshot, NodeId,
    PaneId, PaneLaunch, Rect, SplitDirection,
};
use crate::session::{SessionBackend, SessionError, SessionEvent, SessionId, SpawnRequest};

/// Upper bound on events handled by one [`PaneManager::pump_events`] call.
pub const MAX_EVENTS_PER_PUMP: usize = 1024;

/// Pane manager error type.
#[derive(Debug, Error)]
pub enum PaneError {
    /// The tab does not exist.
    #[error("Tab not found: {0}")]
    TabNotFound(TabId),

    /// Layout operation failed.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Something the caller should react to after [`PaneManager::pump_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneEvent {
    /// A pane's shell exited on its own and the pane was closed.
    PaneExited {
        /// Tab of the pane.
        tab: TabId,
        /// The closed pane.
        pane: PaneId,
        /// Exit code, when known.
        code: Option<u32>,
        /// Terminating signal, when known.
        signal: Option<String>,
        /// Pane that now has focus, unless the tab closed with it.
        focus: Option<PaneId>,
    },
    /// A tab lost its last pane and was torn down.
    TabClosed {
        /// The closed tab.
        tab: TabId,
    },
}

/// Owns tabs of panes and the sessions behind them.
pub struct PaneManager<B: SessionBackend> {
    /// Session backend.
    backend: B,
    /// Geometry settings for new tabs.
    settings: LayoutSettings,
    /// Grid of tabs opened before their container size is known.
    default_grid: GridSize,
    /// Tabs by id.
    tabs: BTreeMap<TabId, Tab>,
    /// Next tab id.
    next_tab: TabId,
    /// Where each session's output goes.
    routes: HashMap<SessionId, (TabId, PaneId)>,
    /// Pending geometry passes.
    resizes: ResizeCoalescer,
}

impl<B: SessionBackend> PaneManager<B> {
    /// Creates a manager with the default resize interval.
    pub fn new(backend: B, settings: LayoutSettings) -> Self {
        Self::with_resize_interval(
            backend,
            settings,
            Duration::from_millis(DEFAULT_RESIZE_DEBOUNCE_MS),
        )
    }

    /// Creates a manager with geometry, resize interval and default grid
    /// taken from `config`.
    pub fn from_config(backend: B, config: &Config) -> Self {
        let mut manager =
            Self::with_resize_interval(backend, config.layout_settings(), config.resize_debounce());
        manager.default_grid = config.default_grid();
        manager
    }

    /// Creates a manager that coalesces resizes over `interval`.
    pub fn with_resize_interval(backend: B, settings: LayoutSettings, interval: Duration) -> Self {
        Self {
            backend,
            settings,
            default_grid: GridSize::new(DEFAULT_COLS, DEFAULT_ROWS),
            tabs: BTreeMap::new(),
            next_tab: 1,
            routes: HashMap::new(),
            resizes: ResizeCoalescer::new(interval),
        }
    }

    /// Returns the session backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the session backend mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Returns the geometry settings.
    pub fn settings(&self) -> &LayoutSettings {
        &self.settings
    }

    /// Returns the ids of every tab in creation order.
    pub fn tab_ids(&self) -> Vec<TabId> {
        self.tabs.keys().copied().collect()
    }

    /// Returns the number of tabs.
    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    /// Returns a tab's layout.
    pub fn layout(&self, tab: TabId) -> Option<&LayoutEngine> {
        self.tabs.get(&tab).map(|t| &t.engine)
    }

    /// Returns a tab's panes in pre-order.
    pub fn pane_ids(&self, tab: TabId) -> Vec<PaneId> {
        self.layout(tab).map(LayoutEngine::panes).unwrap_or_default()
    }

    /// Returns a tab's active pane.
    pub fn active_pane(&self, tab: TabId) -> Option<PaneId> {
        self.layout(tab).map(LayoutEngine::active_pane)
    }

    /// Returns the session bound to a pane.
    pub fn session_of(&self, tab: TabId, pane: PaneId) -> Option<SessionId> {
        self.tabs.get(&tab).and_then(|t| t.session_of(pane))
    }

    /// Returns a pane's launch description.
    pub fn launch_of(&self, tab: TabId, pane: PaneId) -> Option<&PaneLaunch> {
        self.tabs
            .get(&tab)
            .and_then(|t| t.panes.get(&pane))
            .map(|p| &p.launch)
    }

    /// Opens a tab with one pane covering `area`.
    ///
    /// # Errors
    /// Returns error if the session cannot be created; no tab is added.
    pub fn create_tab(
        &mut self,
        area: Rect,
        launch: PaneLaunch,
        mut display: Box<dyn DisplayConsumer>,
    ) -> Result<(TabId, PaneId), PaneError> {
        let mut engine = LayoutEngine::new(area, self.settings);
        let pane = engine.active_pane();
        let size = engine
            .pane_size(pane)
            .unwrap_or_else(|| GridSize::new(1, 1));

        let session = self.spawn(&launch, size)?;

        engine.mark_applied(pane, size);
        display.set_size(size.cols, size.rows);

        let tab_id = self.allocate_tab();
        let mut tab = Tab::new(engine);
        tab.panes.insert(
            pane,
            Pane {
                session,
                launch,
                display,
            },
        );
        self.tabs.insert(tab_id, tab);
        self.routes.insert(session, (tab_id, pane));
        info!("Opened tab {} with pane {} (session {})", tab_id, pane, session);
        Ok((tab_id, pane))
    }

    /// Opens a tab sized to the default grid, for callers that do not know
    /// their container yet. A later [`PaneManager::resize_container`] fits
    /// it to the real area.
    ///
    /// # Errors
    /// Returns error if the session cannot be created; no tab is added.
    pub fn create_default_tab(
        &mut self,
        launch: PaneLaunch,
        display: Box<dyn DisplayConsumer>,
    ) -> Result<(TabId, PaneId), PaneError> {
        let area = Rect::from_grid(self.default_grid, self.settings.cell);
        self.create_tab(area, launch, display)
    }

    /// Splits a pane. The new pane is the second child and gets focus.
    ///
    /// Its session starts in the origin pane's current directory when that
    /// can be determined, otherwise in the origin's launch directory.
    ///
    /// # Errors
    /// Returns error if the tab or pane is unknown or the session cannot be
    /// created. The layout is unchanged on error.
    pub fn split_pane(
        &mut self,
        tab_id: TabId,
        pane: PaneId,
        direction: SplitDirection,
        mut display: Box<dyn DisplayConsumer>,
    ) -> Result<PaneId, PaneError> {
        let tab = self.tabs.get(&tab_id).ok_or(PaneError::TabNotFound(tab_id))?;
        let size = tab.engine.preview_split(pane, direction)?;
        let origin = tab.panes.get(&pane).ok_or(LayoutError::PaneNotFound(pane))?;
        let cwd = self
            .backend
            .working_dir(origin.session)
            .or_else(|| origin.launch.cwd.clone());
        let launch = PaneLaunch::new(None, cwd);

        let session = self.spawn(&launch, size)?;

        let Some(tab) = self.tabs.get_mut(&tab_id) else {
            return Err(PaneError::TabNotFound(tab_id));
        };
        let new_pane = match tab.engine.split(pane, direction) {
            Ok(new_pane) => new_pane,
            Err(e) => {
                let _ = self.backend.kill(session);
                return Err(e.into());
            }
        };
        tab.engine.mark_applied(new_pane, size);
        display.set_size(size.cols, size.rows);
        tab.panes.insert(
            new_pane,
            Pane {
                session,
                launch,
                display,
            },
        );
        self.routes.insert(session, (tab_id, new_pane));
        apply_layout(&mut self.backend, tab);
        debug_assert!(tab.engine.check_invariants().is_ok());

        info!(
            "Split pane {} of tab {} into pane {} (session {})",
            pane, tab_id, new_pane, session
        );
        Ok(new_pane)
    }

    /// Closes a pane and kills its session.
    ///
    /// Returns the pane that should receive focus.
    ///
    /// # Errors
    /// Returns error if the tab or pane is unknown, or if it is the tab's
    /// only pane. Nothing is changed on error.
    pub fn close_pane(&mut self, tab_id: TabId, pane: PaneId) -> Result<PaneId, PaneError> {
        let tab = self
            .tabs
            .get_mut(&tab_id)
            .ok_or(PaneError::TabNotFound(tab_id))?;
        if !tab.engine.contains(pane) {
            return Err(LayoutError::PaneNotFound(pane).into());
        }
        if tab.engine.pane_count() == 1 {
            return Err(LayoutError::LastPane.into());
        }

        if let Some(mut closed) = tab.panes.remove(&pane) {
            self.routes.remove(&closed.session);
            kill_session(&mut self.backend, closed.session);
            closed.display.dispose();
        }
        let hint = tab.engine.close(pane)?;
        apply_layout(&mut self.backend, tab);

        info!("Closed pane {} of tab {}", pane, tab_id);
        Ok(hint)
    }

    /// Closes a tab and kills every session in it.
    ///
    /// # Errors
    /// Returns error if the tab is unknown.
    pub fn close_tab(&mut self, tab_id: TabId) -> Result<(), PaneError> {
        let tab = self
            .tabs
            .remove(&tab_id)
            .ok_or(PaneError::TabNotFound(tab_id))?;
        self.teardown(tab);
        self.resizes.cancel(tab_id);
        info!("Closed tab {}", tab_id);
        Ok(())
    }

    /// Closes every tab, killing every session.
    pub fn shutdown(&mut self) {
        let tabs = std::mem::take(&mut self.tabs);
        if !tabs.is_empty() {
            info!("Shutting down {} tab(s)", tabs.len());
        }
        for (tab_id, tab) in tabs {
            self.teardown(tab);
            self.resizes.cancel(tab_id);
        }
    }

    fn teardown(&mut self, tab: Tab) {
        for (_, mut pane) in tab.panes {
            self.routes.remove(&pane.session);
            kill_session(&mut self.backend, pane.session);
            pane.display.dispose();
        }
    }

    /// Marks a pane as the one receiving input.
    ///
    /// # Errors
    /// Returns error if the tab or pane is unknown.
    pub fn set_focus(&mut self, tab_id: TabId, pane: PaneId) -> Result<(), PaneError> {
        let tab = self
            .tabs
            .get_mut(&tab_id)
            .ok_or(PaneError::TabNotFound(tab_id))?;
        tab.engine.set_focus(pane)?;
        Ok(())
    }

    /// Moves focus to the neighbouring pane in `direction`.
    ///
    /// # Errors
    /// Returns error if the tab is unknown.
    pub fn focus_direction(
        &mut self,
        tab_id: TabId,
        direction: FocusDirection,
    ) -> Result<Option<PaneId>, PaneError> {
        let tab = self
            .tabs
            .get_mut(&tab_id)
            .ok_or(PaneError::TabNotFound(tab_id))?;
        Ok(tab.engine.focus_direction(direction))
    }

    /// Sends input to the tab's active pane.
    ///
    /// A session that already exited is ignored; its exit arrives through
    /// [`Self::pump_events`].
    ///
    /// # Errors
    /// Returns error if the tab is unknown.
    pub fn send_input(&mut self, tab_id: TabId, data: &[u8]) -> Result<(), PaneError> {
        let pane = self
            .active_pane(tab_id)
            .ok_or(PaneError::TabNotFound(tab_id))?;
        self.send_input_to(tab_id, pane, data)
    }

    /// Sends input to a specific pane.
    ///
    /// # Errors
    /// Returns error if the tab or pane is unknown.
    pub fn send_input_to(
        &mut self,
        tab_id: TabId,
        pane: PaneId,
        data: &[u8],
    ) -> Result<(), PaneError> {
        let tab = self.tabs.get(&tab_id).ok_or(PaneError::TabNotFound(tab_id))?;
        let session = tab
            .session_of(pane)
            .ok_or(LayoutError::PaneNotFound(pane))?;
        if let Err(e) = self.backend.write(session, data) {
            debug!("Input for pane {} dropped: {}", pane, e);
        }
        Ok(())
    }

    /// Queues a container resize for a tab.
    ///
    /// # Errors
    /// Returns error if the tab is unknown.
    pub fn resize_container(&mut self, tab_id: TabId, area: Rect) -> Result<(), PaneError> {
        if !self.tabs.contains_key(&tab_id) {
            return Err(PaneError::TabNotFound(tab_id));
        }
        self.resizes.request_area(tab_id, area, Instant::now());
        Ok(())
    }

    /// Moves a divider by a fraction of its split's extent.
    ///
    /// The ratio changes at once; terminals are resized on the next flush.
    ///
    /// # Errors
    /// Returns error if the tab or split is unknown.
    pub fn resize_divider(
        &mut self,
        tab_id: TabId,
        split: NodeId,
        delta: f32,
    ) -> Result<f32, PaneError> {
        let tab = self
            .tabs
            .get_mut(&tab_id)
            .ok_or(PaneError::TabNotFound(tab_id))?;
        let ratio = tab.engine.resize_divider(split, delta)?;
        self.resizes.mark_dirty(tab_id, Instant::now());
        Ok(ratio)
    }

    /// Moves a divider by a number of pixels.
    ///
    /// # Errors
    /// Returns error if the tab or split is unknown.
    pub fn drag_divider(
        &mut self,
        tab_id: TabId,
        split: NodeId,
        pixels: f32,
    ) -> Result<f32, PaneError> {
        let tab = self
            .tabs
            .get_mut(&tab_id)
            .ok_or(PaneError::TabNotFound(tab_id))?;
        let ratio = tab.engine.drag_divider(split, pixels)?;
        self.resizes.mark_dirty(tab_id, Instant::now());
        Ok(ratio)
    }

    /// Runs the geometry pass of every tab whose resize interval elapsed.
    ///
    /// Returns the number of terminals resized.
    pub fn tick(&mut self, now: Instant) -> usize {
        let due = self.resizes.take_due(now);
        self.apply_resizes(due)
    }

    /// Runs every pending geometry pass immediately.
    ///
    /// Returns the number of terminals resized.
    pub fn flush_resizes(&mut self) -> usize {
        let due = self.resizes.take_all();
        self.apply_resizes(due)
    }

    fn apply_resizes(&mut self, due: Vec<DueResize>) -> usize {
        let mut resized = 0;
        for DueResize { tab, area } in due {
            let Some(tab) = self.tabs.get_mut(&tab) else {
                continue;
            };
            if let Some(area) = area {
                tab.engine.set_area(area);
            }
            resized += apply_layout(&mut self.backend, tab);
        }
        resized
    }

    /// Drains pending session events, routing output to displays.
    ///
    /// Panes whose shell exited on their own are closed; a tab that loses
    /// its last pane this way is torn down. Handles at most
    /// [`MAX_EVENTS_PER_PUMP`] events per call.
    pub fn pump_events(&mut self) -> Vec<PaneEvent> {
        let mut events = Vec::new();
        for _ in 0..MAX_EVENTS_PER_PUMP {
            let Some(event) = self.backend.poll_event() else {
                break;
            };
            match event {
                SessionEvent::Output { id, data } => self.route_output(id, &data),
                SessionEvent::Exit { id, code, signal } => {
                    self.handle_exit(id, code, signal, &mut events);
                }
            }
        }
        events
    }

    fn route_output(&mut self, session: SessionId, data: &[u8]) {
        let Some((tab_id, pane)) = self.routes.get(&session).copied() else {
            trace!("Dropping output of unrouted session {}", session);
            return;
        };
        if let Some(p) = self
            .tabs
            .get_mut(&tab_id)
            .and_then(|tab| tab.panes.get_mut(&pane))
        {
            p.display.on_output(data);
        }
    }

    fn handle_exit(
        &mut self,
        session: SessionId,
        code: Option<u32>,
        signal: Option<String>,
        events: &mut Vec<PaneEvent>,
    ) {
        let Some((tab_id, pane)) = self.routes.remove(&session) else {
            trace!("Exit of unrouted session {}", session);
            return;
        };
        let Some(tab) = self.tabs.get_mut(&tab_id) else {
            return;
        };
        info!(
            "Session {} of pane {} exited (code {:?}, signal {:?})",
            session, pane, code, signal
        );

        if let Some(mut closed) = tab.panes.remove(&pane) {
            closed.display.on_exit(code, signal.as_deref());
            closed.display.dispose();
        }

        if tab.engine.pane_count() <= 1 {
            self.tabs.remove(&tab_id);
            self.resizes.cancel(tab_id);
            events.push(PaneEvent::PaneExited {
                tab: tab_id,
                pane,
                code,
                signal,
                focus: None,
            });
            events.push(PaneEvent::TabClosed { tab: tab_id });
            info!("Tab {} closed after its last pane exited", tab_id);
            return;
        }

        let focus = match tab.engine.close(pane) {
            Ok(_) => Some(tab.engine.active_pane()),
            Err(e) => {
                warn!("Could not remove exited pane {}: {}", pane, e);
                None
            }
        };
        apply_layout(&mut self.backend, tab);
        events.push(PaneEvent::PaneExited {
            tab: tab_id,
            pane,
            code,
            signal,
            focus,
        });
    }

    /// Captures a tab's layout and how to relaunch each pane.
    ///
    /// Working directories reflect where each shell is now, when known.
    ///
    /// # Errors
    /// Returns error if the tab is unknown.
    pub fn snapshot(&self, tab_id: TabId) -> Result<LayoutSnapshot, PaneError> {
        let tab = self.tabs.get(&tab_id).ok_or(PaneError::TabNotFound(tab_id))?;
        let launch_of = |pane: PaneId| {
            tab.panes.get(&pane).map_or_else(PaneLaunch::default, |p| {
                let cwd = self
                    .backend
                    .working_dir(p.session)
                    .or_else(|| p.launch.cwd.clone());
                PaneLaunch::new(p.launch.shell.clone(), cwd)
            })
        };
        Ok(tab.engine.snapshot(&launch_of))
    }

    /// Opens a tab from a snapshot, starting a fresh session per pane.
    ///
    /// `displays` is called once per pane, in pre-order.
    ///
    /// # Errors
    /// Returns error if any session fails to start; sessions already
    /// started for the tab are killed and no tab is added.
    pub fn restore_tab(
        &mut self,
        snapshot: &LayoutSnapshot,
        area: Rect,
        mut displays: impl FnMut(PaneId) -> Box<dyn DisplayConsumer>,
    ) -> Result<TabId, PaneError> {
        let (mut engine, launches) = LayoutEngine::from_snapshot(snapshot, area, self.settings);

        let mut started: Vec<(PaneId, SessionId, PaneLaunch, GridSize)> =
            Vec::with_capacity(launches.len());
        for (pane, launch) in launches {
            let size = engine
                .pane_size(pane)
                .unwrap_or_else(|| GridSize::new(1, 1));
            match self.spawn(&launch, size) {
                Ok(session) => started.push((pane, session, launch, size)),
                Err(e) => {
                    warn!("Restoring tab failed, killing {} session(s)", started.len());
                    for (_, session, _, _) in started {
                        kill_session(&mut self.backend, session);
                    }
                    return Err(e);
                }
            }
        }

        let tab_id = self.allocate_tab();
        let mut panes = HashMap::with_capacity(started.len());
        for (pane, session, launch, size) in started {
            let mut display = displays(pane);
            display.set_size(size.cols, size.rows);
            engine.mark_applied(pane, size);
            self.routes.insert(session, (tab_id, pane));
            panes.insert(
                pane,
                Pane {
                    session,
                    launch,
                    display,
                },
            );
        }
        let mut tab = Tab::new(engine);
        tab.panes = panes;
        self.tabs.insert(tab_id, tab);
        info!("Restored tab {}", tab_id);
        Ok(tab_id)
    }

    /// Returns every session bound to a tab.
    pub fn sessions_of(&self, tab_id: TabId) -> Vec<SessionId> {
        self.tabs
            .get(&tab_id)
            .map(Tab::sessions)
            .unwrap_or_default()
    }

    fn spawn(&mut self, launch: &PaneLaunch, size: GridSize) -> Result<SessionId, PaneError> {
        let request = SpawnRequest {
            shell: launch.shell.clone(),
            cwd: launch.cwd.clone(),
            cols: size.cols,
            rows: size.rows,
        };
        let info = self.backend.create(&request).map_err(|e| {
            warn!("Failed to create session: {}", e);
            e
        })?;
        Ok(info.id)
    }

    fn allocate_tab(&mut self) -> TabId {
        let id = self.next_tab;
        self.next_tab += 1;
        id
    }
}

impl<B: SessionBackend> Drop for PaneManager<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resizes the terminals of panes whose grid size changed.
///
/// Returns the number of panes resized. Backend failures are logged and
/// otherwise ignored; a dead session reports itself through its exit.
fn apply_layout<B: SessionBackend>(backend: &mut B, tab: &mut Tab) -> usize {
    let changes = tab.engine.relayout();
    for change in &changes {
        let Some(pane) = tab.panes.get_mut(&change.pane) else {
            continue;
        };
        if let Err(e) = backend.resize(pane.session, change.cols, change.rows) {
            debug!("Resize of pane {} ignored: {}", change.pane, e);
        }
        pane.display.set_size(change.cols, change.rows);
    }
    changes.len()
}

/// Kills a session, treating "already gone" as success.
fn kill_session<B: SessionBackend>(backend: &mut B, session: SessionId) {
    match backend.kill(session) {
        Ok(()) => debug!("Killed session {}", session),
        Err(SessionError::NotFound(_)) => debug!("Session {} was already gone", session),
        Err(e) => warn!("Failed to kill session {}: {}", session, e),
    }
}
