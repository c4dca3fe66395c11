//! The display side of a pane.

/// Receives what a pane's session produces.
///
/// Implemented by whatever renders the terminal. Keystrokes travel the
/// other way through [`super::PaneManager::send_input`].
pub trait DisplayConsumer {
    /// Raw bytes written by the session, in order.
    fn on_output(&mut self, data: &[u8]);

    /// The terminal grid size the pane now has.
    fn set_size(&mut self, cols: u16, rows: u16);

    /// The session has exited. Called at most once.
    fn on_exit(&mut self, _code: Option<u32>, _signal: Option<&str>) {}

    /// The pane is gone; release any resources.
    fn dispose(&mut self) {}
}
