//! Session notifications and the ordered event stream that carries them.

use std::collections::HashSet;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use tracing::trace;

use super::SessionId;

/// Notification produced by a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Raw bytes the shell wrote to its terminal.
    Output {
        /// Session that produced the bytes.
        id: SessionId,
        /// The bytes, in the order the PTY produced them.
        data: Vec<u8>,
    },
    /// The session's process is gone. Delivered exactly once per session.
    Exit {
        /// Session that exited.
        id: SessionId,
        /// Exit code, when the OS reported one.
        code: Option<u32>,
        /// Terminating signal name, when the OS reported one.
        signal: Option<String>,
    },
}

impl SessionEvent {
    /// Returns the session this event belongs to.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Output { id, .. } | Self::Exit { id, .. } => *id,
        }
    }

    /// Returns true for exit notifications.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit { .. })
    }
}

/// Receiving half of a session event channel.
///
/// Every session has exactly one producer feeding this channel, so events
/// of one session arrive in order. Once the exit of a session has been
/// delivered, anything else still queued for that id is discarded, which
/// makes the exit notification both unique and final.
pub struct SessionEvents {
    rx: Receiver<SessionEvent>,
    dead: HashSet<SessionId>,
    closed: bool,
}

impl SessionEvents {
    pub(crate) fn new(rx: Receiver<SessionEvent>) -> Self {
        Self {
            rx,
            dead: HashSet::new(),
            closed: false,
        }
    }

    /// Returns the next pending event without blocking.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(event) = self.admit(event) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<SessionEvent> {
        loop {
            match self.rx.recv_timeout(timeout) {
                Ok(event) => {
                    if let Some(event) = self.admit(event) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    /// Returns true once every producer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn admit(&mut self, event: SessionEvent) -> Option<SessionEvent> {
        let id = event.session_id();
        if self.dead.contains(&id) {
            trace!("Dropping late event for exited session {}", id);
            return None;
        }
        if event.is_exit() {
            self.dead.insert(id);
        }
        Some(event)
    }
}
