//! PTY session management.
//!
//! A [`SessionManager`] owns every shell it spawns. Sessions are addressed
//! by monotonically assigned ids that are never reused; output and exit
//! notifications are pushed into a single event channel that the owner
//! drains on its own schedule.

pub mod events;
pub mod pty;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use events::{SessionEvent, SessionEvents};
pub use pty::{KILLED_SIGNAL, Pty, PtyConfig, PtyError};

use crate::config::shell;

/// Unique identifier for a session.
pub type SessionId = u64;

/// Session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The shell could not be started.
    #[error("Failed to spawn session: {0}")]
    Spawn(String),

    /// The session id is unknown or the session has already exited.
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// The channel to the session host broke.
    #[error("Session transport failed: {0}")]
    Transport(String),
}

impl From<PtyError> for SessionError {
    fn from(err: PtyError) -> Self {
        Self::Spawn(err.to_string())
    }
}

/// Parameters for starting a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Shell to run (None = configured or user default).
    pub shell: Option<String>,
    /// Working directory (None = home directory).
    pub cwd: Option<PathBuf>,
    /// Initial columns.
    pub cols: u16,
    /// Initial rows.
    pub rows: u16,
}

impl SpawnRequest {
    /// Creates a request for the default shell at the given size.
    #[must_use]
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            shell: None,
            cwd: None,
            cols,
            rows,
        }
    }

    /// Sets the shell.
    #[must_use]
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Description of a started session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: SessionId,
    /// OS process id of the shell, when known.
    pub process_id: Option<u32>,
    /// Columns the PTY was opened with.
    pub cols: u16,
    /// Rows the PTY was opened with.
    pub rows: u16,
}

/// Anything that can host sessions for a pane manager.
///
/// Implemented by the in-process [`SessionManager`] and by
/// [`crate::protocol::RemoteSessions`], which talks to a host process.
pub trait SessionBackend {
    /// Starts a session.
    ///
    /// # Errors
    /// Returns [`SessionError::Spawn`] if the shell cannot be started.
    fn create(&mut self, request: &SpawnRequest) -> Result<SessionInfo, SessionError>;

    /// Forwards input bytes to a session without waiting for the process.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for unknown or exited sessions.
    fn write(&mut self, id: SessionId, data: &[u8]) -> Result<(), SessionError>;

    /// Updates a session's terminal size.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for unknown or exited sessions.
    fn resize(&mut self, id: SessionId, cols: u16, rows: u16) -> Result<(), SessionError>;

    /// Terminates a session. The id is no longer tracked afterwards.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for unknown or exited sessions.
    fn kill(&mut self, id: SessionId) -> Result<(), SessionError>;

    /// Returns the next pending notification without blocking.
    fn poll_event(&mut self) -> Option<SessionEvent>;

    /// Returns the session's current working directory, if determinable.
    fn working_dir(&self, _id: SessionId) -> Option<PathBuf> {
        None
    }
}

/// A tracked session.
struct SessionEntry {
    info: SessionInfo,
    cwd: PathBuf,
    pty: Pty,
}

/// Owns a pool of PTY sessions.
pub struct SessionManager {
    /// Live sessions, keyed by id.
    sessions: HashMap<SessionId, SessionEntry>,
    /// Next id to hand out.
    next_id: SessionId,
    /// Shell used when a request names none.
    default_shell: Option<String>,
    /// Producer side of the event channel, cloned into every PTY.
    event_tx: Sender<SessionEvent>,
    /// Consumer side, until detached with [`Self::take_events`].
    events: Option<SessionEvents>,
}

impl SessionManager {
    /// Creates an empty manager that uses the user's shell by default.
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        Self {
            sessions: HashMap::new(),
            next_id: 1,
            default_shell: None,
            event_tx,
            events: Some(SessionEvents::new(event_rx)),
        }
    }

    /// Creates a manager with a configured default shell.
    #[must_use]
    pub fn with_default_shell(shell: Option<String>) -> Self {
        let mut manager = Self::new();
        manager.default_shell = shell;
        manager
    }

    /// Detaches the event stream so a dedicated thread can block on it.
    ///
    /// After this, [`SessionBackend::poll_event`] on the manager returns
    /// nothing.
    pub fn take_events(&mut self) -> Option<SessionEvents> {
        self.events.take()
    }

    /// Returns the number of tracked sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Lists tracked session ids in ascending order.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns information about a live session.
    #[must_use]
    pub fn info(&self, id: SessionId) -> Option<&SessionInfo> {
        self.sessions
            .get(&id)
            .filter(|entry| !entry.pty.has_exited())
            .map(|entry| &entry.info)
    }

    /// Returns a live session's current size.
    #[must_use]
    pub fn size(&self, id: SessionId) -> Option<(u16, u16)> {
        self.sessions
            .get(&id)
            .filter(|entry| !entry.pty.has_exited())
            .map(|entry| (entry.pty.cols(), entry.pty.rows()))
    }

    /// Forgets sessions whose process has exited on its own.
    ///
    /// Returns the number of sessions removed.
    pub fn reap(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| !entry.pty.has_exited());
        before - self.sessions.len()
    }

    /// Kills every session. Returns the number killed.
    pub fn kill_all(&mut self) -> usize {
        let mut killed = 0;
        for (id, mut entry) in self.sessions.drain() {
            if entry.pty.kill() {
                debug!("Killed session {}", id);
                killed += 1;
            }
        }
        killed
    }

    /// Looks up a session, forgetting it first if it has exited.
    fn live_entry(&mut self, id: SessionId) -> Option<&mut SessionEntry> {
        if self
            .sessions
            .get(&id)
            .is_some_and(|entry| entry.pty.has_exited())
        {
            self.sessions.remove(&id);
            debug!("Forgot exited session {}", id);
        }
        self.sessions.get_mut(&id)
    }

    fn resolve_shell(&self, request: &SpawnRequest) -> String {
        request
            .shell
            .clone()
            .or_else(|| self.default_shell.clone())
            .unwrap_or_else(shell::default_shell)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for SessionManager {
    fn create(&mut self, request: &SpawnRequest) -> Result<SessionInfo, SessionError> {
        let shell = self.resolve_shell(request);
        let cwd = request.cwd.clone().unwrap_or_else(shell::default_working_dir);

        if is_path_like(&shell) && !Path::new(&shell).is_file() {
            warn!("Refusing to spawn missing shell: {}", shell);
            return Err(SessionError::Spawn(format!("shell not found: {}", shell)));
        }
        if !cwd.is_dir() {
            warn!("Refusing to spawn in missing directory: {}", cwd.display());
            return Err(SessionError::Spawn(format!(
                "working directory not found: {}",
                cwd.display()
            )));
        }

        let id = self.next_id;
        self.next_id += 1;

        let config = PtyConfig::new(&shell)
            .working_dir(&cwd)
            .size(request.cols, request.rows);
        let pty = Pty::spawn(id, &config, self.event_tx.clone()).map_err(|e| {
            warn!("Failed to spawn {} for session {}: {}", shell, id, e);
            SessionError::from(e)
        })?;

        let info = SessionInfo {
            id,
            process_id: pty.pid(),
            cols: pty.cols(),
            rows: pty.rows(),
        };
        info!(
            "Created session {} ({} in {}, {}x{})",
            id,
            shell,
            cwd.display(),
            info.cols,
            info.rows
        );
        self.sessions.insert(
            id,
            SessionEntry {
                info: info.clone(),
                cwd,
                pty,
            },
        );
        Ok(info)
    }

    fn write(&mut self, id: SessionId, data: &[u8]) -> Result<(), SessionError> {
        let Some(entry) = self.live_entry(id) else {
            warn!("Write to unknown session {} ignored", id);
            return Err(SessionError::NotFound(id));
        };
        entry.pty.write(data).map_err(|e| {
            warn!("Write to session {} failed: {}", id, e);
            SessionError::NotFound(id)
        })
    }

    fn resize(&mut self, id: SessionId, cols: u16, rows: u16) -> Result<(), SessionError> {
        let Some(entry) = self.live_entry(id) else {
            debug!("Resize of unknown session {} ignored", id);
            return Err(SessionError::NotFound(id));
        };
        entry.pty.resize(cols, rows).map_err(|e| {
            debug!("Resize of session {} failed: {}", id, e);
            SessionError::NotFound(id)
        })
    }

    fn kill(&mut self, id: SessionId) -> Result<(), SessionError> {
        let Some(mut entry) = self.sessions.remove(&id) else {
            debug!("Kill of unknown session {}", id);
            return Err(SessionError::NotFound(id));
        };
        if entry.pty.kill() {
            info!("Killed session {}", id);
            Ok(())
        } else {
            debug!("Session {} had already exited", id);
            Err(SessionError::NotFound(id))
        }
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        let event = self.events.as_mut()?.try_next()?;
        if let SessionEvent::Exit { id, .. } = &event {
            self.sessions.remove(id);
        }
        Some(event)
    }

    fn working_dir(&self, id: SessionId) -> Option<PathBuf> {
        let entry = self.sessions.get(&id)?;
        entry
            .pty
            .current_working_dir()
            .or_else(|| Some(entry.cwd.clone()))
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let killed = self.kill_all();
        if killed > 0 {
            debug!("Killed {} session(s) on shutdown", killed);
        }
    }
}

/// Returns true if the shell names a path rather than a bare command.
fn is_path_like(shell: &str) -> bool {
    shell.contains('/') || shell.contains('\\')
}
