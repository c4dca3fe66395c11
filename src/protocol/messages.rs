//! Protocol message types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::session::{SessionEvent, SessionId, SessionInfo, SpawnRequest};

/// Correlates a request with its reply.
pub type RequestId = u64;

/// Messages sent by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    /// Start a session. Answered by `created` or `create_failed`.
    Create {
        /// Echoed in the reply.
        request_id: RequestId,
        /// Shell to run (absent = host default).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
        /// Working directory (absent = home directory).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
        /// Initial columns.
        cols: u16,
        /// Initial rows.
        rows: u16,
    },
    /// Input for a session. Not answered.
    Write {
        /// Target session.
        session_id: SessionId,
        /// Raw bytes.
        data: Vec<u8>,
    },
    /// New terminal size. Not answered.
    Resize {
        /// Target session.
        session_id: SessionId,
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },
    /// Terminate a session. Answered by `kill_result`.
    Kill {
        /// Echoed in the reply.
        request_id: RequestId,
        /// Target session.
        session_id: SessionId,
    },
}

impl ControllerMessage {
    /// Builds a `create` message from a spawn request.
    #[must_use]
    pub fn create(request_id: RequestId, request: &SpawnRequest) -> Self {
        Self::Create {
            request_id,
            shell: request.shell.clone(),
            cwd: request.cwd.clone(),
            cols: request.cols,
            rows: request.rows,
        }
    }
}

/// Messages sent by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// A session was started.
    Created {
        /// From the `create` request.
        request_id: RequestId,
        /// New session id.
        session_id: SessionId,
        /// OS process id, when known.
        process_id: Option<u32>,
        /// Columns the PTY was opened with.
        cols: u16,
        /// Rows the PTY was opened with.
        rows: u16,
    },
    /// A session could not be started.
    CreateFailed {
        /// From the `create` request.
        request_id: RequestId,
        /// Why.
        error: String,
    },
    /// Output of a session.
    Data {
        /// Source session.
        session_id: SessionId,
        /// Raw bytes.
        data: Vec<u8>,
    },
    /// A session exited. Sent once per session.
    Exit {
        /// The session.
        session_id: SessionId,
        /// Exit code, when known.
        code: Option<u32>,
        /// Terminating signal, when known.
        signal: Option<String>,
    },
    /// Outcome of a `kill` request.
    KillResult {
        /// From the `kill` request.
        request_id: RequestId,
        /// Whether a live session was killed.
        success: bool,
        /// Why not, on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HostMessage {
    /// Builds a `created` reply.
    #[must_use]
    pub fn created(request_id: RequestId, info: &SessionInfo) -> Self {
        Self::Created {
            request_id,
            session_id: info.id,
            process_id: info.process_id,
            cols: info.cols,
            rows: info.rows,
        }
    }

    /// Returns the request this message answers, if it is a reply.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Created { request_id, .. }
            | Self::CreateFailed { request_id, .. }
            | Self::KillResult { request_id, .. } => Some(*request_id),
            Self::Data { .. } | Self::Exit { .. } => None,
        }
    }

    /// Converts a streamed message into a session event.
    #[must_use]
    pub fn into_event(self) -> Option<SessionEvent> {
        match self {
            Self::Data { session_id, data } => Some(SessionEvent::Output {
                id: session_id,
                data,
            }),
            Self::Exit {
                session_id,
                code,
                signal,
            } => Some(SessionEvent::Exit {
                id: session_id,
                code,
                signal,
            }),
            _ => None,
        }
    }
}

impl From<SessionEvent> for HostMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Output { id, data } => Self::Data {
                session_id: id,
                data,
            },
            SessionEvent::Exit { id, code, signal } => Self::Exit {
                session_id: id,
                code,
                signal,
            },
        }
    }
}
