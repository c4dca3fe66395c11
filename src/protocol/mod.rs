//! Streaming protocol between a session host and a controller.
//!
//! The host is the process allowed to spawn shells; the controller runs
//! the pane manager. They exchange newline-delimited JSON messages tagged
//! by `type`:
//!
//! ```text
//! controller -> host   create, write, resize, kill
//! host -> controller   created | create_failed, kill_result, data, exit
//! ```
//!
//! `create` and `kill` carry a `request_id` echoed in their reply. `data`
//! and `exit` stream asynchronously; `exit` is sent once per session.

pub mod client;
pub mod host;
pub mod messages;
pub mod transport;

use thiserror::Error;

pub use client::RemoteSessions;
pub use host::Host;
pub use messages::{ControllerMessage, HostMessage, RequestId};
pub use transport::{MessageReader, MessageWriter, default_socket_path};

#[cfg(unix)]
pub use transport::HostListener;

/// Protocol error type.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error on the underlying stream.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A message could not be encoded or decoded.
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer closed the connection.
    #[error("Connection closed")]
    Closed,

    /// No reply arrived in time.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The peer broke the protocol.
    #[error("Protocol violation: {0}")]
    Protocol(String),
}
