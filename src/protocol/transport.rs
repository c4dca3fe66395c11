//! Newline-delimited JSON framing and the Unix socket listener.

use std::io::{BufRead, ErrorKind, Write};
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use super::ProtocolError;

/// Socket file name inside the runtime directory.
const SOCKET_NAME: &str = "panemux.sock";

/// Returns the default host socket path.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(|| std::env::var_os("TMPDIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(SOCKET_NAME)
}

/// Reads one JSON message per line.
pub struct MessageReader<R: BufRead> {
    reader: R,
    line: String,
    open: bool,
}

impl<R: BufRead> MessageReader<R> {
    /// Wraps a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            open: true,
        }
    }

    /// Reads the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. Blank lines
    /// are skipped. A malformed line yields [`ProtocolError::Json`] and
    /// the reader stays usable.
    ///
    /// # Errors
    /// Returns error on I/O failure or an undecodable line.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        loop {
            if !self.open {
                return Ok(None);
            }
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.open = false;
                    return Ok(None);
                }
                Ok(_) => {
                    let trimmed = self.line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    trace!("<- {}", trimmed);
                    return serde_json::from_str(trimmed)
                        .map(Some)
                        .map_err(ProtocolError::from);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.open = false;
                    return Err(ProtocolError::Transport(e));
                }
            }
        }
    }

    /// Checks if the stream is still open.
    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// Writes one JSON message per line.
pub struct MessageWriter<W: Write> {
    writer: W,
}

impl<W: Write> MessageWriter<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes and flushes a message.
    ///
    /// # Errors
    /// Returns error if encoding or writing fails.
    pub fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let mut line = serde_json::to_vec(message)?;
        trace!("-> {}", String::from_utf8_lossy(&line));
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(unix)]
pub use unix::HostListener;

#[cfg(unix)]
mod unix {
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::{Path, PathBuf};

    use tracing::{debug, error, info};

    use super::ProtocolError;

    /// Unix socket a host accepts controllers on.
    pub struct HostListener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl HostListener {
        /// Binds the socket with owner-only permissions.
        ///
        /// A leftover socket file nobody listens on is replaced; a live one
        /// is an error.
        ///
        /// # Errors
        /// Returns error if another host is listening or binding fails.
        pub fn bind(path: &Path) -> Result<Self, ProtocolError> {
            if path.exists() {
                if UnixStream::connect(path).is_ok() {
                    return Err(ProtocolError::Transport(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("a host is already listening on {}", path.display()),
                    )));
                }
                debug!("Removing stale socket file: {}", path.display());
                let _ = std::fs::remove_file(path);
            }

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let listener = UnixListener::bind(path)?;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
            info!("Host listening on {}", path.display());

            Ok(Self {
                listener,
                path: path.to_path_buf(),
            })
        }

        /// Returns the socket path.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Waits for the next controller.
        ///
        /// # Errors
        /// Returns error if accepting fails.
        pub fn accept(&self) -> Result<UnixStream, ProtocolError> {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    debug!("Controller connected");
                    Ok(stream)
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    Err(ProtocolError::Transport(e))
                }
            }
        }
    }

    impl Drop for HostListener {
        fn drop(&mut self) {
            if self.path.exists() {
                debug!("Removing socket file: {}", self.path.display());
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ControllerMessage, HostMessage};
    use std::io::{BufReader, Cursor};

    #[test]
    fn test_read_messages_skipping_blank_lines() {
        let input = b"{\"type\":\"kill\",\"request_id\":1,\"session_id\":2}\n\n{\"type\":\"resize\",\"session_id\":2,\"cols\":3,\"rows\":4}\n";
        let mut reader = MessageReader::new(BufReader::new(Cursor::new(input.to_vec())));

        let first: Option<ControllerMessage> = reader.read().unwrap();
        assert_eq!(
            first,
            Some(ControllerMessage::Kill {
                request_id: 1,
                session_id: 2
            })
        );
        let second: Option<ControllerMessage> = reader.read().unwrap();
        assert!(matches!(second, Some(ControllerMessage::Resize { cols: 3, .. })));
        let end: Option<ControllerMessage> = reader.read().unwrap();
        assert!(end.is_none());
        assert!(!reader.is_open());
    }

    #[test]
    fn test_malformed_line_is_recoverable() {
        let input = b"not json\n{\"type\":\"exit\",\"session_id\":1,\"code\":null,\"signal\":null}\n";
        let mut reader = MessageReader::new(BufReader::new(Cursor::new(input.to_vec())));

        let bad = reader.read::<HostMessage>();
        assert!(matches!(bad, Err(ProtocolError::Json(_))));
        let good = reader.read::<HostMessage>().unwrap();
        assert!(matches!(good, Some(HostMessage::Exit { session_id: 1, .. })));
    }

    #[test]
    fn test_writer_frames_with_newline() {
        let mut writer = MessageWriter::new(Vec::new());
        writer
            .send(&ControllerMessage::Resize {
                session_id: 1,
                cols: 80,
                rows: 24,
            })
            .unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_default_socket_path_name() {
        assert!(default_socket_path().ends_with(SOCKET_NAME));
    }

    #[cfg(unix)]
    #[test]
    fn test_listener_replaces_stale_socket_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.sock");
        std::fs::write(&path, b"").unwrap();

        let listener = HostListener::bind(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(mode.mode() & 0o777, 0o600);

        assert!(HostListener::bind(&path).is_err());
        drop(listener);
        assert!(!path.exists());
    }
}
