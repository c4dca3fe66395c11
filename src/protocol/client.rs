//! Controller side of the protocol.
//!
//! [`RemoteSessions`] implements [`SessionBackend`] by talking to a
//! [`super::Host`]. A reader thread turns the host's stream into session
//! events and hands replies to whichever call is waiting for them. If the
//! connection breaks, every session still alive is reported as exited.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::ProtocolError;
use super::messages::{ControllerMessage, HostMessage, RequestId};
use super::transport::{MessageReader, MessageWriter};
use crate::session::{
    SessionBackend, SessionError, SessionEvent, SessionEvents, SessionId, SessionInfo,
    SpawnRequest,
};

/// State shared with the reader thread.
struct Shared {
    /// Calls waiting for a reply, by request id.
    pending: Mutex<HashMap<RequestId, Sender<HostMessage>>>,
    /// Sessions created and not yet exited or killed.
    live: Mutex<HashSet<SessionId>>,
    /// Sessions created after their request timed out; killed on the next call.
    orphans: Mutex<Vec<SessionId>>,
    /// False once the transport has failed.
    connected: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            live: Mutex::new(HashSet::new()),
            orphans: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    fn is_live(&self, id: SessionId) -> bool {
        lock(&self.live).contains(&id)
    }

    /// Marks the connection dead and reports every live session as exited.
    fn fail(&self, events: &Sender<SessionEvent>) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        // Dropping the senders wakes every waiting call.
        lock(&self.pending).clear();
        let mut live: Vec<SessionId> = lock(&self.live).drain().collect();
        live.sort_unstable();
        warn!(
            "Host connection lost, {} session(s) reported as exited",
            live.len()
        );
        for id in live {
            let _ = events.send(SessionEvent::Exit {
                id,
                code: None,
                signal: None,
            });
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sessions hosted by another process.
pub struct RemoteSessions<W: Write> {
    writer: MessageWriter<W>,
    shared: Arc<Shared>,
    event_tx: Sender<SessionEvent>,
    events: SessionEvents,
    next_request: RequestId,
    timeout: Duration,
    reader_thread: Option<JoinHandle<()>>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl<W: Write> RemoteSessions<W> {
    /// Starts talking to a host over a reader/writer pair.
    ///
    /// `timeout` bounds how long `create` and `kill` wait for their reply.
    ///
    /// # Errors
    /// Returns error if the reader thread cannot be started.
    pub fn connect<R>(reader: R, writer: W, timeout: Duration) -> Result<Self, ProtocolError>
    where
        R: BufRead + Send + 'static,
    {
        let shared = Arc::new(Shared::new());
        let (event_tx, event_rx) = mpsc::channel();

        let reader_thread = {
            let shared = Arc::clone(&shared);
            let event_tx = event_tx.clone();
            thread::Builder::new()
                .name("panemux-client-reader".to_string())
                .spawn(move || read_loop(MessageReader::new(reader), &shared, &event_tx))?
        };

        Ok(Self {
            writer: MessageWriter::new(writer),
            shared,
            event_tx,
            events: SessionEvents::new(event_rx),
            next_request: 1,
            timeout,
            reader_thread: Some(reader_thread),
            on_drop: None,
        })
    }

    /// Checks if the connection to the host is still up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Returns the number of sessions believed alive.
    pub fn live_count(&self) -> usize {
        lock(&self.shared.live).len()
    }

    fn send(&mut self, message: &ControllerMessage) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Transport("not connected".to_string()));
        }
        if let Err(e) = self.writer.send(message) {
            self.shared.fail(&self.event_tx);
            return Err(SessionError::Transport(e.to_string()));
        }
        Ok(())
    }

    /// Sends a request and waits for its reply.
    fn request(
        &mut self,
        request_id: RequestId,
        message: &ControllerMessage,
    ) -> Result<HostMessage, SessionError> {
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.pending).insert(request_id, tx);

        if let Err(e) = self.send(message) {
            lock(&self.shared.pending).remove(&request_id);
            return Err(e);
        }

        match rx.recv_timeout(self.timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.shared.pending).remove(&request_id);
                let millis = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!("Request {} timed out", request_id);
                Err(SessionError::Transport(
                    ProtocolError::Timeout(millis).to_string(),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::Transport(
                ProtocolError::Closed.to_string(),
            )),
        }
    }

    fn allocate_request(&mut self) -> RequestId {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    /// Kills sessions whose `created` reply arrived after the caller gave up.
    fn kill_orphans(&mut self) {
        let orphans: Vec<SessionId> = lock(&self.shared.orphans).drain(..).collect();
        for session_id in orphans {
            let request_id = self.allocate_request();
            debug!("Killing orphaned session {}", session_id);
            let _ = self.send(&ControllerMessage::Kill {
                request_id,
                session_id,
            });
        }
    }
}

#[cfg(unix)]
impl RemoteSessions<std::os::unix::net::UnixStream> {
    /// Connects to a host listening on a Unix socket.
    ///
    /// # Errors
    /// Returns error if the socket cannot be reached.
    pub fn connect_unix(path: &std::path::Path, timeout: Duration) -> Result<Self, ProtocolError> {
        use std::io::BufReader;
        use std::net::Shutdown;
        use std::os::unix::net::UnixStream;

        let stream = UnixStream::connect(path)?;
        let read_half = stream.try_clone()?;
        let closer = stream.try_clone()?;

        let mut sessions = Self::connect(BufReader::new(read_half), stream, timeout)?;
        sessions.on_drop = Some(Box::new(move || {
            let _ = closer.shutdown(Shutdown::Both);
        }));
        info!("Connected to host at {}", path.display());
        Ok(sessions)
    }
}

impl<W: Write> SessionBackend for RemoteSessions<W> {
    fn create(&mut self, request: &SpawnRequest) -> Result<SessionInfo, SessionError> {
        self.kill_orphans();
        let request_id = self.allocate_request();
        let reply = self.request(request_id, &ControllerMessage::create(request_id, request))?;
        match reply {
            HostMessage::Created {
                session_id,
                process_id,
                cols,
                rows,
                ..
            } => Ok(SessionInfo {
                id: session_id,
                process_id,
                cols,
                rows,
            }),
            HostMessage::CreateFailed { error, .. } => Err(SessionError::Spawn(error)),
            other => Err(SessionError::Transport(format!(
                "unexpected reply to create: {other:?}"
            ))),
        }
    }

    fn write(&mut self, id: SessionId, data: &[u8]) -> Result<(), SessionError> {
        if !self.shared.is_live(id) {
            warn!("Write to unknown session {} ignored", id);
            return Err(SessionError::NotFound(id));
        }
        self.send(&ControllerMessage::Write {
            session_id: id,
            data: data.to_vec(),
        })
    }

    fn resize(&mut self, id: SessionId, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !self.shared.is_live(id) {
            return Err(SessionError::NotFound(id));
        }
        self.send(&ControllerMessage::Resize {
            session_id: id,
            cols,
            rows,
        })
    }

    fn kill(&mut self, id: SessionId) -> Result<(), SessionError> {
        if !self.shared.is_live(id) {
            return Err(SessionError::NotFound(id));
        }
        let request_id = self.allocate_request();
        let reply = self.request(
            request_id,
            &ControllerMessage::Kill {
                request_id,
                session_id: id,
            },
        )?;
        lock(&self.shared.live).remove(&id);
        match reply {
            HostMessage::KillResult { success: true, .. } => Ok(()),
            HostMessage::KillResult { .. } => Err(SessionError::NotFound(id)),
            other => Err(SessionError::Transport(format!(
                "unexpected reply to kill: {other:?}"
            ))),
        }
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.try_next()
    }
}

impl<W: Write> Drop for RemoteSessions<W> {
    fn drop(&mut self) {
        if let Some(close) = self.on_drop.take() {
            close();
        }
        // The reader ends with the stream; don't block on it here.
        let _ = self.reader_thread.take();
    }
}

/// Dispatches the host's messages until the stream ends.
fn read_loop<R: BufRead>(
    mut reader: MessageReader<R>,
    shared: &Shared,
    events: &Sender<SessionEvent>,
) {
    loop {
        match reader.read::<HostMessage>() {
            Ok(Some(message)) => dispatch(message, shared, events),
            Ok(None) => {
                debug!("Host closed the connection");
                break;
            }
            Err(ProtocolError::Json(e)) => {
                warn!("Ignoring malformed host message: {}", e);
            }
            Err(e) => {
                warn!("Host connection failed: {}", e);
                break;
            }
        }
    }
    shared.fail(events);
}

fn dispatch(message: HostMessage, shared: &Shared, events: &Sender<SessionEvent>) {
    if let Some(request_id) = message.request_id() {
        let waiter = lock(&shared.pending).remove(&request_id);
        if let HostMessage::Created { session_id, .. } = &message {
            if waiter.is_some() {
                lock(&shared.live).insert(*session_id);
            } else {
                warn!("Late reply for request {}, session {} orphaned", request_id, session_id);
                lock(&shared.orphans).push(*session_id);
            }
        }
        match waiter {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!("Dropping reply to abandoned request {}", request_id),
        }
        return;
    }

    if let HostMessage::Exit { session_id, .. } = &message {
        lock(&shared.live).remove(session_id);
    }
    if let Some(event) = message.into_event() {
        let _ = events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_routes_replies_and_events() {
        let shared = Shared::new();
        let (event_tx, event_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        lock(&shared.pending).insert(1, reply_tx);

        dispatch(
            HostMessage::Created {
                request_id: 1,
                session_id: 5,
                process_id: None,
                cols: 80,
                rows: 24,
            },
            &shared,
            &event_tx,
        );
        assert!(matches!(
            reply_rx.try_recv(),
            Ok(HostMessage::Created { session_id: 5, .. })
        ));
        assert!(shared.is_live(5));

        dispatch(
            HostMessage::Data {
                session_id: 5,
                data: b"x".to_vec(),
            },
            &shared,
            &event_tx,
        );
        assert_eq!(
            event_rx.try_recv().ok(),
            Some(SessionEvent::Output {
                id: 5,
                data: b"x".to_vec()
            })
        );
    }

    #[test]
    fn test_late_created_becomes_orphan() {
        let shared = Shared::new();
        let (event_tx, _event_rx) = mpsc::channel();

        dispatch(
            HostMessage::Created {
                request_id: 9,
                session_id: 3,
                process_id: None,
                cols: 1,
                rows: 1,
            },
            &shared,
            &event_tx,
        );

        assert!(!shared.is_live(3));
        assert_eq!(*lock(&shared.orphans), vec![3]);
    }

    #[test]
    fn test_fail_reports_live_sessions_once() {
        let shared = Shared::new();
        let (event_tx, event_rx) = mpsc::channel();
        lock(&shared.live).extend([2, 1]);

        shared.fail(&event_tx);
        shared.fail(&event_tx);

        let ids: Vec<SessionId> = event_rx.try_iter().map(|e| e.session_id()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(!shared.connected.load(Ordering::SeqCst));
    }
}
