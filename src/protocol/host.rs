//! Session host: serves one controller with its own session manager.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::ProtocolError;
use super::messages::{ControllerMessage, HostMessage};
use super::transport::{MessageReader, MessageWriter};
use crate::session::{SessionBackend, SessionEvents, SessionManager, SpawnRequest};

/// How long the event pump waits before re-checking for shutdown.
const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Serves session requests from one controller.
pub struct Host {
    manager: Arc<Mutex<SessionManager>>,
}

impl Host {
    /// Creates a host whose sessions default to `default_shell`.
    #[must_use]
    pub fn new(default_shell: Option<String>) -> Self {
        Self::with_manager(SessionManager::with_default_shell(default_shell))
    }

    /// Creates a host around an existing manager.
    #[must_use]
    pub fn with_manager(manager: SessionManager) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
        }
    }

    /// Returns the number of sessions the host still tracks.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock_manager().session_count()
    }

    fn lock_manager(&self) -> MutexGuard<'_, SessionManager> {
        self.manager.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serves the controller until it disconnects.
    ///
    /// Session output and exits are streamed by a pump thread while this
    /// thread answers requests. The pump forgets a session as soon as its
    /// exit is forwarded. When the controller goes away every session it
    /// created is killed.
    ///
    /// # Errors
    /// Returns error if the event stream was already detached or the pump
    /// thread cannot be started.
    pub fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), ProtocolError>
    where
        R: BufRead,
        W: Write + Send + 'static,
    {
        let events = self.lock_manager().take_events().ok_or_else(|| {
            ProtocolError::Protocol("session events already detached".to_string())
        })?;
        let writer = Arc::new(Mutex::new(MessageWriter::new(writer)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let pump = {
            let writer = Arc::clone(&writer);
            let shutdown = Arc::clone(&shutdown);
            let manager = Arc::clone(&self.manager);
            thread::Builder::new()
                .name("panemux-host-pump".to_string())
                .spawn(move || pump_events(events, &*writer, &manager, &shutdown))?
        };

        info!("Controller session started");
        let mut reader = MessageReader::new(reader);
        loop {
            match reader.read::<ControllerMessage>() {
                Ok(Some(message)) => {
                    if !self.handle(message, &*writer) {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Controller closed the connection");
                    break;
                }
                Err(ProtocolError::Json(e)) => {
                    warn!("Ignoring malformed message: {}", e);
                }
                Err(e) => {
                    warn!("Controller connection failed: {}", e);
                    break;
                }
            }
        }

        let killed = self.lock_manager().kill_all();
        info!("Controller gone, killed {} session(s)", killed);
        shutdown.store(true, Ordering::SeqCst);
        if pump.join().is_err() {
            error!("Host event pump panicked");
        }
        Ok(())
    }

    /// Handles one request. Returns false once the reply channel is broken.
    fn handle(
        &self,
        message: ControllerMessage,
        writer: &Mutex<MessageWriter<impl Write>>,
    ) -> bool {
        // Lock order is manager, then writer. The pump never holds both.
        let mut manager = self.lock_manager();
        match message {
            ControllerMessage::Create {
                request_id,
                shell,
                cwd,
                cols,
                rows,
            } => {
                let request = SpawnRequest {
                    shell,
                    cwd,
                    cols,
                    rows,
                };
                // Hold the writer so no output of the new session can
                // overtake the reply announcing it.
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                let reply = match manager.create(&request) {
                    Ok(info) => HostMessage::created(request_id, &info),
                    Err(e) => HostMessage::CreateFailed {
                        request_id,
                        error: e.to_string(),
                    },
                };
                send(&mut *writer, &reply)
            }
            ControllerMessage::Write { session_id, data } => {
                // Failures are logged by the manager; exits report themselves.
                let _ = manager.write(session_id, &data);
                true
            }
            ControllerMessage::Resize {
                session_id,
                cols,
                rows,
            } => {
                let _ = manager.resize(session_id, cols, rows);
                true
            }
            ControllerMessage::Kill {
                request_id,
                session_id,
            } => {
                let reply = match manager.kill(session_id) {
                    Ok(()) => HostMessage::KillResult {
                        request_id,
                        success: true,
                        error: None,
                    },
                    Err(e) => HostMessage::KillResult {
                        request_id,
                        success: false,
                        error: Some(e.to_string()),
                    },
                };
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                send(&mut *writer, &reply)
            }
        }
    }
}

fn send(writer: &mut MessageWriter<impl Write>, message: &HostMessage) -> bool {
    match writer.send(message) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to reply to controller: {}", e);
            false
        }
    }
}

/// Forwards session events to the controller until shutdown, reaping each
/// session once its exit has been sent.
fn pump_events<W: Write>(
    mut events: SessionEvents,
    writer: &Mutex<MessageWriter<W>>,
    manager: &Mutex<SessionManager>,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let Some(event) = events.next_timeout(PUMP_POLL_INTERVAL) else {
            if events.is_closed() {
                break;
            }
            continue;
        };
        let exited = event.is_exit();
        let message = HostMessage::from(event);
        let sent = writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(&message);
        if let Err(e) = sent {
            debug!("Event pump stopping: {}", e);
            break;
        }
        if exited {
            let reaped = manager
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .reap();
            if reaped > 0 {
                debug!("Reaped {} exited session(s)", reaped);
            }
        }
    }
}
