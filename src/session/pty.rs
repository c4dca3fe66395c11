//! PTY (pseudo-terminal) process handles using portable-pty.
//!
//! Each [`Pty`] owns one shell attached to a pseudoterminal. A reader
//! thread forwards the shell's output into the session event channel and
//! reaps the child when the terminal closes; a writer thread drains input
//! so callers never block on a full PTY buffer.
//!
//! Killing a session hangs up the terminal first and escalates to SIGKILL
//! if the process is still alive after a short grace period.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use thiserror::Error;
use tracing::{debug, warn};

use super::SessionId;
use super::events::SessionEvent;

/// Maximum read buffer size.
const READ_BUFFER_SIZE: usize = 4096;

/// How often the reader thread checks whether a hung-up child is reapable.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signal name reported for sessions terminated through [`Pty::kill`].
pub const KILLED_SIGNAL: &str = "SIGKILL";

/// Child process shared between the handle and its reader thread.
type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

/// PTY error type.
#[derive(Debug, Error)]
pub enum PtyError {
    /// Failed to create PTY.
    #[error("Failed to create PTY: {0}")]
    Creation(String),

    /// Failed to spawn process.
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// PTY is closed.
    #[error("PTY is closed")]
    Closed,
}

/// PTY configuration.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Shell to spawn.
    pub shell: String,
    /// Arguments to the shell.
    pub args: Vec<String>,
    /// Environment variables to set.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub working_dir: Option<PathBuf>,
    /// Number of columns.
    pub cols: u16,
    /// Number of rows.
    pub rows: u16,
}

impl PtyConfig {
    /// Creates a configuration for the given shell with an 80x24 terminal.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            args: Vec::new(),
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            working_dir: None,
            cols: 80,
            rows: 24,
        }
    }

    /// Sets the arguments.
    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the dimensions. Zero is raised to one.
    #[must_use]
    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols.max(1);
        self.rows = rows.max(1);
        self
    }
}

/// A shell process attached to a pseudoterminal.
pub struct Pty {
    /// Session this PTY belongs to.
    id: SessionId,
    /// Master PTY handle.
    master: Box<dyn MasterPty + Send>,
    /// Input queue drained by the writer thread.
    input_tx: Option<Sender<Vec<u8>>>,
    /// Child process, also polled by the reader thread for its status.
    child: SharedChild,
    /// Session event channel.
    events: Sender<SessionEvent>,
    /// Set once an exit notification has been claimed.
    exited: Arc<AtomicBool>,
    /// Reader thread handle.
    reader_thread: Option<JoinHandle<()>>,
    /// Writer thread handle.
    writer_thread: Option<JoinHandle<()>>,
    /// Process ID.
    pid: Option<u32>,
    /// Current columns.
    cols: u16,
    /// Current rows.
    rows: u16,
}

impl Pty {
    /// Spawns a shell in a new PTY.
    ///
    /// Output and the final exit status of the shell are sent to `events`
    /// tagged with `id`.
    ///
    /// # Errors
    /// Returns error if PTY creation or process spawning fails.
    pub fn spawn(
        id: SessionId,
        config: &PtyConfig,
        events: Sender<SessionEvent>,
    ) -> Result<Self, PtyError> {
        let cols = config.cols.max(1);
        let rows = config.rows.max(1);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Creation(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.shell);
        for arg in &config.args {
            cmd.arg(arg);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &config.working_dir {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        // The slave end belongs to the child now.
        drop(pair.slave);

        let pid = child.process_id();
        let child: SharedChild = Arc::new(Mutex::new(child));

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Io(std::io::Error::other(e)))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Io(std::io::Error::other(e)))?;

        let exited = Arc::new(AtomicBool::new(false));
        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>();

        let writer_thread = thread::Builder::new()
            .name(format!("pty-writer-{id}"))
            .spawn(move || write_loop(id, writer, &input_rx))?;

        let reader_events = events.clone();
        let reader_exited = Arc::clone(&exited);
        let reader_child = Arc::clone(&child);
        let reader_thread = thread::Builder::new()
            .name(format!("pty-reader-{id}"))
            .spawn(move || read_loop(id, reader, &reader_child, &reader_events, &reader_exited))?;

        debug!("Spawned PTY for session {} (pid {:?})", id, pid);

        Ok(Self {
            id,
            master: pair.master,
            input_tx: Some(input_tx),
            child,
            events,
            exited,
            reader_thread: Some(reader_thread),
            writer_thread: Some(writer_thread),
            pid,
            cols,
            rows,
        })
    }

    /// Returns the number of columns.
    #[must_use]
    pub const fn cols(&self) -> u16 {
        self.cols
    }

    /// Returns the number of rows.
    #[must_use]
    pub const fn rows(&self) -> u16 {
        self.rows
    }

    /// Returns the process ID.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns true once the process has exited or been killed.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Returns the current working directory of the shell process.
    #[must_use]
    pub fn current_working_dir(&self) -> Option<PathBuf> {
        self.pid.and_then(process_cwd)
    }

    /// Queues bytes for the shell's input. Never blocks.
    ///
    /// # Errors
    /// Returns error if the process has exited.
    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if self.has_exited() {
            return Err(PtyError::Closed);
        }
        let tx = self.input_tx.as_ref().ok_or(PtyError::Closed)?;
        tx.send(data.to_vec()).map_err(|_| PtyError::Closed)
    }

    /// Resizes the PTY.
    ///
    /// # Errors
    /// Returns error if the process has exited or the resize fails.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if self.has_exited() {
            return Err(PtyError::Closed);
        }
        let cols = cols.max(1);
        let rows = rows.max(1);

        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Io(std::io::Error::other(e)))?;

        self.cols = cols;
        self.rows = rows;
        Ok(())
    }

    /// Kills the process and reports its exit.
    ///
    /// The child gets SIGHUP first. One that survives the grace period
    /// (for instance because it ignores hangups) is sent SIGKILL, so the
    /// process is gone or about to be reaped when this returns.
    ///
    /// Returns false if the process had already exited, in which case its
    /// exit was reported by the reader thread.
    pub fn kill(&mut self) -> bool {
        if self.exited.swap(true, Ordering::SeqCst) {
            return false;
        }
        {
            let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
            // portable-pty escalates from SIGHUP to SIGKILL on its own.
            if let Err(e) = child.kill() {
                // Usually means the child died between the check and the kill.
                debug!("Kill of session {} failed: {}", self.id, e);
            }
        }
        self.input_tx = None;
        let _ = self.events.send(SessionEvent::Exit {
            id: self.id,
            code: None,
            signal: Some(KILLED_SIGNAL.to_string()),
        });
        true
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        self.kill();
        // Don't block on join during drop - threads end with the process
        let _ = self.reader_thread.take();
        let _ = self.writer_thread.take();
    }
}

fn write_loop(
    id: SessionId,
    mut writer: Box<dyn Write + Send>,
    input_rx: &mpsc::Receiver<Vec<u8>>,
) {
    while let Ok(data) = input_rx.recv() {
        let result = writer.write_all(&data).and_then(|()| writer.flush());
        if let Err(e) = result {
            debug!("PTY writer for session {} stopped: {}", id, e);
            break;
        }
    }
}

fn read_loop(
    id: SessionId,
    mut reader: Box<dyn Read + Send>,
    child: &Mutex<Box<dyn Child + Send + Sync>>,
    events: &Sender<SessionEvent>,
    exited: &AtomicBool,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let data = buffer[..n].to_vec();
                if events.send(SessionEvent::Output { id, data }).is_err() {
                    break;
                }
            }
            Err(e) => {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                // EIO is how Linux reports a closed terminal
                debug!("PTY reader for session {} stopped: {}", id, e);
                break;
            }
        }
    }

    let status = reap_child(child);
    if exited.swap(true, Ordering::SeqCst) {
        return;
    }
    let (code, signal) = match status {
        Ok(status) => (
            Some(status.exit_code()),
            status.signal().map(str::to_string),
        ),
        Err(e) => {
            warn!("Failed to reap session {}: {}", id, e);
            (None, None)
        }
    };
    let _ = events.send(SessionEvent::Exit { id, code, signal });
}

/// Waits for the child without holding its lock, so a concurrent kill can
/// still reach it.
fn reap_child(
    child: &Mutex<Box<dyn Child + Send + Sync>>,
) -> std::io::Result<portable_pty::ExitStatus> {
    loop {
        let polled = child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_wait()?;
        if let Some(status) = polled {
            return Ok(status);
        }
        thread::sleep(REAP_POLL_INTERVAL);
    }
}

/// Gets the current working directory of a process by PID.
///
/// On Linux, this reads the /proc/<pid>/cwd symlink.
#[cfg(target_os = "linux")]
fn process_cwd(pid: u32) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{}/cwd", pid)).ok()
}

/// Gets the current working directory of a process by PID.
///
/// Returns `None` where the OS offers no cheap lookup.
#[cfg(not(target_os = "linux"))]
fn process_cwd(_pid: u32) -> Option<PathBuf> {
    None
}
