//! In-memory session backend and display for exercising the pane manager
//! without spawning processes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use panemux::pane::DisplayConsumer;
use panemux::session::{
    SessionBackend, SessionError, SessionEvent, SessionId, SessionInfo, SpawnRequest,
};

/// Shell name the fake backend refuses to start.
pub const BAD_SHELL: &str = "/bin/bad-shell";

/// A call made on the fake backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(SpawnRequest),
    Write(SessionId, Vec<u8>),
    Resize(SessionId, u16, u16),
    Kill(SessionId),
}

#[derive(Default)]
struct FakeState {
    next_id: SessionId,
    live: HashSet<SessionId>,
    calls: Vec<Call>,
    events: VecDeque<SessionEvent>,
    cwds: HashMap<SessionId, PathBuf>,
    fail_creates: usize,
}

/// Session backend that records every call. Clones share state, so a test
/// can keep one while the pane manager owns another.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Makes the next `count` creates fail.
    pub fn fail_next_creates(&self, count: usize) {
        self.state().fail_creates = count;
    }

    /// Sets what `working_dir` reports for a session.
    pub fn set_cwd(&self, id: SessionId, cwd: impl Into<PathBuf>) {
        self.state().cwds.insert(id, cwd.into());
    }

    /// Queues output for a session.
    pub fn push_output(&self, id: SessionId, data: &[u8]) {
        self.state().events.push_back(SessionEvent::Output {
            id,
            data: data.to_vec(),
        });
    }

    /// Simulates a session exiting on its own.
    pub fn push_exit(&self, id: SessionId, code: Option<u32>) {
        let mut state = self.state();
        state.live.remove(&id);
        state.events.push_back(SessionEvent::Exit {
            id,
            code,
            signal: None,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn creates(&self) -> Vec<SpawnRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn kills(&self) -> Vec<SessionId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Kill(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn resizes(&self) -> Vec<(SessionId, u16, u16)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Resize(id, cols, rows) => Some((id, cols, rows)),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(SessionId, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Write(id, data) => Some((id, data)),
                _ => None,
            })
            .collect()
    }

    pub fn live_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.state().live.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl SessionBackend for FakeBackend {
    fn create(&mut self, request: &SpawnRequest) -> Result<SessionInfo, SessionError> {
        let mut state = self.state();
        state.calls.push(Call::Create(request.clone()));
        if request.shell.as_deref() == Some(BAD_SHELL) {
            return Err(SessionError::Spawn(format!("shell not found: {BAD_SHELL}")));
        }
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(SessionError::Spawn("injected failure".to_string()));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id);
        Ok(SessionInfo {
            id,
            process_id: Some(1000 + id as u32),
            cols: request.cols,
            rows: request.rows,
        })
    }

    fn write(&mut self, id: SessionId, data: &[u8]) -> Result<(), SessionError> {
        let mut state = self.state();
        if !state.live.contains(&id) {
            return Err(SessionError::NotFound(id));
        }
        state.calls.push(Call::Write(id, data.to_vec()));
        Ok(())
    }

    fn resize(&mut self, id: SessionId, cols: u16, rows: u16) -> Result<(), SessionError> {
        let mut state = self.state();
        state.calls.push(Call::Resize(id, cols, rows));
        if state.live.contains(&id) {
            Ok(())
        } else {
            Err(SessionError::NotFound(id))
        }
    }

    fn kill(&mut self, id: SessionId) -> Result<(), SessionError> {
        let mut state = self.state();
        state.calls.push(Call::Kill(id));
        if state.live.remove(&id) {
            Ok(())
        } else {
            Err(SessionError::NotFound(id))
        }
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.state().events.pop_front()
    }

    fn working_dir(&self, id: SessionId) -> Option<PathBuf> {
        self.state().cwds.get(&id).cloned()
    }
}

/// Everything a display was told.
#[derive(Debug, Default)]
pub struct DisplayLog {
    pub output: Vec<u8>,
    pub sizes: Vec<(u16, u16)>,
    pub exits: Vec<(Option<u32>, Option<String>)>,
    pub disposed: bool,
}

impl DisplayLog {
    pub fn last_size(&self) -> Option<(u16, u16)> {
        self.sizes.last().copied()
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }
}

/// Display that records into a shared log.
pub struct RecordingDisplay {
    log: Arc<Mutex<DisplayLog>>,
}

impl RecordingDisplay {
    /// Returns the boxed display and a handle on its log.
    pub fn create() -> (Box<dyn DisplayConsumer>, Arc<Mutex<DisplayLog>>) {
        let log = Arc::new(Mutex::new(DisplayLog::default()));
        (
            Box::new(Self {
                log: Arc::clone(&log),
            }),
            log,
        )
    }
}

impl DisplayConsumer for RecordingDisplay {
    fn on_output(&mut self, data: &[u8]) {
        self.log.lock().unwrap().output.extend_from_slice(data);
    }

    fn set_size(&mut self, cols: u16, rows: u16) {
        self.log.lock().unwrap().sizes.push((cols, rows));
    }

    fn on_exit(&mut self, code: Option<u32>, signal: Option<&str>) {
        self.log
            .lock()
            .unwrap()
            .exits
            .push((code, signal.map(str::to_string)));
    }

    fn dispose(&mut self) {
        self.log.lock().unwrap().disposed = true;
    }
}
