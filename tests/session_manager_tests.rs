//! Tests for the PTY-backed session manager.
//!
//! Note: These tests spawn real shells and need `/bin/sh`.

#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use panemux::layout::{LayoutSettings, PaneLaunch, Rect, SplitDirection};
use panemux::pane::PaneManager;
use panemux::session::{
    KILLED_SIGNAL, SessionBackend, SessionError, SessionEvent, SessionId, SessionManager,
    SpawnRequest,
};

const WAIT: Duration = Duration::from_secs(10);

fn sh(cols: u16, rows: u16) -> SpawnRequest {
    SpawnRequest::new(cols, rows).shell("/bin/sh")
}

/// Polls until `done` accepts an event, collecting everything seen.
fn wait_for(
    manager: &mut SessionManager,
    mut done: impl FnMut(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        match manager.poll_event() {
            Some(event) => {
                let finished = done(&event);
                seen.push(event);
                if finished {
                    return seen;
                }
            }
            None => thread::sleep(Duration::from_millis(10)),
        }
    }
    panic!("timed out; saw {seen:?}");
}

/// Drains events for a short while.
fn drain(manager: &mut SessionManager, period: Duration) -> Vec<SessionEvent> {
    let deadline = Instant::now() + period;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        match manager.poll_event() {
            Some(event) => seen.push(event),
            None => thread::sleep(Duration::from_millis(10)),
        }
    }
    seen
}

fn output_of(events: &[SessionEvent], id: SessionId) -> String {
    let bytes: Vec<u8> = events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Output { id: source, data } if *source == id => Some(data.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    String::from_utf8_lossy(&bytes).to_string()
}

fn exits_of(events: &[SessionEvent], id: SessionId) -> usize {
    events
        .iter()
        .filter(|event| event.is_exit() && event.session_id() == id)
        .count()
}

/// Test that a session echoes what it is sent.
#[test]
fn test_echo_round_trip() {
    let mut manager = SessionManager::new();
    let info = manager.create(&sh(80, 24)).expect("spawn /bin/sh");
    assert_eq!(info.id, 1);
    assert_eq!((info.cols, info.rows), (80, 24));

    manager
        .write(info.id, b"echo panemux_$((20 + 22))\n")
        .expect("write");

    let mut text = String::new();
    wait_for(&mut manager, |event| {
        if let SessionEvent::Output { data, .. } = event {
            text.push_str(&String::from_utf8_lossy(data));
        }
        text.contains("panemux_42")
    });
}

/// Test that resizing a live session updates its size.
#[test]
fn test_resize_live_session() {
    let mut manager = SessionManager::new();
    let info = manager.create(&sh(80, 24)).expect("spawn");

    manager.resize(info.id, 100, 40).expect("resize");

    assert_eq!(manager.size(info.id), Some((100, 40)));
    assert!(matches!(
        manager.resize(999, 10, 10),
        Err(SessionError::NotFound(999))
    ));
}

/// Test that killing twice reports NotFound and the exit arrives once.
#[test]
fn test_kill_is_final() {
    let mut manager = SessionManager::new();
    let info = manager.create(&sh(80, 24)).expect("spawn");

    assert!(manager.kill(info.id).is_ok());
    assert!(matches!(
        manager.kill(info.id),
        Err(SessionError::NotFound(_))
    ));
    assert!(matches!(
        manager.write(info.id, b"x"),
        Err(SessionError::NotFound(_))
    ));

    let events = wait_for(&mut manager, SessionEvent::is_exit);
    match events.last() {
        Some(SessionEvent::Exit { signal, .. }) => {
            assert_eq!(signal.as_deref(), Some(KILLED_SIGNAL));
        }
        other => panic!("expected exit, got {other:?}"),
    }
    let later = drain(&mut manager, Duration::from_millis(300));
    assert_eq!(exits_of(&later, info.id), 0);
    assert_eq!(manager.session_count(), 0);
}

/// Reads the command name of a live process.
#[cfg(target_os = "linux")]
fn process_name(pid: u32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|name| name.trim().to_string())
}

/// Test that kill terminates a process that ignores hangups.
#[test]
#[cfg(target_os = "linux")]
fn test_kill_terminates_hangup_ignoring_process() {
    let mut manager = SessionManager::new();
    let info = manager.create(&sh(80, 24)).expect("spawn");
    let pid = info.process_id.expect("pid");

    manager
        .write(info.id, b"trap '' HUP; exec sleep 30\n")
        .expect("write");
    let deadline = Instant::now() + WAIT;
    while process_name(pid).as_deref() != Some("sleep") {
        assert!(Instant::now() < deadline, "shell never became sleep");
        thread::sleep(Duration::from_millis(10));
    }

    manager.kill(info.id).expect("kill");

    let deadline = Instant::now() + Duration::from_secs(5);
    while Path::new(&format!("/proc/{pid}")).exists() {
        assert!(Instant::now() < deadline, "process {pid} survived kill");
        thread::sleep(Duration::from_millis(20));
    }
    let events = drain(&mut manager, Duration::from_millis(200));
    assert_eq!(exits_of(&events, info.id), 1);
}

/// Test that a shell exiting on its own is reported with its code.
#[test]
fn test_spontaneous_exit() {
    let mut manager = SessionManager::new();
    let info = manager.create(&sh(80, 24)).expect("spawn");

    manager.write(info.id, b"exit 3\n").expect("write");
    let events = wait_for(&mut manager, SessionEvent::is_exit);

    assert_eq!(exits_of(&events, info.id), 1);
    match events.last() {
        Some(SessionEvent::Exit { code, .. }) => assert_eq!(*code, Some(3)),
        other => panic!("expected exit, got {other:?}"),
    }
    assert!(matches!(
        manager.write(info.id, b"echo\n"),
        Err(SessionError::NotFound(_))
    ));
    assert!(matches!(
        manager.kill(info.id),
        Err(SessionError::NotFound(_))
    ));
}

/// Test that session ids are never reused.
#[test]
fn test_ids_are_not_reused() {
    let mut manager = SessionManager::new();
    let first = manager.create(&sh(80, 24)).expect("spawn").id;
    manager.kill(first).expect("kill");
    let second = manager.create(&sh(80, 24)).expect("spawn").id;

    assert!(second > first);
    assert_eq!(manager.list_sessions(), vec![second]);
}

/// Test that each session's output stays with that session.
#[test]
fn test_outputs_do_not_mix() {
    let mut manager = SessionManager::new();
    let a = manager.create(&sh(80, 24)).expect("spawn a").id;
    let b = manager.create(&sh(80, 24)).expect("spawn b").id;

    manager.write(a, b"echo alpha_$((1 + 1))\n").expect("write a");
    manager.write(b, b"echo beta_$((2 + 2))\n").expect("write b");

    let mut seen = Vec::new();
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        seen.extend(drain(&mut manager, Duration::from_millis(100)));
        if output_of(&seen, a).contains("alpha_2") && output_of(&seen, b).contains("beta_4") {
            break;
        }
    }

    assert!(output_of(&seen, a).contains("alpha_2"));
    assert!(!output_of(&seen, a).contains("beta_4"));
    assert!(output_of(&seen, b).contains("beta_4"));
    assert!(!output_of(&seen, b).contains("alpha_2"));
}

/// Test that a session reports the directory it was started in.
#[test]
fn test_working_dir_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut manager = SessionManager::new();
    let info = manager
        .create(&sh(80, 24).cwd(dir.path()))
        .expect("spawn");

    let reported = manager.working_dir(info.id).expect("cwd");
    assert_eq!(
        reported.canonicalize().expect("canonical cwd"),
        dir.path().canonicalize().expect("canonical tempdir")
    );
    assert_eq!(manager.working_dir(999), None);
}

/// Test that a missing shell is rejected without consuming an id.
#[test]
fn test_missing_shell() {
    let mut manager = SessionManager::new();
    let result = manager.create(&SpawnRequest::new(80, 24).shell("/bin/bad-shell"));
    assert!(matches!(result, Err(SessionError::Spawn(_))));

    let info = manager.create(&sh(80, 24)).expect("spawn");
    assert_eq!(info.id, 1);
}

/// Test pane geometry reaching real PTYs.
#[test]
fn test_pane_manager_sizes_real_ptys() {
    if !Path::new("/bin/sh").exists() {
        return;
    }
    let mut panes = PaneManager::new(
        SessionManager::with_default_shell(Some("/bin/sh".to_string())),
        LayoutSettings::default(),
    );
    let (tab, a) = panes
        .create_tab(
            Rect::new(0.0, 0.0, 80.0, 24.0),
            PaneLaunch::default(),
            Box::new(NullDisplay),
        )
        .expect("tab");
    let b = panes
        .split_pane(tab, a, SplitDirection::Vertical, Box::new(NullDisplay))
        .expect("split");

    let session_a = panes.session_of(tab, a).unwrap();
    let session_b = panes.session_of(tab, b).unwrap();
    assert_eq!(panes.backend().size(session_a), Some((80, 12)));
    assert_eq!(panes.backend().size(session_b), Some((80, 12)));

    panes.close_pane(tab, a).expect("close");
    assert_eq!(panes.backend().size(session_b), Some((80, 24)));
    assert_eq!(panes.backend().session_count(), 1);
}

struct NullDisplay;

impl panemux::pane::DisplayConsumer for NullDisplay {
    fn on_output(&mut self, _data: &[u8]) {}
    fn set_size(&mut self, _cols: u16, _rows: u16) {}
}
