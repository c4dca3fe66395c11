//! panemux
//!
//! A terminal multiplexer core: a pool of PTY-backed shell sessions and,
//! per tab, a binary split tree of panes whose geometry drives the size of
//! each pane's terminal.
//!
//! # Architecture
//!
//! - **Session Module**: spawns shells on PTYs and streams their output
//! - **Layout Module**: split tree, pane geometry, focus and snapshots
//! - **Pane Module**: the façade binding panes to sessions and displays
//! - **Protocol Module**: newline-delimited JSON between a session host and
//!   a controller, for running shells in a separate process
//!
//! # Usage
//!
//! ```no_run
//! use panemux::layout::{LayoutSettings, PaneLaunch, Rect};
//! use panemux::pane::{DisplayConsumer, PaneManager};
//! use panemux::session::SessionManager;
//!
//! struct Stdout;
//!
//! impl DisplayConsumer for Stdout {
//!     fn on_output(&mut self, data: &[u8]) {
//!         print!("{}", String::from_utf8_lossy(data));
//!     }
//!     fn set_size(&mut self, _cols: u16, _rows: u16) {}
//! }
//!
//! let mut panes = PaneManager::new(SessionManager::new(), LayoutSettings::default());
//! let area = Rect::new(0.0, 0.0, 80.0, 24.0);
//! let (tab, _pane) = panes
//!     .create_tab(area, PaneLaunch::default(), Box::new(Stdout))
//!     .expect("failed to start shell");
//! panes.send_input(tab, b"echo hello\n").expect("tab exists");
//! let _ = panes.pump_events();
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::similar_names)]

pub mod config;
pub mod layout;
pub mod logging;
pub mod pane;
pub mod protocol;
pub mod session;

// Re-export main types
pub use config::Config;
pub use layout::{LayoutEngine, LayoutError, LayoutSettings, LayoutSnapshot};
pub use pane::{DisplayConsumer, PaneError, PaneEvent, PaneManager};
pub use protocol::{Host, ProtocolError, RemoteSessions};
pub use session::{SessionBackend, SessionError, SessionEvent, SessionManager};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
