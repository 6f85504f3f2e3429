//! # Playback Core
//!
//! Replay engine for multi-channel recordings.
//!
//! A recording directory holds one file per channel. Each file is parsed
//! into timestamped records, and every channel re-emits its records in
//! real time (or faster, or slower) against one shared virtual clock:
//!
//! - **Clock**: rate-scaled mapping from recording time to wall time
//! - **Emitters**: one pacing thread per channel, with drop/duplicate accounting
//! - **Loader**: concurrent per-file parsing with aggregate load reports
//! - **Session**: transport commands, time specs, bookmarks and the region loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use playback_core::{MemoryPublisher, PlaybackConfig, PlaybackSession};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let publisher = Arc::new(MemoryPublisher::new());
//! let mut session = PlaybackSession::new(PlaybackConfig::default(), publisher).unwrap();
//! let report = session.load(Path::new("/data/run1")).unwrap();
//! if let Some(message) = report.message() {
//!     eprintln!("{}", message);
//! }
//! session.set_rate(2.0).unwrap();
//! session.start().unwrap();
//! ```

pub mod bookmarks;
pub mod clock;
pub mod communication;
pub mod config;
pub mod emitter;
pub mod error;
pub mod loader;
pub mod recording;
pub mod session;
pub mod timespec;

pub use bookmarks::{Bookmark, BookmarkSet};
pub use clock::{ClockEvent, VirtualClock};
pub use communication::{ChannelPublisher, LogPublisher, MemoryPublisher};
pub use config::PlaybackConfig;
pub use emitter::{ChannelEmitter, EmitterEvent, EmitterStats};
pub use error::{PlaybackError, PlaybackResult};
pub use loader::{LoadCoordinator, LoadEvent, LoadOutcome, LoadReport, LoadWorker};
pub use recording::{Record, RecordingWriter};
pub use session::{PlaybackSession, RegionAction, SessionStatus};
pub use timespec::TimeSpec;
