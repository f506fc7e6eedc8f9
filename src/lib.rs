//! Capture and timed replay of pub/sub bus traffic.
//!
//! Recording path: broker callback thread → SPSC ring → writer thread →
//! container file. Playback path: container file → in-memory schedule →
//! per-subject publishers, with pause/seek/speed control throughout.

pub mod bus;
pub mod clock;
pub mod control;
pub mod error;
pub mod header;
pub mod message;
pub mod player;
pub mod reader;
pub mod recorder;
pub mod ring;
pub mod writer;

#[cfg(feature = "cli")]
pub mod cli;

pub use control::{PlaybackControl, PlayerStats, RecordControl, RecorderStats};
pub use error::{Error, Result};
pub use header::CaptureHeader;
pub use message::Message;
pub use player::{Player, PlayerState};
pub use reader::{CaptureReader, ContainerReader};
pub use recorder::{Recorder, RecorderState};
pub use writer::{CaptureWriter, ContainerWriter};
