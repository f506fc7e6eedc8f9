//! Control surfaces the CLI and other drivers program against.
//!
//! Any capture or replay backend exposes these two traits; the drivers never
//! depend on a concrete backend type.

use crate::Result;

/// Snapshot of a recording session. Counters are monotonic and may be read
/// while recording is live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub messages_received: u64,
    pub messages_written: u64,
    pub messages_dropped: u64,
    pub bytes_written: u64,
    /// Whether the ring ever rejected a message. Sticky; distinct from
    /// `messages_dropped` so a saturated writer is distinguishable from
    /// paused-interval drops.
    pub buffer_overflow: bool,
}

/// Snapshot of a playback session.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlayerStats {
    pub total_messages: u64,
    pub current_message: u64,
    pub messages_published: u64,
    /// Current speed multiplier; 0 means unthrottled.
    pub speed: f64,
    /// Capture span between the first and last recorded message.
    pub duration_ns: u64,
    /// Offset of the current message from the start of the capture.
    pub position_ns: u64,
}

/// Driver-facing surface of a recording backend.
pub trait RecordControl {
    /// Installs the subscription and starts the writer task. Valid from the
    /// created state only.
    fn start(&mut self) -> Result<()>;
    /// Stops persisting while keeping the subscription live; deliveries are
    /// counted and dropped until resumed.
    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;
    /// Tears the subscription down and returns once the writer task has
    /// drained the ring and released the file.
    fn stop(&mut self) -> Result<()>;
    fn stats(&self) -> RecorderStats;
}

/// Driver-facing surface of a playback backend.
pub trait PlaybackControl {
    /// Clamped to `[0, 10]`; 0 means unthrottled. Progress is continuous
    /// across a change.
    fn set_speed(&self, speed: f64);
    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;
    fn is_finished(&self) -> bool;
    /// Publishes the pending message immediately, without waiting for its
    /// deadline.
    fn skip_next(&self);
    /// Moves the cursor by `delta` messages, clamped to the capture.
    fn seek(&self, delta: i64);
    /// Publishes the current message and advances exactly one step.
    fn step(&self) -> Result<()>;
    fn stats(&self) -> PlayerStats;
}
