//! Ingest-to-disk pipeline.
//!
//! A broker-owned thread delivers messages into the delivery closure, which
//! timestamps them, copies them into owned storage and pushes them onto the
//! SPSC ring. A dedicated writer thread drains the ring in batches and
//! appends to the container. The callback side never blocks and never does
//! I/O; everything that can go wrong there is absorbed into counters.
//!
//! Multiple recorders can run in one process: the delivery closure owns its
//! ring producer and a handle to the shared state, so there is no global
//! registry to collide in.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bus::{Bus, DeliveryFn, Subscription};
use crate::clock::MonotonicClock;
use crate::control::{RecordControl, RecorderStats};
use crate::message::Message;
use crate::ring::{self, Consumer};
use crate::writer::{CaptureWriter, ContainerWriter};
use crate::{Error, Result};

/// Ring capacity used when the caller passes 0.
pub const DEFAULT_RING_CAPACITY: usize = 10_000;
/// Records drained per writer-loop pass before flushing.
const BATCH_SIZE: usize = 100;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_PAUSED: u8 = 2;
const STATE_STOPPING: u8 = 3;
const STATE_STOPPED: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Created,
    Running,
    Paused,
    Stopping,
    Stopped,
}

struct Shared {
    state: AtomicU8,
    received: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    bytes_written: AtomicU64,
    overflow: AtomicBool,
    clock: MonotonicClock,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CREATED),
            received: AtomicU64::new(0),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            overflow: AtomicBool::new(false),
            clock: MonotonicClock::new(),
        }
    }
}

/// Records every message matching a subject pattern into a container file.
pub struct Recorder {
    shared: Arc<Shared>,
    bus: Arc<dyn Bus>,
    pattern: String,
    producer: Option<ring::Producer<Message>>,
    consumer: Option<ring::Consumer<Message>>,
    writer: Option<Box<dyn ContainerWriter>>,
    subscription: Option<Box<dyn Subscription>>,
    writer_task: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Creates a recorder writing the native container to `output_path`.
    /// The file exists with its header written when this returns.
    /// `capacity` of 0 selects [`DEFAULT_RING_CAPACITY`].
    pub fn create(
        bus: Arc<dyn Bus>,
        subject_pattern: &str,
        output_path: impl AsRef<Path>,
        capacity: usize,
    ) -> Result<Self> {
        let writer = Box::new(CaptureWriter::create(output_path)?);
        Self::with_writer(bus, subject_pattern, writer, capacity)
    }

    /// Creates a recorder over an already-open container backend. Alternate
    /// backends pick their own default capacity before calling this.
    pub fn with_writer(
        bus: Arc<dyn Bus>,
        subject_pattern: &str,
        writer: Box<dyn ContainerWriter>,
        capacity: usize,
    ) -> Result<Self> {
        if subject_pattern.is_empty() {
            return Err(Error::BadArgs("subject pattern must not be empty"));
        }
        let capacity = if capacity == 0 {
            DEFAULT_RING_CAPACITY
        } else {
            capacity
        };
        let (producer, consumer) = ring::channel(capacity);
        Ok(Self {
            shared: Arc::new(Shared::new()),
            bus,
            pattern: subject_pattern.to_string(),
            producer: Some(producer),
            consumer: Some(consumer),
            writer: Some(writer),
            subscription: None,
            writer_task: None,
        })
    }

    pub fn state(&self) -> RecorderState {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_CREATED => RecorderState::Created,
            STATE_RUNNING => RecorderState::Running,
            STATE_PAUSED => RecorderState::Paused,
            STATE_STOPPING => RecorderState::Stopping,
            _ => RecorderState::Stopped,
        }
    }

    /// Requests shutdown without waiting. A single atomic store, safe to
    /// call from a signal handler; follow up with [`stop`](Self::stop) from
    /// a normal context to join the writer task.
    pub fn request_stop(&self) {
        self.shared.state.fetch_max(STATE_STOPPING, Ordering::AcqRel);
    }

    fn delivery_closure(&mut self) -> DeliveryFn {
        let shared = Arc::clone(&self.shared);
        let mut producer = self
            .producer
            .take()
            .expect("ring producer consumed before start");
        Box::new(move |subject, payload| {
            shared.received.fetch_add(1, Ordering::Relaxed);
            if shared.state.load(Ordering::Acquire) != STATE_RUNNING {
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let received_ns = shared.clock.now_ns();
            let Some(msg) = Message::try_copy(subject, payload, received_ns) else {
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            };
            if producer.push(msg).is_err() {
                shared.overflow.store(true, Ordering::Relaxed);
                shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
        })
    }
}

impl RecordControl for Recorder {
    fn start(&mut self) -> Result<()> {
        if self.shared.state.load(Ordering::Acquire) != STATE_CREATED {
            return Err(Error::BadArgs("recorder already started"));
        }
        let delivery = self.delivery_closure();
        let consumer = self.consumer.take().expect("ring consumer consumed");
        let writer = self.writer.take().expect("container writer consumed");

        // Running before subscribing, so the first delivery is not dropped.
        self.shared.state.store(STATE_RUNNING, Ordering::Release);

        let mut subscription = match self.bus.subscribe(&self.pattern, delivery) {
            Ok(sub) => sub,
            Err(err) => {
                self.shared.state.store(STATE_STOPPED, Ordering::Release);
                return Err(err);
            }
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("capture-writer".to_string())
            .spawn(move || writer_loop(&shared, consumer, writer));
        match spawned {
            Ok(handle) => {
                self.writer_task = Some(handle);
                self.subscription = Some(subscription);
                Ok(())
            }
            Err(err) => {
                if let Err(err) = subscription.unsubscribe() {
                    log::warn!("unsubscribe after failed start: {err}");
                }
                self.shared.state.store(STATE_STOPPED, Ordering::Release);
                Err(Error::TaskSpawnFailed(err))
            }
        }
    }

    fn pause(&self) {
        let _ = self.shared.state.compare_exchange(
            STATE_RUNNING,
            STATE_PAUSED,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    fn resume(&self) {
        let _ = self.shared.state.compare_exchange(
            STATE_PAUSED,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    fn is_paused(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_PAUSED
    }

    fn stop(&mut self) -> Result<()> {
        // Tear the subscription down before signalling the writer, so no
        // delivery can land in the ring after the writer saw it empty.
        if let Some(mut subscription) = self.subscription.take() {
            if let Err(err) = subscription.unsubscribe() {
                log::warn!("unsubscribe failed: {err}");
            }
        }
        self.shared.state.fetch_max(STATE_STOPPING, Ordering::AcqRel);
        if let Some(handle) = self.writer_task.take() {
            if handle.join().is_err() {
                log::warn!("capture writer task panicked");
            }
        }
        self.shared.state.store(STATE_STOPPED, Ordering::Release);
        Ok(())
    }

    fn stats(&self) -> RecorderStats {
        RecorderStats {
            messages_received: self.shared.received.load(Ordering::Relaxed),
            messages_written: self.shared.written.load(Ordering::Relaxed),
            messages_dropped: self.shared.dropped.load(Ordering::Relaxed),
            bytes_written: self.shared.bytes_written.load(Ordering::Relaxed),
            buffer_overflow: self.shared.overflow.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn writer_loop(
    shared: &Shared,
    mut consumer: Consumer<Message>,
    mut writer: Box<dyn ContainerWriter>,
) {
    loop {
        let mut drained = 0;
        while drained < BATCH_SIZE {
            let Some(msg) = consumer.pop() else { break };
            drained += 1;
            match writer.write(&msg) {
                Ok(bytes) => {
                    shared.written.fetch_add(1, Ordering::Relaxed);
                    shared.bytes_written.fetch_add(bytes, Ordering::Relaxed);
                }
                // Not retried; the recording keeps going.
                Err(err) => log::warn!("record write failed: {err}"),
            }
        }
        if drained > 0 {
            if let Err(err) = writer.flush() {
                log::warn!("capture flush failed: {err}");
            }
        } else {
            // Empty ring after a stop request means every accepted message
            // is on disk; only then may the task exit.
            if shared.state.load(Ordering::Acquire) >= STATE_STOPPING {
                break;
            }
            thread::sleep(IDLE_SLEEP);
        }
    }
    if let Err(err) = writer.flush() {
        log::warn!("final capture flush failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use tempfile::tempdir;

    fn test_recorder(capacity: usize) -> (Recorder, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let bus = Arc::new(MemoryBus::new());
        let recorder =
            Recorder::create(bus, "t.>", dir.path().join("capture.zet"), capacity).expect("create");
        (recorder, dir)
    }

    #[test]
    fn create_rejects_empty_pattern() {
        let dir = tempdir().expect("tempdir");
        let bus = Arc::new(MemoryBus::new());
        let result = Recorder::create(bus, "", dir.path().join("capture.zet"), 0);
        assert!(matches!(result, Err(Error::BadArgs(_))));
    }

    #[test]
    fn create_surfaces_open_failure() {
        let bus = Arc::new(MemoryBus::new());
        let result = Recorder::create(bus, "t", "/definitely/not/a/dir/capture.zet", 0);
        assert!(matches!(result, Err(Error::OpenFailed { .. })));
    }

    #[test]
    fn start_is_valid_from_created_only() {
        let (mut recorder, _dir) = test_recorder(0);
        assert_eq!(recorder.state(), RecorderState::Created);
        recorder.start().expect("start");
        assert_eq!(recorder.state(), RecorderState::Running);
        assert!(matches!(recorder.start(), Err(Error::BadArgs(_))));
        recorder.stop().expect("stop");
        assert_eq!(recorder.state(), RecorderState::Stopped);
    }

    #[test]
    fn stop_is_safe_before_start_and_twice() {
        let (mut recorder, _dir) = test_recorder(0);
        recorder.stop().expect("stop");
        recorder.stop().expect("stop again");
        assert_eq!(recorder.state(), RecorderState::Stopped);
        assert_eq!(recorder.stats(), RecorderStats::default());
    }

    #[test]
    fn pause_and_resume_flip_the_live_state() {
        let (mut recorder, _dir) = test_recorder(0);
        recorder.start().expect("start");
        assert!(!recorder.is_paused());
        recorder.pause();
        assert!(recorder.is_paused());
        recorder.resume();
        assert!(!recorder.is_paused());
        recorder.stop().expect("stop");
        // Pause has no effect once stopped.
        recorder.pause();
        assert!(!recorder.is_paused());
    }

    #[test]
    fn request_stop_then_stop_joins_cleanly() {
        let (mut recorder, _dir) = test_recorder(0);
        recorder.start().expect("start");
        recorder.request_stop();
        assert_eq!(recorder.state(), RecorderState::Stopping);
        recorder.stop().expect("stop");
        assert_eq!(recorder.state(), RecorderState::Stopped);
    }
}
