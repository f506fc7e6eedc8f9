//! Playback scheduler.
//!
//! The whole capture is loaded up front. Message `i` is due at
//! `anchor + offset_i / speed`, where `offset_i` is its distance from the
//! first captured timestamp and the anchor pins capture time to the
//! monotonic clock. Every discontinuity (resume, seek, speed change, skip)
//! re-pins the anchor so progress is continuous from the current message.
//!
//! The schedule waits in short slices and re-derives the deadline each
//! slice, so control calls from another thread take effect within a
//! millisecond rather than at the next message boundary.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::bus::{Bus, Publisher};
use crate::clock::MonotonicClock;
use crate::control::{PlaybackControl, PlayerStats};
use crate::message::Message;
use crate::reader::{CaptureReader, ContainerReader};
use crate::{Error, Result};

pub const MAX_SPEED: f64 = 10.0;
const WAIT_SLICE: Duration = Duration::from_millis(1);

const STATE_LOADED: u8 = 0;
const STATE_PLAYING: u8 = 1;
const STATE_PAUSED: u8 = 2;
const STATE_FINISHED: u8 = 3;
const STATE_CANCELLED: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Loaded,
    Playing,
    Paused,
    Finished,
    Cancelled,
}

/// Cursor and timing state, mutated together so a control call can move the
/// cursor and re-pin the anchor as one step.
struct Transport {
    index: usize,
    anchor_ns: i64,
    pause_begin_ns: u64,
    speed: f64,
}

/// Replays a loaded capture onto the bus with the recorded inter-arrival
/// timing, scaled by a speed multiplier.
pub struct Player {
    bus: Arc<dyn Bus>,
    messages: Vec<Message>,
    duration_ns: u64,
    capture_start_ns: u64,
    state: AtomicU8,
    cancel_flag: AtomicBool,
    skip_flag: AtomicBool,
    published: AtomicU64,
    transport: Mutex<Transport>,
    publishers: Mutex<HashMap<String, Box<dyn Publisher>>>,
    clock: MonotonicClock,
}

impl Player {
    /// Loads the capture at `input_path` fully into memory. A speed of 0 or
    /// below means unthrottled.
    pub fn create(bus: Arc<dyn Bus>, input_path: impl AsRef<Path>, speed: f64) -> Result<Self> {
        let mut reader = CaptureReader::open(input_path)?;
        Self::with_reader(bus, &mut reader, speed)
    }

    /// Loads from an already-open container backend.
    pub fn with_reader(
        bus: Arc<dyn Bus>,
        reader: &mut dyn ContainerReader,
        speed: f64,
    ) -> Result<Self> {
        let mut messages = Vec::new();
        while let Some(msg) = reader.next()? {
            messages.push(msg);
        }
        let duration_ns = match (messages.first(), messages.last()) {
            (Some(first), Some(last)) => last.received_ns - first.received_ns,
            _ => 0,
        };
        let speed = if speed > 0.0 { speed } else { 0.0 };
        Ok(Self {
            bus,
            messages,
            duration_ns,
            capture_start_ns: reader.start_time_ns(),
            state: AtomicU8::new(STATE_LOADED),
            cancel_flag: AtomicBool::new(false),
            skip_flag: AtomicBool::new(false),
            published: AtomicU64::new(0),
            transport: Mutex::new(Transport {
                index: 0,
                anchor_ns: 0,
                pause_begin_ns: 0,
                speed,
            }),
            publishers: Mutex::new(HashMap::new()),
            clock: MonotonicClock::new(),
        })
    }

    pub fn state(&self) -> PlayerState {
        match self.state.load(Ordering::Acquire) {
            STATE_LOADED => PlayerState::Loaded,
            STATE_PLAYING => PlayerState::Playing,
            STATE_PAUSED => PlayerState::Paused,
            STATE_FINISHED => PlayerState::Finished,
            _ => PlayerState::Cancelled,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Monotonic timestamp the capture file was started at.
    pub fn capture_start_ns(&self) -> u64 {
        self.capture_start_ns
    }

    /// Requests a cooperative stop; the schedule observes it within a slice.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Release);
    }

    /// Drives the schedule until the capture is exhausted or cancelled.
    /// Valid once, from the loaded state.
    pub fn play(&self) -> Result<()> {
        self.state
            .compare_exchange(
                STATE_LOADED,
                STATE_PLAYING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::BadArgs("playback already started"))?;
        if self.messages.is_empty() {
            self.state.store(STATE_FINISHED, Ordering::Release);
            return Ok(());
        }
        {
            let mut transport = self.lock_transport();
            let now = self.clock.now_ns();
            self.rebase(&mut transport, now);
        }

        'schedule: loop {
            if self.cancel_flag.load(Ordering::Acquire) {
                self.state.store(STATE_CANCELLED, Ordering::Release);
                break;
            }
            let index = self.lock_transport().index;
            if index >= self.messages.len() {
                self.state.store(STATE_FINISHED, Ordering::Release);
                break;
            }
            if self.state.load(Ordering::Acquire) == STATE_PAUSED {
                thread::sleep(WAIT_SLICE);
                continue;
            }

            // Wait out the deadline of `index` one slice at a time,
            // re-deriving it each slice so seeks and speed changes land.
            loop {
                if self.cancel_flag.load(Ordering::Acquire) {
                    continue 'schedule;
                }
                if self.state.load(Ordering::Acquire) == STATE_PAUSED {
                    continue 'schedule;
                }
                if self.skip_flag.swap(false, Ordering::AcqRel) {
                    let mut transport = self.lock_transport();
                    let now = self.clock.now_ns();
                    self.rebase(&mut transport, now);
                    break;
                }
                let wait = {
                    let transport = self.lock_transport();
                    if transport.index != index {
                        continue 'schedule;
                    }
                    if transport.speed <= 0.0 {
                        break;
                    }
                    let deadline = self.deadline_ns(&transport);
                    let now = self.clock.now_ns() as i64;
                    if now >= deadline {
                        break;
                    }
                    Duration::from_nanos((deadline - now) as u64).min(WAIT_SLICE)
                };
                thread::sleep(wait);
            }

            let index = {
                let transport = self.lock_transport();
                if transport.index >= self.messages.len() {
                    continue;
                }
                transport.index
            };
            self.publish_at(index);
            let mut transport = self.lock_transport();
            if transport.index == index {
                transport.index += 1;
            }
        }
        Ok(())
    }

    fn lock_transport(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().expect("transport lock poisoned")
    }

    fn is_terminal(&self) -> bool {
        self.state.load(Ordering::Acquire) >= STATE_FINISHED
    }

    fn offset_ns(&self, index: usize) -> u64 {
        self.messages[index].received_ns - self.messages[0].received_ns
    }

    /// Re-pins the anchor so the message at the current cursor is due now.
    fn rebase(&self, transport: &mut Transport, now_ns: u64) {
        if self.messages.is_empty() {
            transport.anchor_ns = now_ns as i64;
            return;
        }
        let index = transport.index.min(self.messages.len() - 1);
        let lead = if transport.speed > 0.0 {
            (self.offset_ns(index) as f64 / transport.speed) as i64
        } else {
            0
        };
        transport.anchor_ns = now_ns as i64 - lead;
    }

    fn deadline_ns(&self, transport: &Transport) -> i64 {
        transport.anchor_ns + (self.offset_ns(transport.index) as f64 / transport.speed) as i64
    }

    fn publish_at(&self, index: usize) {
        let msg = &self.messages[index];
        let mut publishers = self.publishers.lock().expect("publisher cache poisoned");
        if !publishers.contains_key(&msg.subject) {
            match self.bus.publisher_for(&msg.subject) {
                Ok(publisher) => {
                    publishers.insert(msg.subject.clone(), publisher);
                }
                Err(err) => {
                    log::warn!("publisher for {} unavailable: {err}", msg.subject);
                    return;
                }
            }
        }
        let publisher = publishers.get(&msg.subject).expect("publisher cached");
        match publisher.publish(&msg.payload) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => log::warn!("publish to {} failed: {err}", msg.subject),
        }
    }
}

impl PlaybackControl for Player {
    fn set_speed(&self, speed: f64) {
        if self.is_terminal() {
            return;
        }
        let speed = if speed > 0.0 { speed.min(MAX_SPEED) } else { 0.0 };
        let mut transport = self.lock_transport();
        if (transport.speed - speed).abs() < f64::EPSILON {
            // Same speed; the anchor must not move.
            return;
        }
        transport.speed = speed;
        let now = self.clock.now_ns();
        self.rebase(&mut transport, now);
    }

    fn pause(&self) {
        if self
            .state
            .compare_exchange(
                STATE_PLAYING,
                STATE_PAUSED,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            let mut transport = self.lock_transport();
            transport.pause_begin_ns = self.clock.now_ns();
        }
    }

    fn resume(&self) {
        if self
            .state
            .compare_exchange(
                STATE_PAUSED,
                STATE_PLAYING,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            let mut transport = self.lock_transport();
            let paused_for = self.clock.now_ns() - transport.pause_begin_ns;
            transport.anchor_ns += paused_for as i64;
        }
    }

    fn is_paused(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_PAUSED
    }

    fn is_finished(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_FINISHED
    }

    fn skip_next(&self) {
        if self.is_terminal() {
            return;
        }
        // Skipping while paused resumes; the schedule then fires right away.
        self.resume();
        self.skip_flag.store(true, Ordering::Release);
    }

    fn seek(&self, delta: i64) {
        if self.is_terminal() || self.messages.is_empty() {
            return;
        }
        let mut transport = self.lock_transport();
        let last = self.messages.len() as i64 - 1;
        let target = (transport.index.min(self.messages.len() - 1) as i64 + delta).clamp(0, last);
        transport.index = target as usize;
        let now = self.clock.now_ns();
        self.rebase(&mut transport, now);
    }

    fn step(&self) -> Result<()> {
        let state = self.state.load(Ordering::Acquire);
        if state != STATE_PLAYING && state != STATE_PAUSED {
            return Ok(());
        }
        let index = {
            let transport = self.lock_transport();
            if transport.index >= self.messages.len() {
                return Ok(());
            }
            transport.index
        };
        self.publish_at(index);
        let mut transport = self.lock_transport();
        if transport.index == index {
            transport.index += 1;
            let now = self.clock.now_ns();
            self.rebase(&mut transport, now);
        }
        Ok(())
    }

    fn stats(&self) -> PlayerStats {
        let transport = self.lock_transport();
        let total = self.messages.len();
        let position_ns = if transport.index > 0 && transport.index < total {
            self.offset_ns(transport.index)
        } else {
            0
        };
        PlayerStats {
            total_messages: total as u64,
            current_message: transport.index as u64,
            messages_published: self.published.load(Ordering::Relaxed),
            speed: transport.speed,
            duration_ns: self.duration_ns,
            position_ns,
        }
    }
}
