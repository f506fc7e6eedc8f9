//! Bounded single-producer/single-consumer ring.
//!
//! Two unbounded `u64` counters advance independently: the producer owns
//! `write`, the consumer owns `read`, and `write - read` is the occupancy
//! (never above capacity, never negative). A slot belongs to the producer
//! until it publishes the incremented `write` counter and to the consumer
//! from then until it publishes the incremented `read` counter.
//!
//! Ordering protocol:
//! - the producer stores the slot, then publishes `write + 1` with Release;
//!   the consumer loads `write` with Acquire before touching the slot
//! - the consumer clears the slot, then publishes `read + 1` with Release;
//!   the producer loads `read` with Acquire before reusing the slot
//! - the sticky overflow flag is independent of slot visibility and stays
//!   Relaxed
//!
//! Single-producer/single-consumer is enforced by the type system: the two
//! handles are not `Clone` and their hot paths take `&mut self`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// Creates a bounded SPSC ring with room for `capacity` messages.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "ring capacity must be non-zero");
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(None))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        slots,
        write: CachePadded::new(AtomicU64::new(0)),
        read: CachePadded::new(AtomicU64::new(0)),
        overflow: AtomicBool::new(false),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

struct Shared<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    write: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
    overflow: AtomicBool,
}

// The counter protocol above hands each slot to exactly one side at a time.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Caller must hold ownership of the slot per the counter protocol.
    unsafe fn slot(&self, seq: u64) -> &mut Option<T> {
        let idx = (seq % self.capacity()) as usize;
        &mut *self.slots[idx].get()
    }

    fn occupancy(&self) -> u64 {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write - read
    }
}

/// Write half. Exactly one exists per ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// Read half. Exactly one exists per ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    /// Enqueues a value, or hands it back when the ring is full. Rejection
    /// also latches the sticky overflow flag.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let write = self.shared.write.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);
        if write - read == self.shared.capacity() {
            self.shared.overflow.store(true, Ordering::Relaxed);
            return Err(value);
        }
        unsafe {
            *self.shared.slot(write) = Some(value);
        }
        self.shared.write.store(write + 1, Ordering::Release);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn len(&self) -> usize {
        self.shared.occupancy() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a push was ever rejected. Sticky for the ring's lifetime.
    pub fn overflowed(&self) -> bool {
        self.shared.overflow.load(Ordering::Relaxed)
    }
}

impl<T> Consumer<T> {
    /// Dequeues the oldest value, clearing its slot, or `None` when the ring
    /// is empty.
    pub fn pop(&mut self) -> Option<T> {
        let read = self.shared.read.load(Ordering::Relaxed);
        let write = self.shared.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        let value = unsafe { self.shared.slot(read).take() };
        debug_assert!(value.is_some(), "published slot must be occupied");
        self.shared.read.store(read + 1, Ordering::Release);
        value
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn len(&self) -> usize {
        self.shared.occupancy() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overflowed(&self) -> bool {
        self.shared.overflow.load(Ordering::Relaxed)
    }
}
