//! In-process bus.
//!
//! Publishes synchronously on the caller's thread to every matching
//! subscription, serialised per subscription. Subject matching follows the
//! usual dotted-token grammar: `*` matches exactly one token, `>` matches
//! the rest of the subject.
//!
//! Useful on its own for wiring components inside one process, and it is
//! what the integration tests record from and replay into.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::bus::{Bus, DeliveryFn, Publisher, Subscription};
use crate::{Error, Result};

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    subscriptions: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

struct Entry {
    id: u64,
    pattern: String,
    delivery: Arc<Mutex<DeliveryFn>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes directly, without going through a publisher handle.
    pub fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        self.inner.dispatch(subject, payload);
        Ok(())
    }
}

impl Inner {
    fn dispatch(&self, subject: &str, payload: &[u8]) {
        // Snapshot the matching callbacks so deliveries never run under the
        // subscription-list lock (a callback may subscribe or unsubscribe).
        let matching: Vec<Arc<Mutex<DeliveryFn>>> = {
            let subs = self.subscriptions.lock().expect("subscription list poisoned");
            subs.iter()
                .filter(|entry| subject_matches(&entry.pattern, subject))
                .map(|entry| Arc::clone(&entry.delivery))
                .collect()
        };
        for delivery in matching {
            let mut delivery = delivery.lock().expect("delivery callback poisoned");
            (*delivery)(subject, payload);
        }
    }

    fn remove(&self, id: u64) {
        let mut subs = self.subscriptions.lock().expect("subscription list poisoned");
        subs.retain(|entry| entry.id != id);
    }
}

impl Bus for MemoryBus {
    fn publisher_for(&self, subject: &str) -> Result<Box<dyn Publisher>> {
        if subject.is_empty() {
            return Err(Error::BadArgs("subject must not be empty"));
        }
        Ok(Box::new(MemoryPublisher {
            inner: Arc::clone(&self.inner),
            subject: subject.to_string(),
        }))
    }

    fn subscribe(&self, pattern: &str, delivery: DeliveryFn) -> Result<Box<dyn Subscription>> {
        if pattern.is_empty() {
            return Err(Error::BadArgs("subscription pattern must not be empty"));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self
            .inner
            .subscriptions
            .lock()
            .expect("subscription list poisoned");
        subs.push(Entry {
            id,
            pattern: pattern.to_string(),
            delivery: Arc::new(Mutex::new(delivery)),
        });
        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            id,
        }))
    }
}

struct MemoryPublisher {
    inner: Arc<Inner>,
    subject: String,
}

impl Publisher for MemoryPublisher {
    fn publish(&self, payload: &[u8]) -> Result<()> {
        self.inner.dispatch(&self.subject, payload);
        Ok(())
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    id: u64,
}

impl Subscription for MemorySubscription {
    fn unsubscribe(&mut self) -> Result<()> {
        self.inner.remove(self.id);
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.inner.remove(self.id);
    }
}

fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), _) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
