//! Broker adapter surface.
//!
//! The capture and replay pipelines consume four operations from whatever
//! broker they sit on: connect, get a publisher for a subject, publish, and
//! subscribe with a delivery callback. Everything else about the broker
//! (wildcard grammar, reconnection, retry policy) stays on the other side of
//! these traits.

pub mod memory;
pub mod nats;

pub use memory::MemoryBus;
pub use nats::NatsBus;

use crate::Result;

/// Delivery callback for one subscription.
///
/// The broker invalidates `subject` and `payload` when the callback returns,
/// so anything kept must be copied. Deliveries are serialised per
/// subscription, which is why `FnMut` is enough.
pub type DeliveryFn = Box<dyn FnMut(&str, &[u8]) + Send + 'static>;

/// A connected broker.
pub trait Bus: Send + Sync {
    /// Returns a publisher handle bound to one subject.
    fn publisher_for(&self, subject: &str) -> Result<Box<dyn Publisher>>;

    /// Installs `delivery` for every message matching `pattern`. The pattern
    /// may use broker-defined wildcards; it is opaque here.
    fn subscribe(&self, pattern: &str, delivery: DeliveryFn) -> Result<Box<dyn Subscription>>;
}

/// A publisher bound to a single subject.
pub trait Publisher: Send {
    fn publish(&self, payload: &[u8]) -> Result<()>;
}

/// A live subscription. Dropping it also tears the subscription down.
pub trait Subscription: Send {
    fn unsubscribe(&mut self) -> Result<()>;
}
