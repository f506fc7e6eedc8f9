//! NATS-backed bus adapter over the synchronous client.
//!
//! The client delivers each subscription's messages serially on a
//! client-owned thread, which is exactly the delivery contract the capture
//! pipeline assumes.

use std::sync::Mutex;

use crate::bus::{Bus, DeliveryFn, Publisher, Subscription};
use crate::{Error, Result};

pub const DEFAULT_URL: &str = "nats://localhost:4222";

pub struct NatsBus {
    conn: nats::Connection,
}

impl NatsBus {
    pub fn connect(url: &str) -> Result<Self> {
        let conn = nats::connect(url).map_err(|source| Error::ConnectFailed {
            url: url.to_string(),
            source,
        })?;
        Ok(Self { conn })
    }
}

impl Bus for NatsBus {
    fn publisher_for(&self, subject: &str) -> Result<Box<dyn Publisher>> {
        if subject.is_empty() {
            return Err(Error::BadArgs("subject must not be empty"));
        }
        Ok(Box::new(NatsPublisher {
            conn: self.conn.clone(),
            subject: subject.to_string(),
        }))
    }

    fn subscribe(&self, pattern: &str, delivery: DeliveryFn) -> Result<Box<dyn Subscription>> {
        let sub = self
            .conn
            .subscribe(pattern)
            .map_err(|source| Error::SubscribeFailed {
                pattern: pattern.to_string(),
                source,
            })?;
        // The handler closure must be `Fn`; the mutex restores the FnMut
        // contract without changing the serial delivery order.
        let delivery = Mutex::new(delivery);
        let handler = sub.with_handler(move |msg| {
            let mut delivery = delivery.lock().expect("delivery callback poisoned");
            (*delivery)(&msg.subject, &msg.data);
            Ok(())
        });
        Ok(Box::new(NatsSubscription {
            teardown: Some(Box::new(move || handler.unsubscribe())),
        }))
    }
}

struct NatsPublisher {
    conn: nats::Connection,
    subject: String,
}

impl Publisher for NatsPublisher {
    fn publish(&self, payload: &[u8]) -> Result<()> {
        self.conn.publish(&self.subject, payload)?;
        Ok(())
    }
}

struct NatsSubscription {
    teardown: Option<Box<dyn FnOnce() -> std::io::Result<()> + Send>>,
}

impl Subscription for NatsSubscription {
    fn unsubscribe(&mut self) -> Result<()> {
        if let Some(teardown) = self.teardown.take() {
            teardown()?;
        }
        Ok(())
    }
}

impl Drop for NatsSubscription {
    fn drop(&mut self) {
        if let Err(err) = self.unsubscribe() {
            log::warn!("unsubscribe on drop failed: {err}");
        }
    }
}
