//! Transport abstraction layer for Fleetcast.
//!
//! Devices and the coordinator never talk directly: everything goes
//! through a topic-based pub/sub broker. This crate models the broker as
//! two capabilities:
//!
//! - [`Publisher`]: subscribe to topics and publish bytes to them. Cheap to
//!   share between tasks.
//! - [`Inbox`]: the single stream of [`Delivery`] events for the topics we
//!   subscribed to. Owned by the coordinator's receive loop.
//!
//! # Feature Flags
//!
//! - `mqtt` (default): MQTT transport via `rumqttc`
//!
//! The in-memory [`MemoryBroker`] is always available; the coordinator's
//! tests drive it instead of a real broker.

mod error;
mod memory;
#[cfg(feature = "mqtt")]
mod mqtt;

pub use error::TransportError;
pub use memory::{MemoryBroker, MemoryInbox, Published};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttInbox, MqttPublisher, TlsConfig, connect};

use std::fmt;
use std::future::Future;

/// Delivery guarantee for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QoS {
    /// Fire and forget. Used for weather and canvas frames, where a newer
    /// message supersedes a lost one anyway.
    AtMostOnce,
    /// Retried until acknowledged; may arrive twice.
    AtLeastOnce,
    ExactlyOnce,
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        };
        write!(f, "qos{level}")
    }
}

/// One inbound message: the topic it arrived on and its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound half of a broker connection.
///
/// Implementations must be cheap to call from many tasks at once; the
/// coordinator shares a single publisher behind an `Arc`.
///
/// The methods return `Send` futures so callers can `tokio::spawn` them.
pub trait Publisher: Send + Sync + 'static {
    /// Publishes `payload` to `topic`.
    ///
    /// For QoS 1 and 2, `Ok` means the broker acknowledged the message.
    /// For QoS 0 it means the message was written to the connection. In
    /// neither case does it say anything about subscribers.
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Registers interest in `topic`. Deliveries show up on the [`Inbox`].
    fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Ends the session. The [`Inbox`] reports closed once the broker
    /// connection is shut down, so it must still be polled afterwards.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Inbound half of a broker connection.
pub trait Inbox: Send + 'static {
    /// Waits for the next delivery.
    ///
    /// Returns `Ok(None)` once the transport is closed for good.
    /// Transient broker failures are retried internally and never surface
    /// here.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Delivery>, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_display() {
        assert_eq!(QoS::AtMostOnce.to_string(), "qos0");
        assert_eq!(QoS::AtLeastOnce.to_string(), "qos1");
    }

    #[test]
    fn test_delivery_new_accepts_slices_and_vecs() {
        let a = Delivery::new("dev_bootup", b"abc".as_slice());
        let b = Delivery::new(String::from("dev_bootup"), vec![b'a', b'b', b'c']);
        assert_eq!(a, b);
    }
}
