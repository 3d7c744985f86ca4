//! In-process broker for tests and local runs.
//!
//! [`MemoryBroker`] plays both sides of the wire: the code under test
//! publishes through it like any [`Publisher`], and the test injects
//! device traffic with [`MemoryBroker::inject`] and inspects what was
//! published. Publishes are recorded, not looped back to the inbox, so a
//! test sees exactly the traffic it injected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::{Delivery, Inbox, Publisher, QoS, TransportError};

/// One recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    published: Vec<Published>,
    subscriptions: Vec<(String, QoS)>,
    retained: HashMap<String, Vec<u8>>,
    fail_publishes: bool,
    publish_delay: Option<Duration>,
}

/// Cloneable handle to an in-memory broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    inject_tx: mpsc::UnboundedSender<Delivery>,
    closed_tx: Arc<watch::Sender<bool>>,
}

/// Receiving side of a [`MemoryBroker`].
pub struct MemoryInbox {
    rx: mpsc::UnboundedReceiver<Delivery>,
    closed_rx: watch::Receiver<bool>,
}

impl MemoryBroker {
    /// Creates a broker and the inbox that receives injected deliveries.
    ///
    /// The inbox reports closed once every broker handle is dropped or
    /// after [`Publisher::disconnect`].
    pub fn new() -> (Self, MemoryInbox) {
        let (inject_tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let broker = Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            inject_tx,
            closed_tx: Arc::new(closed_tx),
        };
        (broker, MemoryInbox { rx, closed_rx })
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers a message to the inbox as if a device had published it.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        // The inbox may already be gone during teardown; nothing to do then.
        let _ = self.inject_tx.send(Delivery::new(topic, payload));
    }

    /// Every publish so far, oldest first.
    pub fn published(&self) -> Vec<Published> {
        self.state().published.clone()
    }

    /// Publishes to one topic, oldest first.
    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.state()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Forgets recorded publishes (subscriptions and retained state stay).
    pub fn clear_published(&self) {
        self.state().published.clear();
    }

    /// Subscriptions in the order they were made.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state().subscriptions.clone()
    }

    /// The retained payload for `topic`. An empty retained publish clears
    /// it, matching MQTT semantics.
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.state().retained.get(topic).cloned()
    }

    /// Makes every subsequent publish fail until switched back off.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.state().fail_publishes = fail;
    }

    /// Whether [`Publisher::disconnect`] has been called.
    pub fn is_disconnected(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Holds every subsequent publish for `delay` before accepting it.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        self.state().publish_delay = delay;
    }
}

impl Publisher for MemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let delay = self.state().publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_publishes {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }
        if retain {
            if payload.is_empty() {
                state.retained.remove(topic);
            } else {
                state.retained.insert(topic.to_string(), payload.clone());
            }
        }
        tracing::trace!(topic, %qos, retain, len = payload.len(), "memory publish");
        state.published.push(Published {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.state().subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closed_tx.send_replace(true);
        Ok(())
    }
}

/// Resolves once the broker is disconnected or gone.
async fn wait_closed(closed_rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *closed_rx.borrow_and_update();
        if closed || closed_rx.changed().await.is_err() {
            return;
        }
    }
}

impl Inbox for MemoryInbox {
    /// Injected deliveries still queued at disconnect are handed out first.
    async fn recv(&mut self) -> Result<Option<Delivery>, TransportError> {
        tokio::select! {
            biased;
            delivery = self.rx.recv() => Ok(delivery),
            _ = wait_closed(&mut self.closed_rx) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_is_recorded_in_order() {
        let (broker, _inbox) = MemoryBroker::new();
        broker.publish("a", QoS::AtMostOnce, false, vec![1]).await.unwrap();
        broker.publish("b", QoS::AtLeastOnce, false, vec![2]).await.unwrap();

        let topics: Vec<_> = broker.published().into_iter().map(|p| p.topic).collect();
        assert_eq!(topics, vec!["a", "b"]);
        assert_eq!(broker.published_to("b")[0].qos, QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_empty_retained_publish_clears_retained() {
        let (broker, _inbox) = MemoryBroker::new();
        broker.publish("canvas", QoS::AtMostOnce, true, vec![9]).await.unwrap();
        assert_eq!(broker.retained("canvas"), Some(vec![9]));

        broker.publish("canvas", QoS::AtMostOnce, true, vec![]).await.unwrap();
        assert_eq!(broker.retained("canvas"), None);
    }

    #[tokio::test]
    async fn test_failing_broker_records_nothing() {
        let (broker, _inbox) = MemoryBroker::new();
        broker.set_fail_publishes(true);
        let result = broker.publish("a", QoS::AtMostOnce, false, vec![]).await;
        assert!(matches!(result, Err(TransportError::PublishFailed { .. })));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_inbox_closes_when_broker_dropped() {
        let (broker, mut inbox) = MemoryBroker::new();
        broker.inject("t", vec![1]);
        drop(broker);

        assert_eq!(inbox.recv().await.unwrap(), Some(Delivery::new("t", vec![1])));
        assert_eq!(inbox.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disconnect_closes_inbox_after_queued_deliveries() {
        let (broker, mut inbox) = MemoryBroker::new();
        broker.inject("t", vec![1]);
        broker.disconnect().await.unwrap();
        assert!(broker.is_disconnected());

        assert_eq!(inbox.recv().await.unwrap(), Some(Delivery::new("t", vec![1])));
        assert_eq!(inbox.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disconnect_wakes_waiting_inbox() {
        let (broker, mut inbox) = MemoryBroker::new();
        let waiter = tokio::spawn(async move { inbox.recv().await });
        tokio::task::yield_now().await;

        broker.disconnect().await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), None);
    }
}
