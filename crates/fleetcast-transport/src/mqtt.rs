//! MQTT transport implementation using `rumqttc`.
//!
//! [`connect`] returns the two halves of one broker session. The
//! [`MqttInbox`] owns the `rumqttc` event loop, so it must be polled
//! continuously (the coordinator's receive loop does this); publishes made
//! through [`MqttPublisher`] are only flushed while it is.
//!
//! A publish resolves once the event loop has written it (QoS 0) or the
//! broker has acknowledged it (QoS 1 and 2). The inbox matches outgoing
//! packet ids and PUBACK/PUBCOMP back to the waiting publisher through
//! [`PendingAcks`].

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Transport};
use tokio::sync::oneshot;

use crate::{Delivery, Inbox, Publisher, QoS, TransportError};

/// Pause after a failed poll before the event loop reconnects.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// Paths to the PEM material for a mutually authenticated TLS session.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub ca: PathBuf,
    /// Client certificate and private key. `None` for server-auth only.
    pub client_auth: Option<(PathBuf, PathBuf)>,
}

/// Connection settings for [`connect`].
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub tls: Option<TlsConfig>,
    /// Bound on requests queued between the client and the event loop.
    pub request_capacity: usize,
}

impl MqttConfig {
    /// Plain-TCP defaults: 30 s keepalive, clean session.
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            tls: None,
            request_capacity: 100,
        }
    }

    /// Enables TLS with the given CA and optional client identity.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

fn read_pem(what: &'static str, path: &PathBuf) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|source| TransportError::Credentials { what, source })
}

/// Subscriptions made so far, replayed after every reconnect.
type SubscriptionLog = Arc<Mutex<Vec<(String, QoS)>>>;

/// Publishes waiting on the event loop or the broker.
///
/// `rumqttc` hands out packet ids inside the event loop, so a publish is
/// first queued in request order and only gets its id when the loop
/// reports writing it.
#[derive(Default)]
struct PendingAcks {
    /// Queued with the client, not yet written.
    queued: VecDeque<oneshot::Sender<()>>,
    /// Written with a packet id, waiting for PUBACK or PUBCOMP.
    inflight: HashMap<u16, oneshot::Sender<()>>,
}

impl PendingAcks {
    fn queue(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.queued.push_back(tx);
        rx
    }

    /// Drops the newest waiter after its request never reached the client.
    fn unqueue_last(&mut self) {
        self.queued.pop_back();
    }

    /// The event loop wrote a PUBLISH. Id 0 is QoS 0, which is done now.
    fn written(&mut self, pkid: u16) {
        // Ids stay reserved until acked, so a known id is a retransmission.
        if pkid != 0 && self.inflight.contains_key(&pkid) {
            return;
        }
        let Some(tx) = self.queued.pop_front() else {
            tracing::debug!(pkid, "untracked publish written");
            return;
        };
        if pkid == 0 {
            let _ = tx.send(());
        } else {
            self.inflight.insert(pkid, tx);
        }
    }

    fn acknowledged(&mut self, pkid: u16) {
        if let Some(tx) = self.inflight.remove(&pkid) {
            // The publisher may have timed out already.
            let _ = tx.send(());
        }
    }
}

type SharedAcks = Arc<Mutex<PendingAcks>>;

fn lock_acks(acks: &SharedAcks) -> MutexGuard<'_, PendingAcks> {
    acks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens a broker session.
///
/// Nothing touches the network until the returned inbox is first polled.
///
/// # Errors
/// [`TransportError::Credentials`] if a TLS file can't be read.
pub fn connect(config: &MqttConfig) -> Result<(MqttPublisher, MqttInbox), TransportError> {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(config.clean_session);

    if let Some(tls) = &config.tls {
        let ca = read_pem("CA certificate", &tls.ca)?;
        let client_auth = match &tls.client_auth {
            Some((cert, key)) => Some((
                read_pem("client certificate", cert)?,
                read_pem("client key", key)?,
            )),
            None => None,
        };
        options.set_transport(Transport::tls(ca, client_auth, None));
    }

    let (client, eventloop) = AsyncClient::new(options, config.request_capacity);
    let subscriptions = SubscriptionLog::default();
    let acks = SharedAcks::default();

    tracing::info!(
        host = %config.host,
        port = config.port,
        client_id = %config.client_id,
        tls = config.tls.is_some(),
        "MQTT transport configured"
    );

    Ok((
        MqttPublisher {
            client: client.clone(),
            subscriptions: Arc::clone(&subscriptions),
            acks: Arc::clone(&acks),
        },
        MqttInbox {
            client,
            eventloop,
            subscriptions,
            acks,
            connected_before: false,
        },
    ))
}

/// Publishing half of an MQTT session.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    subscriptions: SubscriptionLog,
    acks: SharedAcks,
}

impl Publisher for MqttPublisher {
    /// Waits for the broker's acknowledgement. Callers bound the wait;
    /// nothing here gives up on its own.
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        // Queue the waiter and the request under one lock so waiters line
        // up with the order the event loop sees requests. try_publish never
        // awaits, so a cancelled caller can't leave a waiter behind.
        let ack = {
            let mut acks = lock_acks(&self.acks);
            let ack = acks.queue();
            if let Err(e) = self.client.try_publish(topic, qos.into(), retain, payload) {
                acks.unqueue_last();
                return Err(TransportError::PublishFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
            }
            ack
        };
        ack.await.map_err(|_| TransportError::Closed)
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((topic.to_string(), qos));

        self.client
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(topic, %qos, "subscribed");
        Ok(())
    }

    /// Sends a DISCONNECT. The inbox returns `None` once it goes out.
    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client.disconnect().await.map_err(|e| {
            tracing::debug!(error = %e, "disconnect request rejected");
            TransportError::Closed
        })
    }
}

/// Receiving half of an MQTT session. Drives the `rumqttc` event loop.
pub struct MqttInbox {
    client: AsyncClient,
    eventloop: EventLoop,
    subscriptions: SubscriptionLog,
    acks: SharedAcks,
    connected_before: bool,
}

impl MqttInbox {
    /// Re-issues every recorded subscription. A clean session forgets them
    /// on the broker side whenever the connection drops.
    fn resubscribe(&self) {
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (topic, qos) in subscriptions {
            // try_subscribe: we are the event loop, so awaiting a full
            // request queue here would never make progress.
            if let Err(e) = self.client.try_subscribe(&topic, qos.into()) {
                tracing::warn!(topic, error = %e, "resubscribe failed");
            }
        }
    }
}

impl Inbox for MqttInbox {
    async fn recv(&mut self) -> Result<Option<Delivery>, TransportError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    tracing::trace!(
                        topic = %publish.topic,
                        len = publish.payload.len(),
                        "MQTT received"
                    );
                    return Ok(Some(Delivery {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    }));
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::info!(session_present = ack.session_present, "MQTT connected");
                    if self.connected_before && !ack.session_present {
                        self.resubscribe();
                    }
                    self.connected_before = true;
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    lock_acks(&self.acks).written(pkid);
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    lock_acks(&self.acks).acknowledged(ack.pkid);
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    lock_acks(&self.acks).acknowledged(comp.pkid);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    tracing::warn!("broker sent DISCONNECT");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::info!("MQTT disconnected");
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "MQTT connection error, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_maps_to_rumqttc() {
        assert_eq!(rumqttc::QoS::from(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(rumqttc::QoS::from(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
    }

    #[test]
    fn test_connect_missing_ca_file() {
        let config = MqttConfig::new("localhost", 8883, "test").with_tls(TlsConfig {
            ca: PathBuf::from("/nonexistent/ca.pem"),
            client_auth: None,
        });
        assert!(matches!(
            connect(&config),
            Err(TransportError::Credentials {
                what: "CA certificate",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_connect_plain_does_not_touch_network() {
        let config = MqttConfig::new("localhost", 1883, "test");
        assert!(connect(&config).is_ok());
    }

    #[tokio::test]
    async fn test_pending_acks_qos0_resolves_when_written() {
        let mut acks = PendingAcks::default();
        let rx = acks.queue();
        acks.written(0);
        assert!(rx.await.is_ok());
        assert!(acks.inflight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_acks_waits_for_puback() {
        let mut acks = PendingAcks::default();
        let mut rx = acks.queue();
        acks.written(7);

        let waited = tokio::time::timeout(Duration::from_secs(5), &mut rx).await;
        assert!(waited.is_err(), "resolved without an ack");

        acks.acknowledged(7);
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_acks_ignores_retransmits() {
        let mut acks = PendingAcks::default();
        let mut first = acks.queue();
        let mut second = acks.queue();

        acks.written(1);
        acks.written(1);
        acks.written(2);
        acks.acknowledged(2);

        assert!(second.try_recv().is_ok());
        assert!(first.try_recv().is_err());
        acks.acknowledged(1);
        assert!(first.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_pending_acks_unqueue_last_keeps_order() {
        let mut acks = PendingAcks::default();
        let mut kept = acks.queue();
        let _dropped = acks.queue();
        acks.unqueue_last();

        acks.written(0);
        assert!(kept.try_recv().is_ok());
        assert!(acks.queued.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_waits_for_broker_ack() {
        // No event loop is polled, so nothing is ever written or acked.
        let (publisher, _inbox) = connect(&MqttConfig::new("localhost", 1883, "test")).unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            publisher.publish("dev0_cmd", QoS::AtLeastOnce, false, vec![0x10, 0x00, 0x01, 0x03]),
        )
        .await;
        assert!(result.is_err(), "publish returned before an ack");
    }
}
