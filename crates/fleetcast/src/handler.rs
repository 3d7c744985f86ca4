//! Per-topic handlers: bootup, heartbeat, offline, canvas.
//!
//! A handler decodes and applies its state change under a short guard.
//! The dispatch loop awaits handlers one at a time, so registry and
//! canvas updates land in arrival order. Anything slow after that is
//! returned as a [`FollowUp`] and run on its own task. Errors bubble up
//! to the dispatcher, which logs them.

use chrono::Utc;
use fleetcast_protocol::{
    CanvasMessage, CurrentWeather, DeviceConfig, DeviceId, Forecast, Heartbeat, VersionNotice,
    WireMessage,
};
use fleetcast_registry::{HeartbeatOutcome, KeyValueStore};
use fleetcast_transport::{Publisher, QoS, TransportError};

use crate::FleetcastError;
use crate::coordinator::Coordinator;
use crate::feed::{FeedKind, FeedSource};

/// The fields a device reports at bootup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BootupReport {
    pub(crate) device: DeviceId,
    pub(crate) routing_key: String,
    pub(crate) name: Option<String>,
}

impl BootupReport {
    /// Extracts `[device id, routing key, name?]`, trimmed. The first two
    /// must be non-empty; an empty name counts as absent.
    pub(crate) fn from_config(config: DeviceConfig) -> Result<Self, FleetcastError> {
        let mut strings = config.strings.into_iter().map(|s| s.trim().to_string());

        let device = strings.next().unwrap_or_default();
        let routing_key = strings.next().unwrap_or_default();
        if device.is_empty() || routing_key.is_empty() {
            return Err(FleetcastError::InvalidMessage(
                "bootup needs a device id and a routing key".into(),
            ));
        }
        let name = strings.next().filter(|s| !s.is_empty());

        Ok(Self {
            device: DeviceId::new(device),
            routing_key,
            name,
        })
    }
}

/// Work left over once a delivery's state change has been applied.
///
/// Runs off the dispatch loop so slow feed refreshes and acknowledged
/// publishes never hold up the next delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FollowUp {
    /// Refresh stale weather, wait for the device to settle, then push
    /// weather and the version notice.
    Bootup { device: DeviceId, routing_key: String },
    Version(DeviceId),
}

impl<P, F, S> Coordinator<P, F, S>
where
    P: Publisher,
    F: FeedSource,
    S: KeyValueStore,
{
    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    pub(crate) async fn handle_bootup(
        &self,
        payload: &[u8],
    ) -> Result<Option<FollowUp>, FleetcastError> {
        let report = BootupReport::from_config(DeviceConfig::from_frame(payload)?)?;

        let outcome = self.registry.write().await.bootup(
            &report.device,
            &report.routing_key,
            report.name.as_deref(),
        );
        tracing::info!(
            device_id = %report.device,
            routing_key = %outcome.routing_key,
            created = outcome.created,
            reactivated = outcome.reactivated,
            "device booted"
        );
        self.flush_store(&self.device_store, "devices").await;

        Ok(Some(FollowUp::Bootup {
            device: report.device,
            routing_key: outcome.routing_key,
        }))
    }

    pub(crate) async fn handle_heartbeat(
        &self,
        payload: &[u8],
    ) -> Result<Option<FollowUp>, FleetcastError> {
        let Heartbeat { device } = Heartbeat::from_frame(payload)?;
        if device.as_str().trim().is_empty() {
            tracing::debug!("heartbeat without a device name");
            return Ok(None);
        }

        let outcome = self.registry.write().await.heartbeat(&device);
        match outcome {
            HeartbeatOutcome::Unknown => {
                tracing::debug!(device_id = %device, "heartbeat from unknown device");
            }
            HeartbeatOutcome::Reactivated => {
                tracing::info!(device_id = %device, "device back online");
            }
            HeartbeatOutcome::Refreshed => {
                tracing::trace!(device_id = %device, "heartbeat");
            }
        }
        if outcome != HeartbeatOutcome::Unknown {
            self.flush_store(&self.device_store, "devices").await;
        }

        Ok(Some(FollowUp::Version(device)))
    }

    pub(crate) async fn handle_offline(
        &self,
        payload: &[u8],
    ) -> Result<Option<FollowUp>, FleetcastError> {
        let raw = std::str::from_utf8(payload)
            .map_err(|_| FleetcastError::InvalidMessage("offline payload is not UTF-8".into()))?;
        let id = raw.trim();
        if id.is_empty() {
            return Err(FleetcastError::InvalidMessage("empty offline payload".into()));
        }

        let device = DeviceId::from(id);
        let known = self.registry.write().await.offline(&device);
        if known {
            tracing::info!(device_id = %device, "device offline");
            self.flush_store(&self.device_store, "devices").await;
        } else {
            tracing::debug!(device_id = %device, "offline for unknown device");
        }
        Ok(None)
    }

    /// Runs the part of a delivery that doesn't touch shared state.
    pub(crate) async fn follow_up(&self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::Bootup { device, routing_key } => {
                self.ensure_fresh(&routing_key, FeedKind::Current).await;
                self.ensure_fresh(&routing_key, FeedKind::Forecast).await;

                if !self.config.settle_delay.is_zero() {
                    tokio::time::sleep(self.config.settle_delay).await;
                }

                self.publish_feed(&routing_key, FeedKind::Current).await;
                self.publish_feed(&routing_key, FeedKind::Forecast).await;
                self.publish_version(&device).await;
            }
            FollowUp::Version(device) => self.publish_version(&device).await,
        }
    }

    // -----------------------------------------------------------------------
    // Canvas
    // -----------------------------------------------------------------------

    /// Canvas publishes are QoS 0 and go out from the dispatch loop, so
    /// retained frames leave in the order their updates arrived.
    pub(crate) async fn handle_canvas(
        &self,
        payload: &[u8],
    ) -> Result<Option<FollowUp>, FleetcastError> {
        match CanvasMessage::from_frame(payload)? {
            CanvasMessage::SyncRequest => {
                tracing::debug!("canvas sync requested");
                self.publish_canvas().await;
            }
            CanvasMessage::FullFrame(frame) => {
                self.canvas.replace_full_frame(&frame).await;
                tracing::debug!(seq = frame.sequence, "canvas replaced");
            }
            CanvasMessage::PixelBatch(batch) => {
                let seq = self.canvas.apply_pixel_updates(&batch.pixels).await;
                tracing::debug!(seq, pixels = batch.pixels.len(), "canvas pixels applied");
                self.publish_canvas().await;
            }
        }
        Ok(None)
    }

    async fn publish_canvas(&self) {
        match self.canvas.encode_full_frame().await {
            Ok(frame) => {
                self.publish(&self.config.topics.canvas, QoS::AtMostOnce, true, frame)
                    .await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode canvas frame"),
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Publishes the cached `kind` data for `routing_key`, or skips with
    /// a debug log when it isn't fresh.
    pub(crate) async fn publish_feed(&self, routing_key: &str, kind: FeedKind) {
        let now = Utc::now();
        let frame = {
            let cache = self.feed_cache.lock().await;
            match kind {
                FeedKind::Current => cache
                    .fresh_current(routing_key, now)
                    .map(|c| CurrentWeather { temp_f: c.temp_f }.to_frame()),
                FeedKind::Forecast => cache
                    .fresh_forecast(routing_key, now)
                    .map(|days| Forecast { days }.to_frame()),
            }
        };

        match frame {
            None => tracing::debug!(routing_key, %kind, "no fresh data, skipping publish"),
            Some(Err(e)) => tracing::warn!(routing_key, %kind, error = %e, "failed to encode feed"),
            Some(Ok(bytes)) => {
                let topic = self.config.topics.weather(routing_key);
                self.publish(&topic, QoS::AtMostOnce, false, bytes).await;
            }
        }
    }

    async fn publish_version(&self, device: &DeviceId) {
        let version = self.runtime.read().await.version_byte();
        match (VersionNotice { version }).to_frame() {
            Ok(frame) => {
                let topic = self.config.topics.command(device.as_str());
                self.publish(&topic, QoS::AtLeastOnce, false, frame).await;
            }
            Err(e) => tracing::warn!(device_id = %device, error = %e, "failed to encode version"),
        }
    }

    /// Publishes with the configured time bound. Failures are logged and
    /// the message is abandoned.
    pub(crate) async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) {
        let bound = self.config.publish_timeout;
        let len = payload.len();
        let result = match tokio::time::timeout(
            bound,
            self.publisher.publish(topic, qos, retain, payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                topic: topic.to_string(),
                after: bound,
            }),
        };

        match result {
            Ok(()) => tracing::trace!(topic, %qos, retain, len, "published"),
            Err(e) => tracing::warn!(topic, error = %e, "publish abandoned"),
        }
    }
}
