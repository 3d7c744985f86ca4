//! Unified error type for the coordinator.

use fleetcast_protocol::ProtocolError;
use fleetcast_registry::StoreError;
use fleetcast_transport::TransportError;

use crate::config::ConfigError;
use crate::feed::FeedError;

/// Top-level error that wraps all crate-specific errors.
///
/// Handlers return this so `?` works across layers. The coordinator logs
/// whatever a handler returns and moves on to the next delivery; nothing
/// here stops the service.
#[derive(Debug, thiserror::Error)]
pub enum FleetcastError {
    /// Malformed bytes from a device.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Broker-side failure (publish, subscribe, timeout).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The weather source couldn't produce data.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// The runtime config file couldn't be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A frame decoded fine but its contents make no sense (e.g. a bootup
    /// with an empty device id).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
