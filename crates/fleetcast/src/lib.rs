//! # Fleetcast
//!
//! Session coordinator for a fleet of MQTT-connected display devices.
//!
//! The coordinator registers devices as they boot, tracks their liveness,
//! pushes weather data and firmware version notices to them, and keeps a
//! shared 16x16 canvas in sync across displays. Collaborators are passed
//! in as trait implementations: a [`Publisher`]/[`Inbox`] pair for the
//! broker, a [`FeedSource`] for weather data, and a [`KeyValueStore`] for
//! persistence.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleetcast::prelude::*;
//!
//! // let (publisher, inbox) = fleetcast_transport::connect(&mqtt_config)?;
//! // let coordinator = CoordinatorBuilder::new()
//! //     .topics(Topics::production())
//! //     .build(publisher, feeds, device_store, feed_store)?;
//! // coordinator.run(inbox, shutdown).await
//! ```

mod coordinator;
mod error;
mod handler;

pub mod config;
pub mod feed;
pub mod router;

pub use config::{ConfigError, CoordinatorConfig, RuntimeConfig, Topics};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::FleetcastError;
pub use feed::{CurrentConditions, FeedCache, FeedError, FeedKind, FeedRecord, FeedSource};
pub use router::{Route, RouteTable};

pub use fleetcast_registry::KeyValueStore;
pub use fleetcast_transport::{Inbox, Publisher};

/// Everything needed to wire up and run a coordinator.
pub mod prelude {
    pub use crate::{
        Coordinator, CoordinatorBuilder, CoordinatorConfig, CurrentConditions, FeedError, FeedSource, FleetcastError,
        RuntimeConfig, Topics,
    };
    pub use fleetcast_protocol::{DeviceId, ForecastDay, MoonPhase};
    pub use fleetcast_registry::{JsonFileStore, KeyValueStore, MemoryStore};
    pub use fleetcast_tick::{Shutdown, ShutdownTrigger, shutdown_channel};
    pub use fleetcast_transport::{Delivery, Inbox, Publisher, QoS};
}
