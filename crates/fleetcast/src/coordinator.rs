//! `Coordinator` builder and run loop.
//!
//! This is the entry point for running a fleet. It ties together all the
//! layers: transport → protocol → {registry | canvas} → transport.

use std::sync::Arc;

use chrono::Utc;
use fleetcast_canvas::SharedCanvas;
use fleetcast_protocol::DeviceId;
use fleetcast_registry::{Device, DeviceRegistry, KeyValueStore};
use fleetcast_tick::{Shutdown, TickConfig, run_periodic, shutdown_channel};
use fleetcast_transport::{Delivery, Inbox, Publisher, QoS};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::FleetcastError;
use crate::config::{CoordinatorConfig, RuntimeConfig, Topics};
use crate::feed::{FeedCache, FeedKind, FeedSource};
use crate::handler::FollowUp;
use crate::router::{Route, RouteTable};

/// Deliveries buffered between the inbox pump and the dispatch loop.
const DELIVERY_BUFFER: usize = 256;

/// Builder for a [`Coordinator`].
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = CoordinatorBuilder::new()
///     .topics(Topics::debug())
///     .build(publisher, feeds, device_store, feed_store)?;
/// coordinator.run(inbox, shutdown).await?;
/// ```
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn topics(mut self, topics: Topics) -> Self {
        self.config.topics = topics;
        self
    }

    /// Builds the coordinator.
    ///
    /// Loads the device registry from `device_store` (a store that can't
    /// be read at all is an error) and the feed cache from `feed_store`.
    /// An unreadable runtime config file falls back to the defaults with
    /// a warning.
    pub fn build<P, F, S>(
        self,
        publisher: P,
        feeds: F,
        device_store: S,
        feed_store: S,
    ) -> Result<Arc<Coordinator<P, F, S>>, FleetcastError>
    where
        P: Publisher,
        F: FeedSource,
        S: KeyValueStore,
    {
        let config = self.config;
        let device_store = Arc::new(device_store);
        let feed_store = Arc::new(feed_store);
        let registry = DeviceRegistry::load(Arc::clone(&device_store))?;
        let cache = FeedCache::load(
            Arc::clone(&feed_store),
            config.current_validity,
            config.forecast_validity,
        );

        let runtime = match &config.runtime_config_path {
            Some(path) => RuntimeConfig::load(path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "using default runtime config");
                RuntimeConfig::default()
            }),
            None => RuntimeConfig::default(),
        };

        Ok(Arc::new(Coordinator {
            routes: RouteTable::from_topics(&config.topics),
            registry: RwLock::new(registry),
            canvas: SharedCanvas::new(),
            feed_cache: Mutex::new(cache),
            device_store,
            feed_store,
            runtime: RwLock::new(runtime),
            publisher,
            feeds,
            config,
        }))
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared coordinator state.
///
/// Wrapped in `Arc` and handed to every follow-up task and periodic job.
/// Guards are always released before a publish, a feed fetch or a store
/// flush.
pub struct Coordinator<P, F, S> {
    pub(crate) config: CoordinatorConfig,
    pub(crate) routes: RouteTable,
    pub(crate) registry: RwLock<DeviceRegistry<Arc<S>>>,
    pub(crate) canvas: SharedCanvas,
    pub(crate) feed_cache: Mutex<FeedCache<Arc<S>>>,
    pub(crate) device_store: Arc<S>,
    pub(crate) feed_store: Arc<S>,
    pub(crate) runtime: RwLock<RuntimeConfig>,
    pub(crate) publisher: P,
    pub(crate) feeds: F,
}

impl<P, F, S> Coordinator<P, F, S>
where
    P: Publisher,
    F: FeedSource,
    S: KeyValueStore,
{
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn canvas(&self) -> &SharedCanvas {
        &self.canvas
    }

    pub async fn device(&self, id: &DeviceId) -> Option<Device> {
        self.registry.read().await.get(id).cloned()
    }

    pub async fn active_devices(&self) -> Vec<Device> {
        self.registry.read().await.list_active()
    }

    pub async fn runtime_config(&self) -> RuntimeConfig {
        self.runtime.read().await.clone()
    }

    /// Swaps in a new runtime config without touching the file.
    pub async fn set_runtime_config(&self, config: RuntimeConfig) {
        *self.runtime.write().await = config;
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Subscribes to every routed topic and clears the retained canvas
    /// frame left over from a previous run.
    pub async fn start(&self) -> Result<(), FleetcastError> {
        for topic in self.routes.topics() {
            self.publisher.subscribe(topic, QoS::AtLeastOnce).await?;
            tracing::debug!(topic, "subscribed");
        }
        self.publish(&self.config.topics.canvas, QoS::AtMostOnce, true, Vec::new())
            .await;
        tracing::info!(topics = self.routes.topics().len(), "coordinator started");
        Ok(())
    }

    /// Runs until `shutdown` fires or the inbox closes.
    ///
    /// Calls [`start`](Self::start), spawns the periodic jobs, then
    /// applies deliveries one at a time in arrival order. Follow-up work
    /// (bootup weather, version notices) runs on its own tasks. On exit,
    /// in-flight follow-ups are aborted, the periodic jobs are stopped and
    /// the publisher disconnects while the inbox is still being polled.
    pub async fn run<I: Inbox>(
        self: Arc<Self>,
        mut inbox: I,
        mut shutdown: Shutdown,
    ) -> Result<(), FleetcastError> {
        // The inbox runs on its own task so it keeps driving the
        // connection while a handler is busy. It has to be running before
        // `start`, whose publishes wait on the connection.
        let (tx, mut rx) = mpsc::channel::<Delivery>(DELIVERY_BUFFER);
        let pump = tokio::spawn(async move {
            loop {
                match inbox.recv().await {
                    Ok(Some(delivery)) => {
                        if tx.send(delivery).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => tracing::warn!(error = %e, "receive failed"),
                }
            }
        });

        if let Err(e) = self.start().await {
            pump.abort();
            return Err(e);
        }

        let (stop_jobs, jobs_shutdown) = shutdown_channel();
        let jobs = self.spawn_periodic_jobs(&jobs_shutdown);

        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "follow-up task panicked");
                        }
                    }
                }
                delivery = rx.recv() => match delivery {
                    Some(delivery) => {
                        if let Some(follow_up) = self.dispatch(&delivery).await {
                            let coordinator = Arc::clone(&self);
                            in_flight.spawn(async move {
                                coordinator.follow_up(follow_up).await;
                            });
                        }
                    }
                    None => {
                        tracing::info!("inbox closed");
                        break;
                    }
                },
            }
        }

        in_flight.shutdown().await;
        stop_jobs.trigger();
        for job in jobs {
            if let Err(e) = job.await {
                tracing::warn!(error = %e, "periodic job ended abnormally");
            }
        }

        self.disconnect(&mut rx).await;
        pump.abort();
        tracing::info!("coordinator stopped");
        Ok(())
    }

    /// Asks the publisher to disconnect and keeps draining deliveries
    /// until the inbox reports the connection closed.
    async fn disconnect(&self, rx: &mut mpsc::Receiver<Delivery>) {
        let bound = self.config.publish_timeout;
        match tokio::time::timeout(bound, self.publisher.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "disconnect failed"),
            Err(_) => tracing::warn!(?bound, "disconnect timed out"),
        }

        let drained = tokio::time::timeout(bound, async {
            while rx.recv().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(?bound, "inbox did not close after disconnect");
        }
    }

    fn spawn_periodic_jobs(self: &Arc<Self>, shutdown: &Shutdown) -> Vec<JoinHandle<u64>> {
        let mut jobs = Vec::with_capacity(3);

        for (name, kind, period) in [
            ("current-refresh", FeedKind::Current, self.config.current_refresh_interval),
            ("forecast-refresh", FeedKind::Forecast, self.config.forecast_refresh_interval),
        ] {
            let coordinator = Arc::clone(self);
            let tick = TickConfig::every(period).with_jitter(self.config.periodic_jitter);
            jobs.push(tokio::spawn(run_periodic(name, tick, shutdown.clone(), move |_| {
                let coordinator = Arc::clone(&coordinator);
                async move { coordinator.refresh_feeds(kind).await }
            })));
        }

        if self.config.runtime_config_path.is_some() {
            let coordinator = Arc::clone(self);
            let tick = TickConfig::every(self.config.config_reload_interval);
            jobs.push(tokio::spawn(run_periodic("config-reload", tick, shutdown.clone(), move |_| {
                let coordinator = Arc::clone(&coordinator);
                async move {
                    if let Err(e) = coordinator.reload_runtime_config().await {
                        tracing::warn!(error = %e, "runtime config reload failed, keeping previous");
                    }
                }
            })));
        }

        jobs
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Handles one delivery start to finish: applies it, then runs its
    /// follow-up inline.
    pub async fn handle_delivery(&self, delivery: Delivery) {
        if let Some(follow_up) = self.dispatch(&delivery).await {
            self.follow_up(follow_up).await;
        }
    }

    /// Routes one delivery to its handler and logs whatever goes wrong.
    pub(crate) async fn dispatch(&self, delivery: &Delivery) -> Option<FollowUp> {
        let Some(route) = self.routes.route(&delivery.topic) else {
            tracing::debug!(topic = %delivery.topic, "no route for topic");
            return None;
        };

        let result = match route {
            Route::Bootup => self.handle_bootup(&delivery.payload).await,
            Route::Heartbeat => self.handle_heartbeat(&delivery.payload).await,
            Route::Offline => self.handle_offline(&delivery.payload).await,
            Route::Canvas => self.handle_canvas(&delivery.payload).await,
        };

        match result {
            Ok(follow_up) => follow_up,
            // Our own retained clear and echoes come back on the canvas
            // topic, so decode failures there are routine.
            Err(FleetcastError::Protocol(e)) if route == Route::Canvas => {
                tracing::debug!(topic = %delivery.topic, error = %e, "ignoring canvas payload");
                None
            }
            Err(e) => {
                tracing::warn!(topic = %delivery.topic, ?route, error = %e, "dropped message");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Periodic jobs
    // -----------------------------------------------------------------------

    /// Fetches and publishes `kind` data for every active routing key,
    /// pausing `refresh_spacing` between keys.
    pub async fn refresh_feeds(&self, kind: FeedKind) {
        let keys = self.registry.read().await.active_routing_keys();
        if keys.is_empty() {
            tracing::debug!(%kind, "no active devices, skipping refresh");
            return;
        }
        tracing::info!(%kind, keys = keys.len(), "refreshing feeds");

        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.refresh_spacing).await;
            }
            self.fetch_feed(key, kind).await;
            self.publish_feed(key, kind).await;
        }
    }

    /// Re-reads the runtime config file, if one is configured. On error
    /// the previous config stays in effect.
    pub async fn reload_runtime_config(&self) -> Result<(), FleetcastError> {
        let Some(path) = &self.config.runtime_config_path else {
            return Ok(());
        };
        let loaded = RuntimeConfig::load(path)?;

        let mut runtime = self.runtime.write().await;
        if *runtime != loaded {
            tracing::info!(
                from = %runtime.device_version,
                to = %loaded.device_version,
                "device version changed"
            );
            *runtime = loaded;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Feeds
    // -----------------------------------------------------------------------

    /// Fetches `kind` for `routing_key` unless the cache is still fresh.
    pub(crate) async fn ensure_fresh(&self, routing_key: &str, kind: FeedKind) {
        let fresh = self
            .feed_cache
            .lock()
            .await
            .is_fresh(routing_key, kind, Utc::now());
        if !fresh {
            self.fetch_feed(routing_key, kind).await;
        }
    }

    /// Writes whatever `store` has staged, on the blocking pool. Callers
    /// must not hold a guard across this.
    pub(crate) async fn flush_store(&self, store: &Arc<S>, what: &'static str) {
        let store = Arc::clone(store);
        match tokio::task::spawn_blocking(move || store.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(store = what, error = %e, "failed to persist"),
            Err(e) => tracing::warn!(store = what, error = %e, "store flush task failed"),
        }
    }

    /// Fetches from the source (no lock held) and records the result.
    /// Failures are logged; the cache keeps whatever it had.
    pub(crate) async fn fetch_feed(&self, routing_key: &str, kind: FeedKind) {
        match kind {
            FeedKind::Current => match self.feeds.fetch_current(routing_key).await {
                Ok(current) => {
                    self.feed_cache
                        .lock()
                        .await
                        .record_current(routing_key, current, Utc::now());
                    self.flush_store(&self.feed_store, "weather").await;
                }
                Err(e) => tracing::warn!(routing_key, %kind, error = %e, "feed fetch failed"),
            },
            FeedKind::Forecast => {
                let days = self.config.forecast_days;
                match self.feeds.fetch_forecast(routing_key, days).await {
                    Ok(mut forecast) => {
                        forecast.truncate(days);
                        self.feed_cache
                            .lock()
                            .await
                            .record_forecast(routing_key, forecast, Utc::now());
                        self.flush_store(&self.feed_store, "weather").await;
                    }
                    Err(e) => tracing::warn!(routing_key, %kind, error = %e, "feed fetch failed"),
                }
            }
        }
    }
}
