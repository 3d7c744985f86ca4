//! Periodic task scheduling for Fleetcast.
//!
//! The coordinator runs a handful of slow background jobs (weather
//! refresh every 30 minutes, forecast every 6 hours, config reload every
//! 15 minutes). This crate provides:
//!
//! - [`TickScheduler`]: fires at a fixed period, with jitter on the first
//!   tick and a policy for ticks that were missed.
//! - [`ShutdownTrigger`] / [`Shutdown`]: a one-shot, cloneable stop signal
//!   built on `tokio::sync::watch`.
//! - [`run_periodic`]: the loop that ties the two together around a job.
//!
//! # Integration
//!
//! ```ignore
//! let (trigger, shutdown) = shutdown_channel();
//! tokio::spawn(run_periodic("weather", TickConfig::every(period), shutdown, |_tick| {
//!     let coordinator = Arc::clone(&coordinator);
//!     async move { coordinator.refresh_current_weather().await }
//! }));
//! // later
//! trigger.trigger();
//! ```

mod shutdown;

pub use shutdown::{Shutdown, ShutdownTrigger, shutdown_channel};

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when ticks were missed (the job ran longer than a period,
/// or the process was suspended).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPolicy {
    /// Forget the missed ticks and schedule the next one a full period
    /// from now.
    #[default]
    Skip,
    /// Fire up to `max_catchup` missed ticks back to back, then skip the
    /// rest.
    CatchUp { max_catchup: u32 },
}

/// Configuration for a [`TickScheduler`].
#[derive(Debug, Clone)]
pub struct TickConfig {
    pub period: Duration,
    pub policy: TickPolicy,
    /// Upper bound of the random delay added to the first tick, so jobs
    /// started together don't stay in lockstep.
    pub initial_jitter: Duration,
    /// Fire the first tick right away instead of one period from now.
    pub fire_immediately: bool,
}

impl TickConfig {
    /// Shortest accepted period.
    pub const MIN_PERIOD: Duration = Duration::from_millis(1);

    /// A config firing every `period`, first tick one period from now,
    /// no jitter.
    pub fn every(period: Duration) -> Self {
        Self {
            period,
            policy: TickPolicy::default(),
            initial_jitter: Duration::ZERO,
            fire_immediately: false,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }

    pub fn with_policy(mut self, policy: TickPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fixes out-of-range values. Called by [`TickScheduler::new`].
    ///
    /// A zero period would spin; it is raised to [`Self::MIN_PERIOD`].
    pub fn validated(mut self) -> Self {
        if self.period < Self::MIN_PERIOD {
            warn!(period = ?self.period, "tick period too short, clamping");
            self.period = Self::MIN_PERIOD;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    /// Starts at 1.
    pub tick: u64,
    /// The tick fired more than 10% of a period late.
    pub overrun: bool,
    /// Missed ticks that will never fire.
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-period tick source.
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    next_tick: Instant,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter > Duration::ZERO {
            let max = u64::try_from(config.initial_jitter.as_millis()).unwrap_or(u64::MAX);
            Duration::from_millis(rand::rng().random_range(0..=max))
        } else {
            Duration::ZERO
        };
        let first = if config.fire_immediately {
            Duration::ZERO
        } else {
            config.period
        };
        let next_tick = Instant::now() + first + jitter;

        debug!(
            period = ?config.period,
            jitter = ?jitter,
            policy = ?config.policy,
            "tick scheduler created"
        );

        Self {
            config,
            tick_count: 0,
            next_tick,
        }
    }

    /// Waits until the next tick is due.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let scheduled = self.next_tick;
        let period = self.config.period;
        time::sleep_until(scheduled).await;

        let now = Instant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(scheduled);
        let overrun = late_by > period / 10;
        let behind = if overrun {
            u64::try_from(late_by.as_nanos() / period.as_nanos()).unwrap_or(u64::MAX)
        } else {
            0
        };

        let (next, ticks_skipped) = match self.config.policy {
            TickPolicy::Skip => (now + period, behind),
            TickPolicy::CatchUp { max_catchup } if behind <= u64::from(max_catchup) => {
                (scheduled + period, 0)
            }
            TickPolicy::CatchUp { max_catchup } => {
                (now + period, behind - u64::from(max_catchup))
            }
        };
        self.next_tick = next;

        if ticks_skipped > 0 {
            warn!(
                tick = self.tick_count,
                skipped = ticks_skipped,
                late_s = late_by.as_secs_f64(),
                "periodic tick overrun, skipping ahead"
            );
        }
        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn period(&self) -> Duration {
        self.config.period
    }
}

// ---------------------------------------------------------------------------
// Periodic loop
// ---------------------------------------------------------------------------

/// Runs `job` on every tick until `shutdown` fires.
///
/// Shutdown is checked both while waiting for a tick and while the job is
/// running; an in-flight job is dropped at its next await point. Returns
/// the number of ticks that started a job.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    config: TickConfig,
    mut shutdown: Shutdown,
    mut job: F,
) -> u64
where
    F: FnMut(TickInfo) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut scheduler = TickScheduler::new(config);
    debug!(task = name, period = ?scheduler.period(), "periodic task started");

    loop {
        let info = tokio::select! {
            _ = shutdown.wait() => break,
            info = scheduler.wait_for_tick() => info,
        };

        trace!(task = name, tick = info.tick, "running periodic job");
        tokio::select! {
            _ = shutdown.wait() => break,
            () = job(info) => {}
        }
    }

    debug!(task = name, ticks = scheduler.tick_count(), "periodic task stopped");
    scheduler.tick_count()
}
