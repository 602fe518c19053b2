//! Fixed-timestep tick scheduler for Voxmine rooms.
//!
//! Each room actor owns one [`TickScheduler`] and awaits it inside its
//! `tokio::select!` loop next to the command channel:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = commands.recv() => { /* apply command */ }
//!         info = scheduler.wait_for_tick() => {
//!             room.tick(Instant::now());
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```
//!
//! A room with nobody in it pauses its scheduler, so an idle server costs
//! nothing per tick.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the tick scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Tick rate in Hz, `1..=128`.
    pub tick_rate_hz: u32,
    /// Random delay (0 to this many µs) added to the first tick so rooms
    /// created together do not tick in lockstep.
    pub initial_jitter_us: u64,
    /// Fraction of the tick budget (0.0 to 1.0) above which a tick logs a
    /// warning.
    pub budget_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            initial_jitter_us: 2_000,
            budget_warn_threshold: 0.80,
        }
    }
}

impl TickConfig {
    pub const MIN_TICK_RATE_HZ: u32 = 1;
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`TickScheduler::new`].
    pub fn validated(mut self) -> Self {
        let clamped = self
            .tick_rate_hz
            .clamp(Self::MIN_TICK_RATE_HZ, Self::MAX_TICK_RATE_HZ);
        if clamped != self.tick_rate_hz {
            warn!(
                rate = self.tick_rate_hz,
                clamped, "tick_rate_hz out of range, clamping"
            );
            self.tick_rate_hz = clamped;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Duration of a single tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`] for every tick that fires.
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Starts at 1 and never repeats.
    pub tick: u64,
    /// The nominal tick length, `1 / tick_rate`.
    pub dt: Duration,
    /// Time since the previous tick fired (or since the scheduler was
    /// created or resumed).
    pub elapsed: Duration,
    /// `true` if this tick woke more than 10% late.
    pub overrun: bool,
    /// Whole ticks skipped because of the overrun.
    pub ticks_skipped: u64,
}

/// Counters kept across the scheduler's lifetime.
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Longest work time reported through `record_tick_end`.
    pub max_tick_time: Duration,
    /// Work time of the last tick as a fraction of the budget.
    pub budget_utilization: f64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-timestep tick scheduler. On overrun it skips ahead to the next
/// slot from now instead of bursting to catch up.
pub struct TickScheduler {
    config: TickConfig,
    tick_duration: Duration,
    tick_count: u64,
    next_tick: TokioInstant,
    last_fired: TokioInstant,
    /// Wall-clock start of the current tick's work.
    tick_start: Option<Instant>,
    paused: bool,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Creates a running scheduler. The first tick is one tick duration
    /// away plus the configured jitter.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();

        let jitter = if config.initial_jitter_us > 0 {
            Duration::from_micros(rand::rng().random_range(0..config.initial_jitter_us))
        } else {
            Duration::ZERO
        };
        let now = TokioInstant::now();

        debug!(
            rate_hz = config.tick_rate_hz,
            budget_ms = tick_duration.as_secs_f64() * 1000.0,
            "tick scheduler created"
        );

        Self {
            config,
            tick_duration,
            tick_count: 0,
            next_tick: now + tick_duration + jitter,
            last_fired: now,
            tick_start: None,
            paused: false,
            metrics: TickMetrics::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Waits until the next tick is due.
    ///
    /// While paused this future never resolves; `tokio::select!` keeps
    /// servicing its other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        if self.paused {
            std::future::pending::<()>().await;
        }

        let due = self.next_tick;
        time::sleep_until(due).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(due);
        let overrun = late_by > self.tick_duration / 10;
        let mut ticks_skipped = 0u64;
        if overrun {
            ticks_skipped = (late_by.as_nanos() / self.tick_duration.as_nanos()) as u64;
            if ticks_skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late_ms = late_by.as_secs_f64() * 1000.0,
                    "tick overrun, skipping ahead"
                );
            }
            self.metrics.total_overruns += 1;
        }
        self.next_tick = now + self.tick_duration;

        let elapsed = now.saturating_duration_since(self.last_fired);
        self.last_fired = now;

        self.metrics.total_ticks += 1;
        self.metrics.total_skipped += ticks_skipped;
        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            dt: self.tick_duration,
            elapsed,
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the end of the current tick's work and checks it against the
    /// budget. Does nothing unless a tick has fired since the last call.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let work = start.elapsed();
        let utilization = work.as_secs_f64() / self.tick_duration.as_secs_f64();
        self.metrics.budget_utilization = utilization;
        if work > self.metrics.max_tick_time {
            self.metrics.max_tick_time = work;
        }

        if utilization >= 1.0 {
            warn!(
                tick = self.tick_count,
                work_ms = work.as_secs_f64() * 1000.0,
                budget_ms = self.tick_duration.as_secs_f64() * 1000.0,
                "tick exceeded budget"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "tick approaching budget limit"
            );
        }
    }

    /// Stops ticks until [`resume`](Self::resume). Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Restarts ticks one tick duration from now, so time spent paused
    /// never produces a burst. Idempotent.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            let now = TokioInstant::now();
            self.next_tick = now + self.tick_duration;
            self.last_fired = now;
            debug!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}
