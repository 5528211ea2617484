//! Cooperative periodic scheduler.
//!
//! A `Service` owns exactly one worker thread that repeatedly invokes a
//! caller-supplied loop body at a roughly fixed cadence. Timing is
//! cooperative: the worker self-throttles with sleep, and `stop()` takes
//! effect only at the next iteration boundary.

use crate::error::{Report, Result, RigError};
use flyrig_traits::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Minimum spacing between "slow iteration" warnings per service.
const SLOW_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Body of a periodic worker.
///
/// `tick` runs once per iteration. Returning an error stops the worker
/// cleanly after logging it; `on_stop` runs on the worker thread on every
/// exit path and is where a body puts its fail-to-safe behavior (the tracker
/// zeroes the stage velocity there).
pub trait LoopBody: Send {
    fn tick(&mut self) -> Result<()>;

    fn on_stop(&mut self) {}
}

/// Minimum and maximum iteration period for one service.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopTiming {
    pub min_period: Option<Duration>,
    pub max_period: Option<Duration>,
}

impl LoopTiming {
    pub fn new(min_period: Option<Duration>, max_period: Option<Duration>) -> Result<Self> {
        if let (Some(min), Some(max)) = (min_period, max_period)
            && max < min
        {
            return Err(Report::new(RigError::Config(format!(
                "max_period {max:?} is shorter than min_period {min:?}"
            ))));
        }
        Ok(Self {
            min_period,
            max_period,
        })
    }

    /// Throttle floor and slow-iteration budget set to the same period; the
    /// common configuration for control loops.
    pub fn fixed(period: Duration) -> Self {
        Self {
            min_period: Some(period),
            max_period: Some(period),
        }
    }

    /// Only a slow-iteration budget; the body itself paces the loop.
    pub fn budget(period: Duration) -> Self {
        Self {
            min_period: None,
            max_period: Some(period),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct LoopStats {
    iterations: u64,
    elapsed: Duration,
}

/// One worker thread plus its lifecycle. One-shot: a stopped service cannot
/// be restarted.
pub struct Service {
    name: &'static str,
    timing: LoopTiming,
    clock: Arc<dyn Clock + Send + Sync>,
    state: ServiceState,
    body: Option<Box<dyn LoopBody>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<LoopStats>>,
    stats: Option<LoopStats>,
}

impl Service {
    pub fn new(
        name: &'static str,
        timing: LoopTiming,
        body: Box<dyn LoopBody>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            name,
            timing,
            clock,
            state: ServiceState::Created,
            body: Some(body),
            shutdown: Arc::new(AtomicBool::new(false)),
            handle: None,
            stats: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }

    /// Spawn the worker. Fails on a running or stopped service.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            ServiceState::Created => {}
            ServiceState::Running => {
                return Err(Report::new(RigError::InvalidState(
                    "service already started",
                )));
            }
            ServiceState::Stopped => {
                return Err(Report::new(RigError::InvalidState(
                    "service cannot be restarted",
                )));
            }
        }
        let body = self
            .body
            .take()
            .ok_or_else(|| Report::new(RigError::InvalidState("service body already consumed")))?;
        let name = self.name;
        let timing = self.timing;
        let clock = self.clock.clone();
        let shutdown = self.shutdown.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(name, timing, body, clock, shutdown))
            .map_err(|e| Report::new(RigError::Comm(format!("failed to spawn worker: {e}"))))?;
        self.handle = Some(handle);
        self.state = ServiceState::Running;
        tracing::debug!(service = name, "service started");
        Ok(())
    }

    /// Request termination and block until the worker has exited. Idempotent:
    /// a second call on a stopped service is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            ServiceState::Created => {
                return Err(Report::new(RigError::InvalidState(
                    "service was never started",
                )));
            }
            ServiceState::Stopped => return Ok(()),
            ServiceState::Running => {}
        }
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(stats) => self.stats = Some(stats),
                Err(e) => tracing::warn!(service = self.name, ?e, "worker panicked"),
            }
        }
        self.state = ServiceState::Stopped;
        tracing::debug!(service = self.name, "service stopped");
        Ok(())
    }

    /// Mean iteration period over the worker's lifetime. Diagnostic only;
    /// available after `stop()`.
    pub fn average_period(&self) -> Option<Duration> {
        self.stats.and_then(|s| {
            (s.iterations > 0)
                .then(|| Duration::from_secs_f64(s.elapsed.as_secs_f64() / s.iterations as f64))
        })
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        // A still-running worker must not outlive its owner; join so the
        // body's on_stop (fail-to-safe) has run before we return.
        if self.state == ServiceState::Running {
            self.shutdown.store(true, Ordering::Relaxed);
            if let Some(handle) = self.handle.take()
                && handle.join().is_err()
            {
                tracing::warn!(service = self.name, "worker panicked during shutdown");
            }
        }
    }
}

fn run_loop(
    name: &'static str,
    timing: LoopTiming,
    mut body: Box<dyn LoopBody>,
    clock: Arc<dyn Clock + Send + Sync>,
    shutdown: Arc<AtomicBool>,
) -> LoopStats {
    let started = clock.now();
    let mut iterations: u64 = 0;
    let mut last_warn: Option<Instant> = None;

    while !shutdown.load(Ordering::Relaxed) {
        let iter_start = clock.now();
        if let Err(e) = body.tick() {
            tracing::error!(service = name, error = %e, "loop body failed; stopping worker");
            break;
        }
        iterations += 1;
        let dt = clock.now().saturating_duration_since(iter_start);

        if let Some(min) = timing.min_period
            && dt < min
        {
            clock.sleep(min - dt);
        }
        if let Some(max) = timing.max_period
            && dt > max
        {
            let due = last_warn
                .is_none_or(|t| clock.now().saturating_duration_since(t) >= SLOW_WARN_INTERVAL);
            if due {
                tracing::warn!(
                    service = name,
                    elapsed_us = dt.as_micros() as u64,
                    budget_us = max.as_micros() as u64,
                    "slow iteration"
                );
                last_warn = Some(clock.now());
            }
        }
    }

    body.on_stop();
    LoopStats {
        iterations,
        elapsed: clock.now().saturating_duration_since(started),
    }
}
