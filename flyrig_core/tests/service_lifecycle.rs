//! Service lifecycle semantics: one-shot start/stop, join-on-stop, loop
//! timing, and fail-to-safe on body errors.

use flyrig_core::error::Result;
use flyrig_core::{LoopBody, LoopTiming, Service};
use flyrig_traits::MonotonicClock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

struct CountingBody {
    ticks: Arc<AtomicU64>,
    fail_after: Option<u64>,
    stopped: Arc<AtomicBool>,
}

impl CountingBody {
    fn new() -> (Self, Arc<AtomicU64>, Arc<AtomicBool>) {
        let ticks = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        (
            Self {
                ticks: ticks.clone(),
                fail_after: None,
                stopped: stopped.clone(),
            },
            ticks,
            stopped,
        )
    }
}

impl LoopBody for CountingBody {
    fn tick(&mut self) -> Result<()> {
        let n = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(limit) = self.fail_after
            && n >= limit
        {
            eyre::bail!("simulated body failure");
        }
        Ok(())
    }

    fn on_stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

fn clock() -> Arc<MonotonicClock> {
    Arc::new(MonotonicClock::new())
}

#[test]
fn stop_joins_and_no_zombie_iterations_follow() {
    let (body, ticks, stopped) = CountingBody::new();
    let mut service = Service::new(
        "counting",
        LoopTiming::fixed(Duration::from_millis(2)),
        Box::new(body),
        clock(),
    );
    service.start().expect("start");
    std::thread::sleep(Duration::from_millis(50));
    service.stop().expect("stop");
    assert!(stopped.load(Ordering::Relaxed), "on_stop must have run");

    let after_stop = ticks.load(Ordering::Relaxed);
    assert!(after_stop > 0, "worker never ran");
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        ticks.load(Ordering::Relaxed),
        after_stop,
        "worker kept ticking after stop returned"
    );
}

#[test]
fn stop_is_idempotent() {
    let (body, _, _) = CountingBody::new();
    let mut service = Service::new(
        "idempotent",
        LoopTiming::fixed(Duration::from_millis(2)),
        Box::new(body),
        clock(),
    );
    service.start().expect("start");
    service.stop().expect("first stop");
    service.stop().expect("second stop must be a no-op");
}

#[test]
fn start_twice_is_an_invalid_state() {
    let (body, _, _) = CountingBody::new();
    let mut service = Service::new(
        "double-start",
        LoopTiming::fixed(Duration::from_millis(2)),
        Box::new(body),
        clock(),
    );
    service.start().expect("start");
    let err = service.start().expect_err("second start must fail");
    assert!(format!("{err}").contains("already started"));
    service.stop().expect("stop");
}

#[test]
fn restart_after_stop_is_an_invalid_state() {
    let (body, _, _) = CountingBody::new();
    let mut service = Service::new(
        "restart",
        LoopTiming::fixed(Duration::from_millis(2)),
        Box::new(body),
        clock(),
    );
    service.start().expect("start");
    service.stop().expect("stop");
    let err = service.start().expect_err("restart must fail");
    assert!(format!("{err}").contains("restarted"));
}

#[test]
fn stop_before_start_is_an_invalid_state() {
    let (body, _, _) = CountingBody::new();
    let mut service = Service::new(
        "never-started",
        LoopTiming::fixed(Duration::from_millis(2)),
        Box::new(body),
        clock(),
    );
    let err = service.stop().expect_err("stop before start must fail");
    assert!(format!("{err}").contains("never started"));
}

#[test]
fn average_period_respects_configured_bounds() {
    let (body, _, _) = CountingBody::new();
    let period = Duration::from_millis(5);
    let mut service = Service::new(
        "paced",
        LoopTiming::fixed(period),
        Box::new(body),
        clock(),
    );
    service.start().expect("start");
    std::thread::sleep(Duration::from_millis(200));
    service.stop().expect("stop");

    let avg = service.average_period().expect("stats after stop");
    // near-instant body: the throttle dominates; allow generous scheduler
    // jitter above the floor
    assert!(avg >= Duration::from_millis(4), "avg {avg:?} below floor");
    assert!(avg <= Duration::from_millis(50), "avg {avg:?} far over budget");
}

#[test]
fn average_period_unavailable_before_stop() {
    let (body, _, _) = CountingBody::new();
    let mut service = Service::new(
        "no-stats",
        LoopTiming::fixed(Duration::from_millis(2)),
        Box::new(body),
        clock(),
    );
    assert!(service.average_period().is_none());
    service.start().expect("start");
    assert!(service.average_period().is_none());
    service.stop().expect("stop");
    assert!(service.average_period().is_some());
}

#[test]
fn body_error_stops_worker_and_still_runs_on_stop() {
    let (mut body, ticks, stopped) = CountingBody::new();
    body.fail_after = Some(3);
    let mut service = Service::new(
        "failing",
        LoopTiming::fixed(Duration::from_millis(2)),
        Box::new(body),
        clock(),
    );
    service.start().expect("start");
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(ticks.load(Ordering::Relaxed), 3, "worker must stop at the failing tick");
    assert!(stopped.load(Ordering::Relaxed), "on_stop must run on the error path");
    service.stop().expect("stop after body failure");
}

#[test]
fn inverted_timing_bounds_are_a_config_error() {
    let err = LoopTiming::new(
        Some(Duration::from_millis(10)),
        Some(Duration::from_millis(5)),
    )
    .expect_err("max < min must fail");
    assert!(format!("{err}").contains("shorter than"));
}

#[test]
fn equal_timing_bounds_are_valid() {
    let timing = LoopTiming::new(
        Some(Duration::from_millis(5)),
        Some(Duration::from_millis(5)),
    )
    .expect("min == max is the common fixed-cadence configuration");
    assert_eq!(timing.min_period, timing.max_period);
}

#[test]
fn dropping_a_running_service_joins_the_worker() {
    let (body, _, stopped) = CountingBody::new();
    {
        let mut service = Service::new(
            "dropped",
            LoopTiming::fixed(Duration::from_millis(2)),
            Box::new(body),
            clock(),
        );
        service.start().expect("start");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(
        stopped.load(Ordering::Relaxed),
        "drop must run the body's on_stop before returning"
    );
}
