//! Trial sequencing scenarios driven deterministically with a test clock.

use flyrig_core::mocks::{SpyStage, SpyStageHandle, TestClock};
use flyrig_core::{
    ManualCommand, TrackerHandle, TrackerLoop, TrackingCfg, TrialCfg, TrialLoop, TrialPhase,
    VisionHandle,
};
use flyrig_traits::{BoxedError, FlyDispenser, FlySample, TrialSink};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collaborator spy shared between the test and the boxed sink.
#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    fn push(&self, event: &str) {
        self.0.lock().expect("events lock").push(event.to_string());
    }

    fn count(&self, event: &str) -> usize {
        self.0
            .lock()
            .expect("events lock")
            .iter()
            .filter(|e| e.as_str() == event)
            .count()
    }
}

struct RecordingSink {
    events: Events,
}

impl TrialSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording-sink"
    }

    fn start_logging(&mut self, _trial_dir: &Path) -> Result<(), BoxedError> {
        self.events.push("sink.start_logging");
        Ok(())
    }

    fn stop_logging(&mut self) -> Result<(), BoxedError> {
        self.events.push("sink.stop_logging");
        Ok(())
    }

    fn trial_started(&mut self, _trial_dir: &Path) -> Result<(), BoxedError> {
        self.events.push("sink.trial_started");
        Ok(())
    }

    fn trial_stopped(&mut self, _trial_dir: &Path) -> Result<(), BoxedError> {
        self.events.push("sink.trial_stopped");
        Ok(())
    }
}

struct RecordingDispenser {
    events: Events,
}

impl TrialSink for RecordingDispenser {
    fn name(&self) -> &'static str {
        "recording-dispenser"
    }

    fn start_logging(&mut self, _trial_dir: &Path) -> Result<(), BoxedError> {
        self.events.push("dispenser.start_logging");
        Ok(())
    }

    fn stop_logging(&mut self) -> Result<(), BoxedError> {
        self.events.push("dispenser.stop_logging");
        Ok(())
    }
}

impl FlyDispenser for RecordingDispenser {
    fn release_fly(&mut self) -> Result<(), BoxedError> {
        self.events.push("dispenser.release_fly");
        Ok(())
    }
}

struct Rig {
    trial: TrialLoop,
    handle: flyrig_core::TrialHandle,
    tracker_loop: TrackerLoop<SpyStage>,
    tracker: TrackerHandle,
    stage: SpyStageHandle,
    vision: VisionHandle,
    clock: TestClock,
    events: Events,
    _data_dir: tempfile::TempDir,
}

fn rig() -> Rig {
    rig_with(|_| {})
}

fn rig_with(tweak: impl FnOnce(&mut TrialCfg)) -> Rig {
    let clock = TestClock::new();
    let vision = VisionHandle::detached();
    let (spy, stage) = SpyStage::new();
    let (tracker_loop, tracker) = TrackerLoop::new(
        spy,
        vision.clone(),
        TrackingCfg::default(),
        Arc::new(clock.clone()),
    )
    .expect("build tracker");

    let data_dir = tempfile::tempdir().expect("tempdir");
    let events = Events::default();
    let mut cfg = TrialCfg {
        data_dir: data_dir.path().to_path_buf(),
        ..TrialCfg::default()
    };
    tweak(&mut cfg);

    let dispenser = Box::new(RecordingDispenser {
        events: events.clone(),
    });
    let sink = Box::new(RecordingSink {
        events: events.clone(),
    });
    let (trial, handle) = TrialLoop::new(
        vision.clone(),
        tracker.clone(),
        Some(dispenser),
        vec![sink],
        cfg,
        Arc::new(clock.clone()),
    )
    .expect("build trial loop");

    Rig {
        trial,
        handle,
        tracker_loop,
        tracker,
        stage,
        vision,
        clock,
        events,
        _data_dir: data_dir,
    }
}

fn fly_present(r: &Rig) {
    r.vision.publish(FlySample::at(0.0, 0.0));
}

fn fly_absent(r: &Rig) {
    r.vision.publish(FlySample::absent());
}

/// Drive the machine from idle into a confirmed, recording trial.
fn reach_run(r: &mut Rig) {
    fly_present(r);
    r.trial.step().expect("detect");
    assert_eq!(r.trial.phase(), TrialPhase::FlyDetected);
    r.clock.advance(Duration::from_secs(2));
    r.trial.step().expect("confirm");
    assert_eq!(r.trial.phase(), TrialPhase::Run);
}

fn trial_dirs(r: &Rig) -> Vec<std::path::PathBuf> {
    let exp = r.trial.exp_dir().clone();
    let mut dirs: Vec<_> = std::fs::read_dir(exp)
        .expect("exp dir readable")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

#[test]
fn stays_idle_while_the_fly_is_never_seen() {
    let mut r = rig();
    fly_absent(&r);
    for _ in 0..50 {
        r.clock.advance(Duration::from_secs(1));
        r.trial.step().expect("step");
    }
    assert_eq!(r.trial.phase(), TrialPhase::Started);
    assert_eq!(r.handle.trial_count(), 0);
    assert!(trial_dirs(&r).is_empty(), "no trial directory may exist");
    assert_eq!(r.events.count("sink.start_logging"), 0);
}

#[test]
fn detection_enables_tracking_before_confirmation() {
    let mut r = rig();
    fly_present(&r);
    r.trial.step().expect("step");
    assert_eq!(r.trial.phase(), TrialPhase::FlyDetected);
    assert!(r.tracker.is_tracking(), "tracking starts at first sight");
    assert_eq!(r.handle.trial_count(), 0, "no trial before the timeout");
}

#[test]
fn continuous_presence_reaches_run_exactly_once() {
    let mut r = rig();
    reach_run(&mut r);

    // presence continues; the machine must stay in Run without re-starting
    for _ in 0..20 {
        r.clock.advance(Duration::from_secs(1));
        r.trial.step().expect("step");
        assert_eq!(r.trial.phase(), TrialPhase::Run);
    }

    assert_eq!(r.handle.trial_count(), 1);
    assert_eq!(r.events.count("sink.start_logging"), 1);
    assert_eq!(r.events.count("sink.trial_started"), 1);

    let dirs = trial_dirs(&r);
    assert_eq!(dirs.len(), 1, "exactly one trial directory");
    assert!(dirs[0].join("stage.csv").is_file());
    assert!(dirs[0].join("vision.csv").is_file());
}

#[test]
fn brief_absence_within_grace_returns_to_run() {
    let mut r = rig();
    reach_run(&mut r);

    fly_absent(&r);
    r.trial.step().expect("lose");
    assert_eq!(r.trial.phase(), TrialPhase::FlyLost);

    // reappears inside the grace window
    r.clock.advance(Duration::from_millis(1500));
    fly_present(&r);
    r.trial.step().expect("recover");
    assert_eq!(r.trial.phase(), TrialPhase::Run);
    assert!(r.tracker.is_tracking());
    assert_eq!(
        r.events.count("sink.stop_logging"),
        0,
        "the grace period must be honored"
    );
}

#[test]
fn exceeding_the_grace_period_closes_the_trial_and_recenters() {
    let mut r = rig();
    reach_run(&mut r);

    fly_absent(&r);
    r.trial.step().expect("lose");
    r.clock.advance(Duration::from_secs(2));
    r.trial.step().expect("give up");

    assert_eq!(r.trial.phase(), TrialPhase::MovingToCenter);
    assert_eq!(r.events.count("sink.stop_logging"), 1);
    assert_eq!(r.events.count("sink.trial_stopped"), 1);
    assert!(!r.tracker.is_tracking());

    // let the tracker reach the center, then observe the release
    let cfg = TrackingCfg::default();
    r.stage.set_position(cfg.center_x, cfg.center_y);
    r.tracker_loop.step().expect("publish telemetry");
    r.tracker_loop.step().expect("observe arrival");

    r.trial.step().expect("recentered");
    assert_eq!(r.trial.phase(), TrialPhase::Started);
    assert_eq!(r.events.count("dispenser.release_fly"), 1);
}

#[test]
fn losing_an_unconfirmed_fly_never_touches_trial_logging() {
    let mut r = rig();
    fly_present(&r);
    r.trial.step().expect("detect");
    fly_absent(&r);
    r.trial.step().expect("lose before confirmation");
    assert_eq!(r.trial.phase(), TrialPhase::FlyLost);
    assert!(!r.tracker.is_tracking());

    r.clock.advance(Duration::from_secs(2));
    r.trial.step().expect("give up");
    assert_eq!(r.trial.phase(), TrialPhase::MovingToCenter);
    assert_eq!(r.events.count("sink.start_logging"), 0);
    assert_eq!(r.events.count("sink.stop_logging"), 0);
}

#[test]
fn reappearance_before_confirmation_resumes_fly_detected() {
    let mut r = rig();
    fly_present(&r);
    r.trial.step().expect("detect");
    fly_absent(&r);
    r.trial.step().expect("lose");
    assert_eq!(r.trial.phase(), TrialPhase::FlyLost);

    fly_present(&r);
    r.trial.step().expect("recover");
    assert_eq!(
        r.trial.phase(),
        TrialPhase::FlyDetected,
        "must resume the remembered prior phase"
    );
    assert!(r.tracker.is_tracking());
}

#[test]
fn manual_stop_closes_the_trial_and_holds_in_idle() {
    let mut r = rig();
    reach_run(&mut r);

    r.handle.send(ManualCommand::Stop);
    r.trial.step().expect("manual stop");

    assert_eq!(r.trial.phase(), TrialPhase::Started);
    assert_eq!(r.events.count("sink.stop_logging"), 1);
    assert!(!r.tracker.is_tracking());

    // automatic sequencing is held off until a manual start
    fly_present(&r);
    for _ in 0..10 {
        r.clock.advance(Duration::from_secs(1));
        r.trial.step().expect("step");
        assert_eq!(r.trial.phase(), TrialPhase::Started);
    }

    r.handle.send(ManualCommand::Start);
    r.trial.step().expect("manual start");
    // first automatic transition happens on the same tick
    assert_eq!(r.trial.phase(), TrialPhase::FlyDetected);
}

#[test]
fn manual_stop_twice_closes_logging_once() {
    let mut r = rig();
    reach_run(&mut r);
    r.handle.send(ManualCommand::Stop);
    r.trial.step().expect("first stop");
    r.handle.send(ManualCommand::Stop);
    r.trial.step().expect("second stop");
    assert_eq!(r.events.count("sink.stop_logging"), 1);
}

#[test]
fn manual_center_interrupts_and_returns_to_idle() {
    let mut r = rig();
    reach_run(&mut r);

    r.handle.send(ManualCommand::Center);
    r.trial.step().expect("manual center");
    assert_eq!(r.trial.phase(), TrialPhase::MovingToCenter);
    assert_eq!(r.events.count("sink.stop_logging"), 1, "center closes the trial");

    let cfg = TrackingCfg::default();
    r.stage.set_position(cfg.center_x, cfg.center_y);
    r.tracker_loop.step().expect("publish telemetry");
    r.tracker_loop.step().expect("observe arrival");
    r.trial.step().expect("recentered");
    assert_eq!(r.trial.phase(), TrialPhase::Started);
}

#[test]
fn manual_jog_commands_forward_to_the_tracker() {
    let mut r = rig();
    r.handle.send(ManualCommand::Jog {
        vel_x: 0.01,
        vel_y: -0.01,
    });
    r.trial.step().expect("jog");
    assert_eq!(
        r.tracker.manual_override(),
        flyrig_core::ManualOverride::Velocity {
            vel_x: 0.01,
            vel_y: -0.01
        }
    );
    r.handle.send(ManualCommand::NoJog);
    r.trial.step().expect("no jog");
    assert_eq!(
        r.tracker.manual_override(),
        flyrig_core::ManualOverride::None
    );
}

#[test]
fn manual_release_asks_the_dispenser() {
    let mut r = rig();
    r.handle.send(ManualCommand::ReleaseFly);
    r.trial.step().expect("release");
    assert_eq!(r.events.count("dispenser.release_fly"), 1);
}

#[test]
fn release_on_center_can_be_disabled() {
    let mut r = rig_with(|cfg| cfg.release_on_center = false);
    reach_run(&mut r);
    fly_absent(&r);
    r.trial.step().expect("lose");
    r.clock.advance(Duration::from_secs(2));
    r.trial.step().expect("give up");

    let cfg = TrackingCfg::default();
    r.stage.set_position(cfg.center_x, cfg.center_y);
    r.tracker_loop.step().expect("publish telemetry");
    r.tracker_loop.step().expect("observe arrival");
    r.trial.step().expect("recentered");
    assert_eq!(r.trial.phase(), TrialPhase::Started);
    assert_eq!(r.events.count("dispenser.release_fly"), 0);
}

#[test]
fn dispenser_logging_starts_at_the_experiment_level() {
    let r = rig();
    assert_eq!(r.events.count("dispenser.start_logging"), 1);
    assert!(r.trial.exp_dir().is_dir());
}

#[test]
fn second_trial_gets_its_own_directory() {
    let mut r = rig();
    reach_run(&mut r);

    // lose the fly long enough to close trial 1 and recenter
    fly_absent(&r);
    r.trial.step().expect("lose");
    r.clock.advance(Duration::from_secs(2));
    r.trial.step().expect("give up");
    let cfg = TrackingCfg::default();
    r.stage.set_position(cfg.center_x, cfg.center_y);
    r.tracker_loop.step().expect("publish telemetry");
    r.tracker_loop.step().expect("observe arrival");
    r.trial.step().expect("recentered");

    // a new fly shows up and is confirmed
    reach_run(&mut r);
    assert_eq!(r.handle.trial_count(), 2);
    assert_eq!(r.events.count("sink.start_logging"), 2);
    assert_eq!(trial_dirs(&r).len(), 2);
}
