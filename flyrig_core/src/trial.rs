//! Trial sequencing state machine.
//!
//! Decides, every polling tick, whether the fly is being tracked, whether a
//! trial is recording, and when to transition between automatic phases.
//! Operator commands arrive on a channel and are applied before the
//! automatic logic, so manual always wins.

use crate::cell::Guarded;
use crate::config::TrialCfg;
use crate::error::{Result, RigError};
use crate::service::{LoopBody, LoopTiming, Service};
use crate::tracker::TrackerHandle;
use crate::vision::VisionHandle;
use crossbeam_channel::{Receiver, Sender, unbounded};
use eyre::WrapErr;
use flyrig_traits::{BoxedError, Clock, FlyDispenser, TrialSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Phase of the automatic trial sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    /// Idle, waiting to see the fly.
    Started,
    /// Fly seen; waiting out the confirmation window.
    FlyDetected,
    /// Trial recording.
    Run,
    /// Fly absent; waiting out the grace window.
    FlyLost,
    /// Returning the stage to the arena center.
    MovingToCenter,
}

/// Operator command, applied ahead of the automatic transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManualCommand {
    /// Resume automatic sequencing from idle.
    Start,
    /// Stop any running trial and hold in manual idle.
    Stop,
    /// Send the stage back to the arena center.
    Center,
    /// Constant-velocity operator motion.
    Jog { vel_x: f64, vel_y: f64 },
    /// End a jog.
    NoJog,
    /// Ask the dispenser for a new fly now.
    ReleaseFly,
}

struct TrialShared {
    phase: Guarded<TrialPhase>,
    trial_dir: Guarded<Option<PathBuf>>,
    trial_count: AtomicU32,
}

/// Cheap cloneable handle for commanding and observing the sequencer.
#[derive(Clone)]
pub struct TrialHandle {
    tx: Sender<ManualCommand>,
    shared: Arc<TrialShared>,
}

impl TrialHandle {
    pub fn send(&self, cmd: ManualCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::warn!(?cmd, "trial sequencer is gone; command dropped");
        }
    }

    pub fn phase(&self) -> TrialPhase {
        self.shared.phase.get()
    }

    pub fn trial_dir(&self) -> Option<PathBuf> {
        self.shared.trial_dir.get()
    }

    pub fn trial_count(&self) -> u32 {
        self.shared.trial_count.load(Ordering::Relaxed)
    }
}

/// Loop body of the trial sequencer.
pub struct TrialLoop {
    vision: VisionHandle,
    tracker: TrackerHandle,
    dispenser: Option<Box<dyn FlyDispenser>>,
    sinks: Vec<Box<dyn TrialSink>>,
    cfg: TrialCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    rx: Receiver<ManualCommand>,
    shared: Arc<TrialShared>,
    phase: TrialPhase,
    prev_phase: TrialPhase,
    auto_enabled: bool,
    timer_start: Option<Instant>,
    trial_count: u32,
    trial_open: bool,
    exp_dir: PathBuf,
}

impl TrialLoop {
    pub fn new(
        vision: VisionHandle,
        tracker: TrackerHandle,
        mut dispenser: Option<Box<dyn FlyDispenser>>,
        sinks: Vec<Box<dyn TrialSink>>,
        cfg: TrialCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<(Self, TrialHandle)> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let exp_dir = cfg.data_dir.join(format!("exp-{stamp}"));
        std::fs::create_dir_all(&exp_dir)
            .wrap_err_with(|| format!("creating experiment directory {}", exp_dir.display()))?;
        tracing::info!(dir = %exp_dir.display(), "experiment directory created");

        if let Some(d) = dispenser.as_mut() {
            best_effort(d.name(), "start_logging", d.start_logging(&exp_dir));
        }

        let (tx, rx) = unbounded();
        let shared = Arc::new(TrialShared {
            phase: Guarded::new(TrialPhase::Started),
            trial_dir: Guarded::new(None),
            trial_count: AtomicU32::new(0),
        });
        let handle = TrialHandle {
            tx,
            shared: shared.clone(),
        };
        Ok((
            Self {
                vision,
                tracker,
                dispenser,
                sinks,
                cfg,
                clock,
                rx,
                shared,
                phase: TrialPhase::Started,
                prev_phase: TrialPhase::Started,
                auto_enabled: true,
                timer_start: None,
                trial_count: 0,
                trial_open: false,
                exp_dir,
            },
            handle,
        ))
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    pub fn exp_dir(&self) -> &PathBuf {
        &self.exp_dir
    }

    /// One sequencer tick: operator commands first, then the automatic
    /// transition for the current phase.
    pub fn step(&mut self) -> Result<()> {
        while let Ok(cmd) = self.rx.try_recv() {
            self.apply_manual(cmd);
        }
        // The centering phase completes even while automatic sequencing is
        // held off, so a manual Center still comes back to idle.
        if !self.auto_enabled && self.phase != TrialPhase::MovingToCenter {
            return Ok(());
        }

        let present = self.vision.fly_present();
        let now = self.clock.now();

        match self.phase {
            TrialPhase::Started => {
                if present {
                    tracing::info!("fly possibly found");
                    self.timer_start = Some(now);
                    self.tracker.start_tracking();
                    self.set_phase(TrialPhase::FlyDetected);
                }
            }
            TrialPhase::FlyDetected => {
                if !present {
                    tracing::info!("fly lost before confirmation");
                    self.timer_start = Some(now);
                    self.prev_phase = TrialPhase::FlyDetected;
                    self.tracker.stop_tracking();
                    self.set_phase(TrialPhase::FlyLost);
                } else if self.timer_elapsed(now) >= self.cfg.fly_detected_timeout {
                    tracing::info!("fly found");
                    self.start_trial()?;
                    self.prev_phase = TrialPhase::FlyDetected;
                    self.set_phase(TrialPhase::Run);
                }
            }
            TrialPhase::Run => {
                if !present {
                    tracing::info!("fly possibly lost");
                    self.timer_start = Some(now);
                    self.prev_phase = TrialPhase::Run;
                    self.set_phase(TrialPhase::FlyLost);
                }
            }
            TrialPhase::FlyLost => {
                if present {
                    tracing::info!("fly located again");
                    self.timer_start = Some(now);
                    self.tracker.start_tracking();
                    let resumed = self.prev_phase;
                    self.set_phase(resumed);
                } else if self.timer_elapsed(now) >= self.cfg.fly_lost_timeout {
                    if self.prev_phase == TrialPhase::Run {
                        tracing::info!("fly is gone");
                        self.stop_trial();
                    }
                    self.tracker.start_moving_to_center();
                    self.prev_phase = TrialPhase::FlyLost;
                    self.set_phase(TrialPhase::MovingToCenter);
                }
            }
            TrialPhase::MovingToCenter => {
                if self.tracker.is_close_to_center() {
                    if self.cfg.release_on_center {
                        self.release_fly();
                    }
                    self.prev_phase = TrialPhase::MovingToCenter;
                    self.set_phase(TrialPhase::Started);
                }
            }
        }
        Ok(())
    }

    fn apply_manual(&mut self, cmd: ManualCommand) {
        match cmd {
            ManualCommand::Start => {
                tracing::info!("manual start; automatic sequencing enabled");
                self.auto_enabled = true;
                self.timer_start = None;
                self.set_phase(TrialPhase::Started);
            }
            ManualCommand::Stop => {
                tracing::info!("manual stop; automatic sequencing disabled");
                self.stop_trial();
                self.tracker.stop_tracking();
                self.tracker.stop_manual();
                self.auto_enabled = false;
                self.set_phase(TrialPhase::Started);
            }
            ManualCommand::Center => {
                tracing::info!("manual center");
                self.stop_trial();
                self.tracker.stop_tracking();
                self.tracker.start_moving_to_center();
                self.prev_phase = self.phase;
                self.set_phase(TrialPhase::MovingToCenter);
            }
            ManualCommand::Jog { vel_x, vel_y } => {
                self.tracker.set_manual_velocity(vel_x, vel_y);
            }
            ManualCommand::NoJog => {
                self.tracker.stop_manual();
            }
            ManualCommand::ReleaseFly => {
                self.release_fly();
            }
        }
    }

    fn timer_elapsed(&self, now: Instant) -> Duration {
        self.timer_start
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }

    fn set_phase(&mut self, phase: TrialPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase;
        self.shared.phase.set(phase);
    }

    /// Begin trial bookkeeping: directory, telemetry streams, collaborator
    /// notifications. Stream opening is essential and propagates; sink
    /// notifications are best-effort.
    fn start_trial(&mut self) -> Result<()> {
        self.trial_count += 1;
        self.shared
            .trial_count
            .store(self.trial_count, Ordering::Relaxed);
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let dir = self
            .exp_dir
            .join(format!("trial-{}-{stamp}", self.trial_count));
        std::fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("creating trial directory {}", dir.display()))?;
        tracing::info!(trial = self.trial_count, dir = %dir.display(), "trial started");

        self.tracker.start_tracking();
        self.tracker.start_logging(&dir.join("stage.csv"))?;
        self.vision.start_logging(&dir.join("vision.csv"))?;
        for sink in &mut self.sinks {
            best_effort(sink.name(), "start_logging", sink.start_logging(&dir));
            best_effort(sink.name(), "trial_started", sink.trial_started(&dir));
        }
        self.shared.trial_dir.set(Some(dir));
        self.trial_open = true;
        Ok(())
    }

    /// Close the current trial. A no-op when no trial is open, so a manual
    /// stop racing the automatic close is harmless.
    fn stop_trial(&mut self) {
        if !self.trial_open {
            return;
        }
        tracing::info!(trial = self.trial_count, "trial stopped");
        self.tracker.stop_logging();
        self.vision.stop_logging();
        let dir = self.shared.trial_dir.get();
        for sink in &mut self.sinks {
            best_effort(sink.name(), "stop_logging", sink.stop_logging());
            if let Some(dir) = &dir {
                best_effort(sink.name(), "trial_stopped", sink.trial_stopped(dir));
            }
        }
        self.tracker.stop_tracking();
        self.trial_open = false;
    }

    fn release_fly(&mut self) {
        match self.dispenser.as_mut() {
            Some(d) => best_effort(d.name(), "release_fly", d.release_fly()),
            None => tracing::warn!("dispenser not connected; release the fly manually"),
        }
    }
}

impl LoopBody for TrialLoop {
    fn tick(&mut self) -> Result<()> {
        self.step()
    }

    fn on_stop(&mut self) {
        // Flush any open trial before the worker exits.
        self.stop_trial();
    }
}

/// Single chokepoint for non-essential collaborator calls: failures become
/// one structured warning, never a trial abort.
fn best_effort(service: &str, op: &str, result: std::result::Result<(), BoxedError>) {
    if let Err(e) = result {
        tracing::warn!(service, op, error = %e, "best-effort collaborator call failed");
    }
}

/// Trial sequencer worker plus its handle.
pub struct Trial {
    service: Service,
    handle: TrialHandle,
}

impl Trial {
    #[allow(clippy::type_complexity)]
    pub fn new(
        vision: VisionHandle,
        tracker: TrackerHandle,
        dispenser: Option<Box<dyn FlyDispenser>>,
        sinks: Vec<Box<dyn TrialSink>>,
        cfg: TrialCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self> {
        if cfg.loop_period.is_zero() {
            return Err(eyre::Report::new(RigError::Config(
                "trial loop_period must be > 0".to_string(),
            )));
        }
        let timing = LoopTiming::fixed(cfg.loop_period);
        let (body, handle) = TrialLoop::new(vision, tracker, dispenser, sinks, cfg, clock.clone())?;
        let service = Service::new("trial", timing, Box::new(body), clock);
        Ok(Self { service, handle })
    }

    pub fn handle(&self) -> TrialHandle {
        self.handle.clone()
    }

    pub fn start(&mut self) -> Result<()> {
        self.service.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.service.stop()
    }

    pub fn average_period(&self) -> Option<Duration> {
        self.service.average_period()
    }
}
