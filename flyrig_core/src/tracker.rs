//! Closed-loop position tracking controller.
//!
//! Keeps the stage centered on the fly by turning the camera-frame offset
//! into a stage velocity under deadzone, gain, velocity-limit and
//! acceleration-limit constraints. Manual overrides (operator jog, goto
//! moves, homing) take precedence over automatic tracking.

use crate::cell::Guarded;
use crate::config::TrackingCfg;
use crate::error::{BuildError, Report, Result, RigError};
use crate::hw_error::map_hw_error;
use crate::service::{LoopBody, LoopTiming, Service};
use crate::telemetry::TelemetryStream;
use crate::util::within_tolerance;
use crate::vision::VisionHandle;
use eyre::WrapErr;
use flyrig_traits::{Clock, StageDriver, StageStatus, VelocityCommand};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const STAGE_LOG_HEADER: &str = "t,x,y";
/// Poll period for blocking waits (goto moves, homing legs).
const BLOCKING_POLL: Duration = Duration::from_millis(10);

/// Operator override, read once per control iteration. Position overrides
/// automatic tracking; velocity overrides both.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ManualOverride {
    #[default]
    None,
    Velocity {
        vel_x: f64,
        vel_y: f64,
    },
    Position {
        x: f64,
        y: f64,
    },
}

/// The pure control law: deadzone + linear gain, then velocity and
/// acceleration clamps.
#[derive(Debug, Clone, Copy)]
pub struct ControlLaw {
    pub gain: f64,
    pub deadzone: f64,
    pub max_abs_vel: f64,
    pub max_abs_acc: f64,
}

impl ControlLaw {
    /// Corrective velocity for a camera-frame offset. Zero inside the
    /// deadzone, proportional outside.
    pub fn velocity_from_fly_pos(&self, offset: f64) -> f64 {
        if offset.abs() <= self.deadzone {
            0.0
        } else {
            self.gain * offset
        }
    }

    pub fn clamp_velocity(&self, vel: f64) -> f64 {
        if vel <= -self.max_abs_vel {
            -self.max_abs_vel
        } else if vel >= self.max_abs_vel {
            self.max_abs_vel
        } else {
            vel
        }
    }

    /// Cap the step from `prev_vel` so the implied acceleration never exceeds
    /// the limit. With `dt == 0` the acceleration is treated as infinite in
    /// the sign of the delta, so the clamp deterministically returns
    /// `prev_vel` rather than dividing by zero.
    pub fn limit_acceleration(&self, vel: f64, prev_vel: f64, dt: f64) -> f64 {
        let acc = Self::acceleration(vel, prev_vel, dt);
        if acc <= -self.max_abs_acc {
            prev_vel - self.max_abs_acc * dt
        } else if acc >= self.max_abs_acc {
            prev_vel + self.max_abs_acc * dt
        } else {
            vel
        }
    }

    fn acceleration(vel: f64, prev_vel: f64, dt: f64) -> f64 {
        let dv = vel - prev_vel;
        if dt != 0.0 {
            dv / dt
        } else if dv < 0.0 {
            f64::NEG_INFINITY
        } else if dv > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }
}

impl From<&TrackingCfg> for ControlLaw {
    fn from(cfg: &TrackingCfg) -> Self {
        Self {
            gain: cfg.gain,
            deadzone: cfg.deadzone,
            max_abs_vel: cfg.max_abs_vel,
            max_abs_acc: cfg.max_abs_acc,
        }
    }
}

struct TrackerShared {
    override_cmd: Guarded<ManualOverride>,
    tracking: AtomicBool,
    status: Guarded<Option<StageStatus>>,
    last_cmd: Guarded<VelocityCommand>,
    home_requested: AtomicBool,
    log: Mutex<TelemetryStream>,
}

/// Cheap cloneable handle for commanding the tracker from other threads.
#[derive(Clone)]
pub struct TrackerHandle {
    shared: Arc<TrackerShared>,
    cfg: TrackingCfg,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl TrackerHandle {
    /// Enable the automatic fly-position law.
    pub fn start_tracking(&self) {
        self.shared.tracking.store(true, Ordering::Relaxed);
    }

    /// Disable the automatic fly-position law; the stage coasts to zero
    /// under the acceleration limit.
    pub fn stop_tracking(&self) {
        self.shared.tracking.store(false, Ordering::Relaxed);
    }

    pub fn is_tracking(&self) -> bool {
        self.shared.tracking.load(Ordering::Relaxed)
    }

    /// Operator jog at a fixed velocity, clamped to the manual ceiling.
    pub fn set_manual_velocity(&self, vel_x: f64, vel_y: f64) {
        let limit = self.cfg.max_manual_vel;
        self.shared.override_cmd.set(ManualOverride::Velocity {
            vel_x: vel_x.clamp(-limit, limit),
            vel_y: vel_y.clamp(-limit, limit),
        });
    }

    pub fn jog_north(&self) {
        self.set_manual_velocity(0.0, self.cfg.jog_vel);
    }

    pub fn jog_south(&self) {
        self.set_manual_velocity(0.0, -self.cfg.jog_vel);
    }

    pub fn jog_east(&self) {
        self.set_manual_velocity(self.cfg.jog_vel, 0.0);
    }

    pub fn jog_west(&self) {
        self.set_manual_velocity(-self.cfg.jog_vel, 0.0);
    }

    /// Clear any manual override.
    pub fn stop_manual(&self) {
        self.shared.override_cmd.set(ManualOverride::None);
    }

    /// Begin a non-blocking goto toward the remembered center. Poll
    /// `is_close_to_center` for completion.
    pub fn start_moving_to_center(&self) {
        self.shared.override_cmd.set(ManualOverride::Position {
            x: self.cfg.center_x,
            y: self.cfg.center_y,
        });
    }

    pub fn is_close_to_center(&self) -> bool {
        self.shared.status.get().is_some_and(|st| {
            within_tolerance(
                self.cfg.center_x - st.pos_x,
                self.cfg.center_y - st.pos_y,
                self.cfg.center_tol,
            )
        })
    }

    /// Blocking goto: set a position override, then poll telemetry until the
    /// stage arrives or `move_timeout` elapses. Blocks the calling thread;
    /// must never be called from the tracker's own worker.
    pub fn move_to_position(&self, x: f64, y: f64) -> Result<()> {
        self.shared
            .override_cmd
            .set(ManualOverride::Position { x, y });
        let started = self.clock.now();
        loop {
            if let Some(st) = self.shared.status.get()
                && within_tolerance(x - st.pos_x, y - st.pos_y, self.cfg.center_tol)
            {
                self.shared.override_cmd.set(ManualOverride::None);
                return Ok(());
            }
            if self.clock.now().saturating_duration_since(started) >= self.cfg.move_timeout {
                self.shared.override_cmd.set(ManualOverride::None);
                return Err(Report::new(RigError::Timeout))
                    .wrap_err_with(|| format!("moving to ({x:.3}, {y:.3})"));
            }
            self.clock.sleep(BLOCKING_POLL);
        }
    }

    /// Ask the worker to re-home the stage on its next iteration: drive to
    /// the S/W switches, re-zero the coordinate frame, then return to the
    /// remembered center. Stalls the control cadence for the duration.
    pub fn request_home(&self) {
        self.shared.home_requested.store(true, Ordering::Relaxed);
    }

    /// Latest stage telemetry snapshot, in the homed frame.
    pub fn status(&self) -> Option<StageStatus> {
        self.shared.status.get()
    }

    /// Velocity most recently issued to the stage.
    pub fn last_command(&self) -> VelocityCommand {
        self.shared.last_cmd.get()
    }

    pub fn manual_override(&self) -> ManualOverride {
        self.shared.override_cmd.get()
    }

    pub fn start_logging(&self, path: &Path) -> Result<()> {
        self.lock_log()
            .open(path)
            .map_err(|e| eyre::eyre!("opening stage log {}: {e}", path.display()))
    }

    pub fn stop_logging(&self) {
        self.lock_log().close();
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, TelemetryStream> {
        self.shared.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Loop body closing the camera-to-stage feedback loop. One stage round-trip
/// per iteration.
pub struct TrackerLoop<D: StageDriver> {
    driver: D,
    vision: VisionHandle,
    shared: Arc<TrackerShared>,
    law: ControlLaw,
    cfg: TrackingCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    last_time: Option<Instant>,
    prev_vel: VelocityCommand,
    protocol_failures: u32,
    origin_x: f64,
    origin_y: f64,
}

impl<D: StageDriver> TrackerLoop<D> {
    pub fn new(
        driver: D,
        vision: VisionHandle,
        cfg: TrackingCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<(Self, TrackerHandle)> {
        validate(&cfg)?;
        let shared = Arc::new(TrackerShared {
            override_cmd: Guarded::new(ManualOverride::None),
            tracking: AtomicBool::new(false),
            status: Guarded::new(None),
            last_cmd: Guarded::new(VelocityCommand::ZERO),
            home_requested: AtomicBool::new(false),
            log: Mutex::new(TelemetryStream::new(STAGE_LOG_HEADER)),
        });
        let handle = TrackerHandle {
            shared: shared.clone(),
            cfg: cfg.clone(),
            clock: clock.clone(),
        };
        let epoch = clock.now();
        let law = ControlLaw::from(&cfg);
        Ok((
            Self {
                driver,
                vision,
                shared,
                law,
                cfg,
                clock,
                epoch,
                last_time: None,
                prev_vel: VelocityCommand::ZERO,
                protocol_failures: 0,
                origin_x: 0.0,
                origin_y: 0.0,
            },
            handle,
        ))
    }

    /// One control iteration: plan a velocity, clamp it, issue it.
    pub fn step(&mut self) -> Result<()> {
        if self.shared.home_requested.swap(false, Ordering::Relaxed) {
            return self.run_homing();
        }

        let now = self.clock.now();
        let dt = self
            .last_time
            .map_or(0.0, |t| now.saturating_duration_since(t).as_secs_f64());

        let target = self.plan_velocity();
        let cmd = VelocityCommand::new(
            self.law
                .limit_acceleration(self.law.clamp_velocity(target.vel_x), self.prev_vel.vel_x, dt),
            self.law
                .limit_acceleration(self.law.clamp_velocity(target.vel_y), self.prev_vel.vel_y, dt),
        );

        if let Some(raw) = self.command(cmd)? {
            self.publish(raw);
            self.prev_vel = cmd;
            self.shared.last_cmd.set(cmd);
        }
        self.last_time = Some(now);
        Ok(())
    }

    /// Pick the velocity source for this iteration. First matching branch
    /// wins; the fly sample is only read when no override is active, so a
    /// manual override never invokes the tracking law.
    fn plan_velocity(&self) -> VelocityCommand {
        match self.shared.override_cmd.get() {
            ManualOverride::Position { x, y } => {
                let Some(st) = self.shared.status.get() else {
                    // no telemetry yet; hold still
                    return VelocityCommand::ZERO;
                };
                if within_tolerance(x - st.pos_x, y - st.pos_y, self.cfg.center_tol) {
                    self.shared.override_cmd.set(ManualOverride::None);
                    VelocityCommand::ZERO
                } else {
                    VelocityCommand::new(
                        self.goto_velocity(x - st.pos_x),
                        self.goto_velocity(y - st.pos_y),
                    )
                }
            }
            ManualOverride::Velocity { vel_x, vel_y } => VelocityCommand::new(vel_x, vel_y),
            ManualOverride::None => {
                if self.shared.tracking.load(Ordering::Relaxed) {
                    match self.vision.sample() {
                        Some(s) if s.present => VelocityCommand::new(
                            self.law.velocity_from_fly_pos(s.x),
                            self.law.velocity_from_fly_pos(s.y),
                        ),
                        _ => VelocityCommand::ZERO,
                    }
                } else {
                    VelocityCommand::ZERO
                }
            }
        }
    }

    fn goto_velocity(&self, err: f64) -> f64 {
        (self.cfg.manual_gain * err).clamp(-self.cfg.max_manual_vel, self.cfg.max_manual_vel)
    }

    /// Issue one velocity command. Protocol faults are transient: the
    /// iteration is skipped and the fault escalates only after
    /// `max_protocol_failures` in a row. Communication faults are fatal to
    /// this worker immediately.
    fn command(&mut self, cmd: VelocityCommand) -> Result<Option<StageStatus>> {
        match self.driver.set_velocity(cmd) {
            Ok(status) => {
                self.protocol_failures = 0;
                Ok(Some(status))
            }
            Err(e) => match map_hw_error(&*e) {
                RigError::Protocol(msg) => {
                    self.protocol_failures += 1;
                    if self.protocol_failures >= self.cfg.max_protocol_failures {
                        let failures = self.protocol_failures;
                        Err(Report::new(RigError::Protocol(msg))).wrap_err_with(|| {
                            format!("{failures} consecutive stage protocol failures")
                        })
                    } else {
                        tracing::warn!(
                            failures = self.protocol_failures,
                            error = %msg,
                            "stage protocol error; skipping iteration"
                        );
                        Ok(None)
                    }
                }
                other => Err(Report::new(other)).wrap_err("stage velocity write"),
            },
        }
    }

    /// Publish telemetry in the homed frame and append to the stage log.
    fn publish(&self, raw: StageStatus) {
        let status = StageStatus {
            pos_x: raw.pos_x - self.origin_x,
            pos_y: raw.pos_y - self.origin_y,
            ..raw
        };
        self.shared.status.set(Some(status));
        let t = self
            .clock
            .now()
            .saturating_duration_since(self.epoch)
            .as_secs_f64();
        self.shared
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(format_args!(
                "{t:.6},{:.6},{:.6}",
                status.pos_x, status.pos_y
            ));
    }

    /// Blocking (re)initialization: drive to the S/W switches, latch the
    /// reported position as the frame origin, then proportional-move to the
    /// remembered center. Runs inline inside one iteration, stalling the
    /// cadence for its duration.
    fn run_homing(&mut self) -> Result<()> {
        tracing::info!("homing stage toward the S/W limit switches");
        let started = self.clock.now();
        let approach = VelocityCommand::new(-self.cfg.home_vel, -self.cfg.home_vel);
        loop {
            if let Some(raw) = self.command(approach)? {
                self.publish(raw);
                if raw.lim_s && raw.lim_w {
                    self.origin_x = raw.pos_x;
                    self.origin_y = raw.pos_y;
                    break;
                }
            }
            if self.clock.now().saturating_duration_since(started) >= self.cfg.move_timeout {
                let _ = self.command(VelocityCommand::ZERO);
                return Err(Report::new(RigError::Timeout))
                    .wrap_err("limit switches never tripped while homing");
            }
            self.clock.sleep(BLOCKING_POLL);
        }
        if let Some(raw) = self.command(VelocityCommand::ZERO)? {
            self.publish(raw);
        }
        tracing::info!(
            center_x = self.cfg.center_x,
            center_y = self.cfg.center_y,
            "stage homed; moving to center"
        );

        loop {
            let Some(st) = self.shared.status.get() else {
                return Err(Report::new(RigError::InvalidState(
                    "no stage telemetry after homing",
                )));
            };
            let err_x = self.cfg.center_x - st.pos_x;
            let err_y = self.cfg.center_y - st.pos_y;
            if within_tolerance(err_x, err_y, self.cfg.center_tol) {
                break;
            }
            let vel = VelocityCommand::new(self.goto_velocity(err_x), self.goto_velocity(err_y));
            if let Some(raw) = self.command(vel)? {
                self.publish(raw);
            }
            if self.clock.now().saturating_duration_since(started) >= self.cfg.move_timeout {
                let _ = self.command(VelocityCommand::ZERO);
                return Err(Report::new(RigError::Timeout))
                    .wrap_err("stage never reached center after homing");
            }
            self.clock.sleep(BLOCKING_POLL);
        }

        if let Some(raw) = self.command(VelocityCommand::ZERO)? {
            self.publish(raw);
        }
        self.prev_vel = VelocityCommand::ZERO;
        self.shared.last_cmd.set(VelocityCommand::ZERO);
        tracing::info!("stage centered");
        Ok(())
    }

    /// Never leave a moving stage uncommanded.
    fn fail_safe(&mut self) {
        if let Err(e) = self.driver.set_velocity(VelocityCommand::ZERO) {
            tracing::warn!(error = %e, "failed to zero stage velocity during shutdown");
        }
        if let Err(e) = self.driver.teardown() {
            tracing::warn!(error = %e, "stage teardown failed");
        }
        self.shared.last_cmd.set(VelocityCommand::ZERO);
        self.shared
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
    }
}

impl<D: StageDriver + Send> LoopBody for TrackerLoop<D> {
    fn tick(&mut self) -> Result<()> {
        self.step()
    }

    fn on_stop(&mut self) {
        self.fail_safe();
    }
}

fn validate(cfg: &TrackingCfg) -> Result<()> {
    let positive = [
        (cfg.gain, "gain must be > 0"),
        (cfg.max_abs_vel, "max_abs_vel must be > 0"),
        (cfg.max_abs_acc, "max_abs_acc must be > 0"),
        (cfg.manual_gain, "manual_gain must be > 0"),
        (cfg.max_manual_vel, "max_manual_vel must be > 0"),
        (cfg.jog_vel, "jog_vel must be > 0"),
        (cfg.center_tol, "center_tol must be > 0"),
        (cfg.home_vel, "home_vel must be > 0"),
    ];
    for (value, msg) in positive {
        if !(value.is_finite() && value > 0.0) {
            return Err(Report::new(BuildError::InvalidConfig(msg)));
        }
    }
    if !(cfg.deadzone.is_finite() && cfg.deadzone >= 0.0) {
        return Err(Report::new(BuildError::InvalidConfig(
            "deadzone must be >= 0",
        )));
    }
    if cfg.max_manual_vel > cfg.max_abs_vel {
        return Err(Report::new(BuildError::InvalidConfig(
            "max_manual_vel must not exceed max_abs_vel",
        )));
    }
    if cfg.loop_period.is_zero() {
        return Err(Report::new(BuildError::InvalidConfig(
            "loop_period must be > 0",
        )));
    }
    if cfg.max_protocol_failures == 0 {
        return Err(Report::new(BuildError::InvalidConfig(
            "max_protocol_failures must be >= 1",
        )));
    }
    Ok(())
}

/// Tracker worker plus its handle.
pub struct Tracker {
    service: Service,
    handle: TrackerHandle,
}

impl Tracker {
    pub fn new(
        driver: impl StageDriver + Send + 'static,
        vision: VisionHandle,
        cfg: TrackingCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self> {
        let timing = LoopTiming::fixed(cfg.loop_period);
        let (body, handle) = TrackerLoop::new(driver, vision, cfg, clock.clone())?;
        let service = Service::new("tracker", timing, Box::new(body), clock);
        Ok(Self { service, handle })
    }

    pub fn handle(&self) -> TrackerHandle {
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
