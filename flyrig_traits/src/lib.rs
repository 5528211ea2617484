pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::path::Path;

/// Error type used at every hardware trait boundary. Implementations return
/// their own error kinds boxed; callers map them to typed errors.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Immutable snapshot of stage telemetry, produced once per driver round-trip.
///
/// Positions are meters in the stage coordinate frame; limit flags are true
/// when the corresponding end switch is pressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageStatus {
    pub pos_x: f64,
    pub pos_y: f64,
    pub lim_n: bool,
    pub lim_s: bool,
    pub lim_e: bool,
    pub lim_w: bool,
}

impl StageStatus {
    pub fn any_limit(&self) -> bool {
        self.lim_n || self.lim_s || self.lim_e || self.lim_w
    }
}

/// Immutable snapshot of one vision poll.
///
/// `x`/`y` are meters in the camera frame, centered on the optical axis.
/// An absent fly is a valid sample, not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlySample {
    pub present: bool,
    pub x: f64,
    pub y: f64,
    /// Body orientation in radians, when the source estimates one.
    pub angle: Option<f64>,
}

impl FlySample {
    pub fn absent() -> Self {
        Self {
            present: false,
            x: 0.0,
            y: 0.0,
            angle: None,
        }
    }

    pub fn at(x: f64, y: f64) -> Self {
        Self {
            present: true,
            x,
            y,
            angle: None,
        }
    }
}

/// Velocity command for the stage, meters per second per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityCommand {
    pub vel_x: f64,
    pub vel_y: f64,
}

impl VelocityCommand {
    pub const ZERO: Self = Self {
        vel_x: 0.0,
        vel_y: 0.0,
    };

    pub fn new(vel_x: f64, vel_y: f64) -> Self {
        Self { vel_x, vel_y }
    }
}

/// Synchronous request/response interface to the XY stage.
///
/// One `set_velocity` call performs one full command/telemetry round-trip.
pub trait StageDriver {
    fn set_velocity(&mut self, cmd: VelocityCommand) -> Result<StageStatus, BoxedError>;

    /// Command zero velocity before releasing the underlying channel.
    /// The stage must never be left moving and uncommanded.
    fn teardown(&mut self) -> Result<(), BoxedError>;
}

impl<T: StageDriver + ?Sized> StageDriver for Box<T> {
    fn set_velocity(&mut self, cmd: VelocityCommand) -> Result<StageStatus, BoxedError> {
        (**self).set_velocity(cmd)
    }

    fn teardown(&mut self) -> Result<(), BoxedError> {
        (**self).teardown()
    }
}

/// Best-effort source of fly position samples.
pub trait VisionSource {
    fn poll(&mut self) -> Result<FlySample, BoxedError>;
}

impl<T: VisionSource + ?Sized> VisionSource for Box<T> {
    fn poll(&mut self) -> Result<FlySample, BoxedError> {
        (**self).poll()
    }
}

/// Command sink for auxiliary trial hardware (opto, stimulus, temperature).
///
/// All calls are fire-and-forget from the trial sequencer's perspective;
/// failures are downgraded to operator warnings, never trial aborts.
pub trait TrialSink: Send {
    fn name(&self) -> &'static str;

    fn start_logging(&mut self, trial_dir: &Path) -> Result<(), BoxedError>;

    fn stop_logging(&mut self) -> Result<(), BoxedError>;

    fn trial_started(&mut self, _trial_dir: &Path) -> Result<(), BoxedError> {
        Ok(())
    }

    fn trial_stopped(&mut self, _trial_dir: &Path) -> Result<(), BoxedError> {
        Ok(())
    }
}

/// Fly dispenser: a trial sink that can also release a new subject into the
/// arena.
pub trait FlyDispenser: TrialSink {
    fn release_fly(&mut self) -> Result<(), BoxedError>;
}
