//! Simulated stage and vision source for development and self-check.

use crate::protocol;
use flyrig_traits::{BoxedError, FlySample, StageDriver, StageStatus, VelocityCommand, VisionSource};
use std::time::{Duration, Instant};

/// Extent of the simulated table per axis (m). Kept below the i16 count
/// range of the wire protocol.
pub const TABLE_SIZE: f64 = 0.8;

// A stalled caller must not teleport the virtual stage on its next command.
const MAX_REAL_DT: f64 = 0.1;

/// Stage that integrates commanded velocity over time.
///
/// By default each call integrates the real elapsed time since the previous
/// command, so the virtual gantry moves at wall-clock speeds regardless of
/// how fast the caller polls. `with_step` switches to a fixed step per call
/// for deterministic tests.
pub struct SimulatedStage {
    pos_x: f64,
    pos_y: f64,
    step: Option<Duration>,
    last_command: Option<Instant>,
    torn_down: bool,
}

impl SimulatedStage {
    pub fn new() -> Self {
        Self {
            pos_x: TABLE_SIZE / 2.0,
            pos_y: TABLE_SIZE / 2.0,
            step: None,
            last_command: None,
            torn_down: false,
        }
    }

    /// Deterministic variant: advance by exactly `step` per command.
    pub fn with_step(step: Duration) -> Self {
        Self {
            step: Some(step),
            ..Self::new()
        }
    }

    /// Place the stage at a known position (tests).
    pub fn set_position(&mut self, x: f64, y: f64) {
        self.pos_x = x.clamp(0.0, TABLE_SIZE);
        self.pos_y = y.clamp(0.0, TABLE_SIZE);
    }

    fn status(&self) -> StageStatus {
        StageStatus {
            pos_x: quantize(self.pos_x),
            pos_y: quantize(self.pos_y),
            lim_n: self.pos_y >= TABLE_SIZE,
            lim_s: self.pos_y <= 0.0,
            lim_e: self.pos_x >= TABLE_SIZE,
            lim_w: self.pos_x <= 0.0,
        }
    }
}

impl Default for SimulatedStage {
    fn default() -> Self {
        Self::new()
    }
}

// Reported positions carry the wire resolution so tests see what the real
// driver would report.
fn quantize(pos: f64) -> f64 {
    (pos / protocol::METERS_PER_COUNT).round() * protocol::METERS_PER_COUNT
}

impl StageDriver for SimulatedStage {
    fn set_velocity(&mut self, cmd: VelocityCommand) -> Result<StageStatus, BoxedError> {
        if self.torn_down {
            return Err(Box::new(crate::error::HwError::Comm(
                "stage link already released".to_string(),
            )));
        }
        // Run the command through the real codec so overspeed and non-finite
        // values fail the same way they would on hardware.
        protocol::encode_velocity(cmd).map_err(|e| Box::new(e) as BoxedError)?;
        let now = Instant::now();
        let dt = match self.step {
            Some(step) => step.as_secs_f64(),
            None => self
                .last_command
                .map_or(0.0, |t| now.duration_since(t).as_secs_f64().min(MAX_REAL_DT)),
        };
        self.last_command = Some(now);
        self.pos_x = (self.pos_x + cmd.vel_x * dt).clamp(0.0, TABLE_SIZE);
        self.pos_y = (self.pos_y + cmd.vel_y * dt).clamp(0.0, TABLE_SIZE);
        Ok(self.status())
    }

    fn teardown(&mut self) -> Result<(), BoxedError> {
        self.torn_down = true;
        Ok(())
    }
}

/// Vision source that replays a fixed sequence of samples, then repeats the
/// last one.
pub struct ScriptedVision {
    seq: Vec<FlySample>,
    idx: usize,
}

impl ScriptedVision {
    pub fn new(seq: impl Into<Vec<FlySample>>) -> Self {
        Self {
            seq: seq.into(),
            idx: 0,
        }
    }
}

impl VisionSource for ScriptedVision {
    fn poll(&mut self) -> Result<FlySample, BoxedError> {
        let sample = if self.idx < self.seq.len() {
            let s = self.seq[self.idx];
            self.idx += 1;
            s
        } else {
            self.seq.last().copied().unwrap_or_else(FlySample::absent)
        };
        Ok(sample)
    }
}

/// Vision source simulating a fly pacing a small circle around the optical
/// axis. Deterministic; used by `run --sim` and the self-check.
pub struct WanderingVision {
    radius: f64,
    step_rad: f64,
    phase: f64,
}

impl WanderingVision {
    pub fn new(radius: f64, step_rad: f64) -> Self {
        Self {
            radius,
            step_rad,
            phase: 0.0,
        }
    }
}

impl Default for WanderingVision {
    fn default() -> Self {
        // ~12 mm orbit, one revolution every few hundred polls
        Self::new(12e-3, 0.02)
    }
}

impl VisionSource for WanderingVision {
    fn poll(&mut self) -> Result<FlySample, BoxedError> {
        self.phase += self.step_rad;
        Ok(FlySample {
            present: true,
            x: self.radius * self.phase.cos(),
            y: self.radius * self.phase.sin(),
            angle: Some(self.phase),
        })
    }
}
