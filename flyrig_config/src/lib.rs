#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the fly tracking rig.
//!
//! `Config` and its sub-structs are deserialized from TOML and validated
//! before any hardware is touched. Every field has a default matching the
//! physical rig, so a missing config file yields a usable setup for the
//! simulated stage.

use serde::Deserialize;
use std::path::Path;

/// Serial link to the stage microcontroller.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StageCfg {
    /// Serial port device (e.g. "/dev/ttyACM0"). None selects simulation.
    pub port: Option<String>,
    pub baud: u32,
    /// Round-trip cadence budget for the stage link (ms).
    pub loop_period_ms: u64,
}

impl Default for StageCfg {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            loop_period_ms: 10,
        }
    }
}

/// Camera polling service.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VisionCfg {
    /// Iteration budget for the vision poll loop (ms).
    pub loop_period_ms: u64,
}

impl Default for VisionCfg {
    fn default() -> Self {
        Self { loop_period_ms: 10 }
    }
}

/// Closed-loop tracking controller.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrackingCfg {
    /// Control loop period (ms). Both the throttle floor and the slow-iteration
    /// budget are set to this value.
    pub loop_period_ms: u64,
    /// Crossover frequency of the proportional law (Hz); gain = 2*pi*fc.
    pub crossover_hz: f64,
    /// No corrective velocity is issued inside this radius (m).
    pub deadzone_m: f64,
    /// Hard velocity ceiling per axis (m/s).
    pub max_abs_vel: f64,
    /// Hard acceleration ceiling per axis (m/s^2).
    pub max_abs_acc: f64,
    /// Proportional gain for goto/centering moves (1/s).
    pub manual_gain: f64,
    /// Velocity ceiling for goto and jog moves (m/s); smaller than max_abs_vel.
    pub max_manual_vel: f64,
    /// Fixed jog speed for operator arrow-key motion (m/s).
    pub jog_vel: f64,
    /// Remembered center of the arena in the homed frame (m).
    pub center_x: f64,
    pub center_y: f64,
    /// Arrival tolerance for goto/centering moves (m).
    pub center_tol_m: f64,
    /// Speed used to drive toward the S/W limit switches while homing (m/s).
    pub home_vel: f64,
    /// Upper bound for blocking moves (goto, homing) before giving up (ms).
    pub move_timeout_ms: u64,
    /// Consecutive stage protocol failures tolerated before the tracker
    /// worker escalates and stops.
    pub max_protocol_failures: u32,
}

impl Default for TrackingCfg {
    fn default() -> Self {
        Self {
            loop_period_ms: 5,
            crossover_hz: 1.2,
            deadzone_m: 8.5e-3,
            max_abs_vel: 0.75,
            max_abs_acc: 0.25,
            manual_gain: 6.283,
            max_manual_vel: 0.03,
            jog_vel: 0.02,
            center_x: 0.401,
            center_y: 0.405,
            center_tol_m: 1e-3,
            home_vel: 0.02,
            move_timeout_ms: 60_000,
            max_protocol_failures: 5,
        }
    }
}

/// Trial sequencing state machine.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrialCfg {
    /// Sequencer poll period (ms).
    pub loop_period_ms: u64,
    /// Continuous presence required before a trial starts (ms).
    pub fly_detected_timeout_ms: u64,
    /// Continuous absence tolerated before a trial stops (ms).
    pub fly_lost_timeout_ms: u64,
    /// Root directory for experiment data. One exp-<timestamp> directory is
    /// created per run, with one trial-<n>-<timestamp> directory per trial.
    pub data_dir: String,
    /// Ask the dispenser for a new fly once the stage is re-centered.
    pub release_on_center: bool,
}

impl Default for TrialCfg {
    fn default() -> Self {
        Self {
            loop_period_ms: 10,
            fly_detected_timeout_ms: 2_000,
            fly_lost_timeout_ms: 2_000,
            data_dir: "data".to_string(),
            release_on_center: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub stage: StageCfg,
    pub vision: VisionCfg,
    pub tracking: TrackingCfg,
    pub trial: TrialCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("failed to read config {}: {e}", path.display()))?;
    let cfg = load_toml(&content)
        .map_err(|e| eyre::eyre!("failed to parse config {}: {e}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    /// Reject configs that would make the controller unsafe or undefined.
    pub fn validate(&self) -> eyre::Result<()> {
        let t = &self.tracking;
        if t.loop_period_ms == 0 {
            eyre::bail!("tracking.loop_period_ms must be >= 1");
        }
        if !(t.crossover_hz.is_finite() && t.crossover_hz > 0.0) {
            eyre::bail!("tracking.crossover_hz must be finite and > 0");
        }
        if !(t.deadzone_m.is_finite() && t.deadzone_m >= 0.0) {
            eyre::bail!("tracking.deadzone_m must be finite and >= 0");
        }
        if !(t.max_abs_vel.is_finite() && t.max_abs_vel > 0.0) {
            eyre::bail!("tracking.max_abs_vel must be finite and > 0");
        }
        if !(t.max_abs_acc.is_finite() && t.max_abs_acc > 0.0) {
            eyre::bail!("tracking.max_abs_acc must be finite and > 0");
        }
        if !(t.manual_gain.is_finite() && t.manual_gain > 0.0) {
            eyre::bail!("tracking.manual_gain must be finite and > 0");
        }
        if !(t.max_manual_vel.is_finite() && t.max_manual_vel > 0.0) {
            eyre::bail!("tracking.max_manual_vel must be finite and > 0");
        }
        if t.max_manual_vel > t.max_abs_vel {
            eyre::bail!("tracking.max_manual_vel must not exceed tracking.max_abs_vel");
        }
        if !(t.jog_vel.is_finite() && t.jog_vel > 0.0 && t.jog_vel <= t.max_manual_vel) {
            eyre::bail!("tracking.jog_vel must be in (0, max_manual_vel]");
        }
        if !(t.center_tol_m.is_finite() && t.center_tol_m > 0.0) {
            eyre::bail!("tracking.center_tol_m must be finite and > 0");
        }
        if !(t.home_vel.is_finite() && t.home_vel > 0.0) {
            eyre::bail!("tracking.home_vel must be finite and > 0");
        }
        if t.move_timeout_ms == 0 {
            eyre::bail!("tracking.move_timeout_ms must be >= 1");
        }
        if t.max_protocol_failures == 0 {
            eyre::bail!("tracking.max_protocol_failures must be >= 1");
        }

        if self.vision.loop_period_ms == 0 {
            eyre::bail!("vision.loop_period_ms must be >= 1");
        }

        let tr = &self.trial;
        if tr.loop_period_ms == 0 {
            eyre::bail!("trial.loop_period_ms must be >= 1");
        }
        if tr.data_dir.is_empty() {
            eyre::bail!("trial.data_dir must not be empty");
        }

        if self.stage.baud == 0 {
            eyre::bail!("stage.baud must be > 0");
        }
        Ok(())
    }
}
