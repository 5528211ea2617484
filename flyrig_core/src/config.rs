//! Runtime configuration for the core services.
//!
//! These are the structs the controllers actually consume. They are separate
//! from the TOML-deserialized schemas in `flyrig_config`; see `conversions`
//! for the bridge.

use std::path::PathBuf;
use std::time::Duration;

/// Position tracking controller configuration. Distances in meters, speeds
/// in m/s, gains in 1/s.
#[derive(Debug, Clone)]
pub struct TrackingCfg {
    /// Control loop period; throttle floor and slow-iteration budget.
    pub loop_period: Duration,
    /// Proportional gain of the fly-position law.
    pub gain: f64,
    /// No corrective velocity inside this radius of the optical axis.
    pub deadzone: f64,
    /// Velocity ceiling per axis.
    pub max_abs_vel: f64,
    /// Acceleration ceiling per axis.
    pub max_abs_acc: f64,
    /// Proportional gain of goto/centering moves.
    pub manual_gain: f64,
    /// Velocity ceiling for goto and jog moves.
    pub max_manual_vel: f64,
    /// Fixed operator jog speed.
    pub jog_vel: f64,
    /// Remembered arena center in the homed frame.
    pub center_x: f64,
    pub center_y: f64,
    /// Arrival tolerance for goto moves.
    pub center_tol: f64,
    /// Speed toward the S/W switches while homing.
    pub home_vel: f64,
    /// Bound on blocking moves (goto, homing legs).
    pub move_timeout: Duration,
    /// Consecutive protocol failures tolerated before the worker escalates.
    pub max_protocol_failures: u32,
}

impl Default for TrackingCfg {
    fn default() -> Self {
        Self {
            loop_period: Duration::from_millis(5),
            gain: 2.0 * std::f64::consts::PI * 1.2,
            deadzone: 8.5e-3,
            max_abs_vel: 0.75,
            max_abs_acc: 0.25,
            manual_gain: 2.0 * std::f64::consts::PI,
            max_manual_vel: 0.03,
            jog_vel: 0.02,
            center_x: 0.401,
            center_y: 0.405,
            center_tol: 1e-3,
            home_vel: 0.02,
            move_timeout: Duration::from_secs(60),
            max_protocol_failures: 5,
        }
    }
}

/// Vision polling service configuration.
#[derive(Debug, Clone)]
pub struct VisionCfg {
    pub loop_period: Duration,
}

impl Default for VisionCfg {
    fn default() -> Self {
        Self {
            loop_period: Duration::from_millis(10),
        }
    }
}

/// Trial sequencer configuration.
#[derive(Debug, Clone)]
pub struct TrialCfg {
    pub loop_period: Duration,
    /// Continuous presence required before a trial starts.
    pub fly_detected_timeout: Duration,
    /// Continuous absence tolerated before a trial stops.
    pub fly_lost_timeout: Duration,
    /// Root for exp-<timestamp>/trial-<n>-<timestamp> directories.
    pub data_dir: PathBuf,
    /// Ask the dispenser for a new fly once re-centered.
    pub release_on_center: bool,
}

impl Default for TrialCfg {
    fn default() -> Self {
        Self {
            loop_period: Duration::from_millis(10),
            fly_detected_timeout: Duration::from_secs(2),
            fly_lost_timeout: Duration::from_secs(2),
            data_dir: PathBuf::from("data"),
            release_on_center: true,
        }
    }
}
