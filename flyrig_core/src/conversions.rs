//! `From` implementations bridging `flyrig_config` types to `flyrig_core`
//! types.
//!
//! Millisecond fields become `Duration`s and the crossover frequency becomes
//! the proportional gain, so the controllers never re-derive units.

use crate::config::{TrackingCfg, TrialCfg, VisionCfg};
use std::path::PathBuf;
use std::time::Duration;

// ── TrackingCfg ──────────────────────────────────────────────────────────────

impl From<&flyrig_config::TrackingCfg> for TrackingCfg {
    fn from(c: &flyrig_config::TrackingCfg) -> Self {
        Self {
            loop_period: Duration::from_millis(c.loop_period_ms),
            gain: 2.0 * std::f64::consts::PI * c.crossover_hz,
            deadzone: c.deadzone_m,
            max_abs_vel: c.max_abs_vel,
            max_abs_acc: c.max_abs_acc,
            manual_gain: c.manual_gain,
            max_manual_vel: c.max_manual_vel,
            jog_vel: c.jog_vel,
            center_x: c.center_x,
            center_y: c.center_y,
            center_tol: c.center_tol_m,
            home_vel: c.home_vel,
            move_timeout: Duration::from_millis(c.move_timeout_ms),
            max_protocol_failures: c.max_protocol_failures,
        }
    }
}

// ── VisionCfg ────────────────────────────────────────────────────────────────

impl From<&flyrig_config::VisionCfg> for VisionCfg {
    fn from(c: &flyrig_config::VisionCfg) -> Self {
        Self {
            loop_period: Duration::from_millis(c.loop_period_ms),
        }
    }
}

// ── TrialCfg ─────────────────────────────────────────────────────────────────

impl From<&flyrig_config::TrialCfg> for TrialCfg {
    fn from(c: &flyrig_config::TrialCfg) -> Self {
        Self {
            loop_period: Duration::from_millis(c.loop_period_ms),
            fly_detected_timeout: Duration::from_millis(c.fly_detected_timeout_ms),
            fly_lost_timeout: Duration::from_millis(c.fly_lost_timeout_ms),
            data_dir: PathBuf::from(&c.data_dir),
            release_on_center: c.release_on_center,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossover_frequency_becomes_gain() {
        let cfg = flyrig_config::TrackingCfg::default();
        let core: TrackingCfg = (&cfg).into();
        let expected = 2.0 * std::f64::consts::PI * cfg.crossover_hz;
        assert!((core.gain - expected).abs() < 1e-12);
    }

    #[test]
    fn milliseconds_become_durations() {
        let cfg = flyrig_config::TrialCfg::default();
        let core: TrialCfg = (&cfg).into();
        assert_eq!(core.fly_detected_timeout, Duration::from_secs(2));
        assert_eq!(core.loop_period, Duration::from_millis(10));
    }
}
