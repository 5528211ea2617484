//! Properties of the tracking control law: deadzone, gain linearity, and the
//! velocity/acceleration clamps.

use flyrig_core::ControlLaw;
use proptest::prelude::*;

fn law() -> ControlLaw {
    ControlLaw {
        gain: 7.54,
        deadzone: 8.5e-3,
        max_abs_vel: 0.75,
        max_abs_acc: 0.25,
    }
}

proptest! {
    #[test]
    fn deadzone_yields_zero(offset in -8.5e-3..=8.5e-3f64) {
        prop_assert_eq!(law().velocity_from_fly_pos(offset), 0.0);
    }

    #[test]
    fn gain_is_linear_outside_deadzone(
        offset in prop_oneof![8.6e-3..0.5f64, -0.5..-8.6e-3f64]
    ) {
        let l = law();
        let vel = l.velocity_from_fly_pos(offset);
        prop_assert!((vel - l.gain * offset).abs() < 1e-12);
    }

    #[test]
    fn velocity_clamp_is_idempotent(vel in -10.0..10.0f64) {
        let l = law();
        let once = l.clamp_velocity(vel);
        prop_assert_eq!(l.clamp_velocity(once), once);
    }

    #[test]
    fn velocity_clamp_stays_within_limits(vel in -100.0..100.0f64) {
        let l = law();
        let clamped = l.clamp_velocity(vel);
        prop_assert!(clamped.abs() <= l.max_abs_vel);
    }

    #[test]
    fn acceleration_clamp_bounds_the_step(
        prev in -0.75..0.75f64,
        vel in -0.75..0.75f64,
        dt in 1e-4..0.1f64
    ) {
        let l = law();
        let limited = l.limit_acceleration(vel, prev, dt);
        prop_assert!((limited - prev).abs() <= l.max_abs_acc * dt + 1e-9);
    }

    #[test]
    fn acceleration_clamp_passes_gentle_changes(
        prev in -0.1..0.1f64,
        dt in 0.5..2.0f64
    ) {
        // a step well under max_abs_acc * dt is returned unchanged
        let l = law();
        let vel = prev + 0.01;
        prop_assert_eq!(l.limit_acceleration(vel, prev, dt), vel);
    }
}

#[test]
fn zero_dt_returns_prev_vel_unchanged() {
    let l = law();
    assert_eq!(l.limit_acceleration(0.5, 0.1, 0.0), 0.1);
    assert_eq!(l.limit_acceleration(-0.5, 0.1, 0.0), 0.1);
    // no delta, no clamp
    assert_eq!(l.limit_acceleration(0.1, 0.1, 0.0), 0.1);
}

#[test]
fn zero_dt_produces_no_nan() {
    let l = law();
    for (vel, prev) in [(0.75, -0.75), (-0.75, 0.75), (0.0, 0.0)] {
        assert!(l.limit_acceleration(vel, prev, 0.0).is_finite());
    }
}

#[test]
fn clamp_handles_infinite_input() {
    let l = law();
    assert_eq!(l.clamp_velocity(f64::INFINITY), l.max_abs_vel);
    assert_eq!(l.clamp_velocity(f64::NEG_INFINITY), -l.max_abs_vel);
}

#[test]
fn deadzone_boundary_is_inclusive() {
    let l = law();
    assert_eq!(l.velocity_from_fly_pos(l.deadzone), 0.0);
    assert_eq!(l.velocity_from_fly_pos(-l.deadzone), 0.0);
    assert!(l.velocity_from_fly_pos(l.deadzone + 1e-6) > 0.0);
}
