//! Property tests for the numeric and time-ring invariants.

use canopy::config::PidGains;
use canopy::control::pid::Pid;
use canopy::control::scheduler::is_time_in_range;
use canopy::control::setpoint::SetpointEngine;
use canopy::control::scheduler::ClimateMode;
use canopy::drivers::modbus::crc16;
use canopy::psychro;
use canopy::store::types::SetpointRecord;
use canopy::zone::Zone;
use proptest::prelude::*;

proptest! {
    // ── Psychrometrics ────────────────────────────────────────

    /// RH stays inside [0, 100] and VPD never goes negative for any
    /// physically representable input, plausible or not.
    #[test]
    fn psychrometric_bounds(
        t_dry in -40.0f64..60.0,
        depression in -5.0f64..40.0,
        pressure in 800.0f64..1100.0,
    ) {
        let t_wet = t_dry - depression;
        let rh = psychro::relative_humidity(t_dry, t_wet, pressure);
        prop_assert!((0.0..=100.0).contains(&rh), "rh = {rh}");
        let vpd = psychro::vapor_pressure_deficit(t_dry, t_wet, pressure);
        prop_assert!(vpd >= 0.0, "vpd = {vpd}");
    }

    #[test]
    fn dewpoint_rh_bounds(temp in -40.0f64..50.0, dew_offset in 0.0f64..30.0) {
        let rh = psychro::rh_from_dewpoint(temp, temp - dew_offset);
        prop_assert!((0.0..=100.0).contains(&rh));
    }

    // ── PID ───────────────────────────────────────────────────

    /// Integrator magnitude never exceeds the clamp, whatever the error
    /// history looks like.
    #[test]
    fn pid_anti_windup(
        errors in proptest::collection::vec(-1000.0f64..1000.0, 1..200),
        ki in 0.0f64..2.0,
    ) {
        let mut pid = Pid::new(PidGains { kp: 1.0, ki, kd: 0.1 }, 100);
        for error in errors {
            let output = pid.compute(error, 0.0, 1.0);
            prop_assert!(pid.integral().abs() <= 100.0);
            prop_assert!((0.0..=100.0).contains(&output));
        }
    }

    /// Over one full period of stable duty, ON-time matches duty within a
    /// second at 1 Hz sampling.
    #[test]
    fn pwm_duty_conservation(duty in 0.0f64..=100.0, period in 10u64..300) {
        let mut pid = Pid::new(PidGains { kp: 0.0, ki: 0.0, kd: 0.0 }, period);
        let mut on_seconds: i64 = 0;
        for second in 0..period {
            if pid.pwm_state(duty, (second * 1000) as i64) {
                on_seconds += 1;
            }
        }
        let expected = duty / 100.0 * period as f64;
        prop_assert!(
            (on_seconds as f64 - expected).abs() <= 1.0,
            "duty {duty}% over {period}s: on {on_seconds}s, expected {expected:.1}s"
        );
    }

    // ── Scheduler ring ────────────────────────────────────────

    /// Overnight wrap: membership is exactly `t >= start || t < end`.
    #[test]
    fn overnight_wrap(t in 0u16..1440, start in 0u16..1440, end in 0u16..1440) {
        prop_assume!(start > end);
        let expected = t >= start || t < end;
        prop_assert_eq!(is_time_in_range(t, start, end), expected);
    }

    /// The empty interval contains nothing.
    #[test]
    fn empty_interval(t in 0u16..1440, s in 0u16..1440) {
        prop_assert!(!is_time_in_range(t, s, s));
    }

    /// Every minute belongs to the interval or its complement, never both.
    #[test]
    fn interval_partition(t in 0u16..1440, start in 0u16..1440, end in 0u16..1440) {
        prop_assume!(start != end);
        let inside = is_time_in_range(t, start, end);
        let complement = is_time_in_range(t, end, start);
        prop_assert!(inside != complement);
    }

    // ── Setpoint ramps ────────────────────────────────────────

    /// A ramp from a to b stays inside [min(a,b), max(a,b)] and lands
    /// exactly on b once the duration has elapsed.
    #[test]
    fn ramp_monotone_and_exact(
        a in -10.0f64..40.0,
        b in -10.0f64..40.0,
        duration in 1i64..120,
    ) {
        let zone = Zone::new("Flower Room", "front");
        let mut engine = SetpointEngine::new();
        let record_a = SetpointRecord {
            heating_setpoint: Some(a),
            ramp_in_duration: Some(duration),
            ..Default::default()
        };
        let record_b = SetpointRecord {
            heating_setpoint: Some(b),
            ramp_in_duration: Some(duration),
            ..Default::default()
        };
        // Establish a as the effective value, then flip modes to b.
        engine.compute(&zone, 0, Some(ClimateMode::Night), &record_a, |_| None);
        let start_ms = 60_000;
        engine.compute(&zone, start_ms, Some(ClimateMode::Day), &record_b, |_| None);

        let lo = a.min(b);
        let hi = a.max(b);
        for minute in 0..=(duration + 5) {
            let (out, _) = engine.compute(
                &zone,
                start_ms + minute * 60_000,
                Some(ClimateMode::Day),
                &record_b,
                |_| None,
            );
            let effective = out.effective.heating.unwrap();
            prop_assert!(
                effective >= lo - 1e-9 && effective <= hi + 1e-9,
                "effective {effective} outside [{lo}, {hi}]"
            );
            if minute >= duration {
                prop_assert!((effective - b).abs() < 1e-9);
                prop_assert_eq!(out.ramp_progress.heating, None);
            }
        }
    }

    // ── Modbus CRC ────────────────────────────────────────────

    /// Any single-byte corruption is detected (CRC-16 catches all bursts
    /// of eight bits or fewer).
    #[test]
    fn crc_detects_single_byte_corruption(
        mut frame in proptest::collection::vec(any::<u8>(), 4..64),
        index in any::<proptest::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let original = crc16(&frame);
        let at = index.index(frame.len());
        frame[at] ^= flip;
        prop_assert_ne!(crc16(&frame), original);
    }
}
