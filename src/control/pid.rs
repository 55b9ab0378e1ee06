//! Discrete PID with slow software PWM.
//!
//! One controller per (zone, device, setpoint type): integrator state must
//! survive priority switches between setpoint types, so each type keeps its
//! own history. Anti-windup is integrator clamping to ±100. Output is a
//! 0-100 % duty cycle which the PWM stage turns into ON/OFF over a long
//! period (default 100 s) — relays, not transistors, are switching.

use crate::config::PidGains;

/// Integrator clamp, both signs.
const INTEGRAL_LIMIT: f64 = 100.0;
/// Duty change below this does not restart the PWM cycle.
const DUTY_JITTER: f64 = 0.1;

pub struct Pid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pwm_period_secs: u64,

    integral: f64,
    last_error: f64,
    primed: bool,

    pwm_start_ms: Option<i64>,
    duty_cycle: f64,
}

impl Pid {
    pub fn new(gains: PidGains, pwm_period_secs: u64) -> Self {
        Self {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            pwm_period_secs: pwm_period_secs.max(1),
            integral: 0.0,
            last_error: 0.0,
            primed: false,
            pwm_start_ms: None,
            duty_cycle: 0.0,
        }
    }

    /// One control step; `dt` in seconds. Returns 0-100 %.
    pub fn compute(&mut self, setpoint: f64, measured: f64, dt: f64) -> f64 {
        let error = setpoint - measured;

        let p = self.kp * error;

        self.integral = (self.integral + error * dt).clamp(-INTEGRAL_LIMIT, INTEGRAL_LIMIT);
        let i = self.ki * self.integral;

        // Derivative is skipped on the first sample after a reset.
        let d = if self.primed && dt > 0.0 {
            self.kd * (error - self.last_error) / dt
        } else {
            0.0
        };

        self.last_error = error;
        self.primed = true;

        (p + i + d).clamp(0.0, 100.0)
    }

    /// ON/OFF decision for the slow PWM at `now_ms` given a new output.
    ///
    /// A duty change beyond the jitter threshold restarts the cycle timer;
    /// within a cycle the output is ON for the first `duty% × period`.
    pub fn pwm_state(&mut self, pid_output: f64, now_ms: i64) -> bool {
        if (self.duty_cycle - pid_output).abs() > DUTY_JITTER {
            self.duty_cycle = pid_output;
            self.pwm_start_ms = Some(now_ms);
        }
        let start = *self.pwm_start_ms.get_or_insert(now_ms);

        let period_ms = (self.pwm_period_secs * 1000) as i64;
        let elapsed_ms = (now_ms - start).rem_euclid(period_ms);
        let on_ms = (self.duty_cycle / 100.0 * period_ms as f64) as i64;
        elapsed_ms < on_ms
    }

    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Drop the integrator and derivative history (climate-mode switches).
    pub fn reset_integrator(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.primed = false;
    }

    /// Swap gains in place without touching the integrator.
    pub fn set_gains(&mut self, gains: PidGains) {
        self.kp = gains.kp;
        self.ki = gains.ki;
        self.kd = gains.kd;
    }

    pub fn gains(&self) -> PidGains {
        PidGains {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }
}
