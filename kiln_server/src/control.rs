//! PID control law with backward Euler integration and output clamping.
//!
//! Zero Ki disables integral; zero Kd disables derivative. The heater
//! drive is unipolar, so output is clamped to `[0, out_max]`; while the
//! output sits on a clamp bound the integral is frozen to keep it from
//! winding up.

/// Internal state of the PID controller.
///
/// Preserves the integral accumulator and previous error across steps.
/// Must be reset (via [`PidState::reset`]) whenever regulation is
/// disabled or re-armed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidState {
    /// Integral accumulator.
    integral: f64,
    /// Previous error (for the derivative term).
    prev_error: f64,
    /// Whether a previous error sample exists.
    primed: bool,
}

impl PidState {
    /// Reset all internal state to zero.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current integral accumulator (diagnostics).
    #[inline]
    pub fn integral(&self) -> f64 {
        self.integral
    }
}

/// PID gains and output clamp.
#[derive(Debug, Clone, Copy)]
pub struct PidGains {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain (0 = disabled).
    pub ki: f64,
    /// Derivative gain (0 = disabled).
    pub kd: f64,
    /// Output saturation limit [V].
    pub out_max: f64,
}

/// Compute one PID step using backward Euler integration.
///
/// # Arguments
/// - `state`: Mutable PID internal state.
/// - `gains`: Controller gains.
/// - `error`: Current error (set point − measured) [°C].
/// - `dt`: Step period [s].
///
/// # Returns
/// Actuator command, clamped to `[0, gains.out_max]`.
pub fn pid_compute(state: &mut PidState, gains: &PidGains, error: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }

    // ── P term ──────────────────────────────────────────────
    let p_term = gains.kp * error;

    // ── I term (backward Euler, conditional integration) ────
    let i_term = if gains.ki != 0.0 {
        let candidate = state.integral + gains.ki * error * dt;
        // Freeze the accumulator while the unclamped output would sit
        // outside the actuator range and the error pushes it further out.
        let raw = p_term + candidate;
        if (0.0..=gains.out_max).contains(&raw) || raw.signum() != error.signum() {
            state.integral = candidate;
        }
        state.integral
    } else {
        state.integral = 0.0;
        0.0
    };

    // ── D term ──────────────────────────────────────────────
    let d_term = if gains.kd != 0.0 && state.primed {
        gains.kd * (error - state.prev_error) / dt
    } else {
        0.0
    };

    state.prev_error = error;
    state.primed = true;

    (p_term + i_term + d_term).clamp(0.0, gains.out_max)
}

// ─── Tests ──────────────────────────────────────────────────────────
