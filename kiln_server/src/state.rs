//! Shared control state.
//!
//! One instance, owned by the scheduler, passed by exclusive reference
//! into every command handler and control step. No locks: all mutation
//! happens inside a single loop iteration's call chain.

use crate::control::PidGains;
use kiln_common::config::ControlConfig;
use std::time::{Duration, Instant};

/// Live regulation state.
#[derive(Debug, Clone)]
pub struct ControlState {
    /// Whether closed-loop control is active.
    pub regulating: bool,
    /// Target temperature [°C].
    pub set_point: f64,
    /// Controller sample period. Always positive.
    pub sample_period: Duration,
    /// Controller coefficients.
    pub gains: PidGains,
    /// Most recent temperature sample [°C].
    pub last_temperature: f64,
    /// When the last control step ran. `None` means a step is due
    /// immediately once regulation is enabled.
    pub last_sample_time: Option<Instant>,
    /// Last voltage command sent to the supply [V]. Forced to zero while
    /// not regulating.
    pub actuator_command: f64,
}

impl ControlState {
    /// Build the boot state from configuration. Regulation starts
    /// disabled; the remote client arms it over the wire.
    pub fn from_config(config: &ControlConfig) -> Self {
        Self {
            regulating: false,
            set_point: config.set_point,
            sample_period: Duration::from_secs_f64(config.sample_period_s),
            gains: PidGains {
                kp: config.kp,
                ki: config.ki,
                kd: config.kd,
                out_max: config.out_max,
            },
            last_temperature: 0.0,
            last_sample_time: None,
            actuator_command: 0.0,
        }
    }

    /// Change the sample period. Returns `false` (state unchanged) for
    /// non-positive or non-finite values, preserving the
    /// `sample_period > 0` invariant.
    pub fn set_sample_period(&mut self, seconds: f64) -> bool {
        if !seconds.is_finite() || seconds <= 0.0 {
            return false;
        }
        self.sample_period = Duration::from_secs_f64(seconds);
        true
    }

    /// True once `sample_period` has elapsed since the last step (or no
    /// step has run yet).
    #[inline]
    pub fn step_due(&self, now: Instant) -> bool {
        match self.last_sample_time {
            None => true,
            Some(t) => now.duration_since(t) >= self.sample_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ControlConfig {
        ControlConfig {
            set_point: 40.0,
            sample_period_s: 2.0,
            kp: 1.0,
            ki: 0.1,
            kd: 0.0,
            out_max: 30.0,
        }
    }

    #[test]
    fn boot_state_is_not_regulating() {
        let state = ControlState::from_config(&config());
        assert!(!state.regulating);
        assert_eq!(state.actuator_command, 0.0);
        assert!(state.last_sample_time.is_none());
        assert_eq!(state.sample_period, Duration::from_secs(2));
    }

    #[test]
    fn sample_period_rejects_non_positive() {
        let mut state = ControlState::from_config(&config());
        assert!(!state.set_sample_period(0.0));
        assert!(!state.set_sample_period(-1.0));
        assert!(!state.set_sample_period(f64::NAN));
        assert_eq!(state.sample_period, Duration::from_secs(2));

        assert!(state.set_sample_period(0.5));
        assert_eq!(state.sample_period, Duration::from_millis(500));
    }

    #[test]
    fn step_due_honors_period() {
        let mut state = ControlState::from_config(&config());
        let t0 = Instant::now();
        assert!(state.step_due(t0));

        state.last_sample_time = Some(t0);
        assert!(!state.step_due(t0 + Duration::from_millis(1999)));
        assert!(state.step_due(t0 + Duration::from_secs(2)));
    }
}
