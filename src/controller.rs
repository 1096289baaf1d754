//! Feedback control of the excitation laser.
//!
//! The control law is a pluggable strategy selected at construction time.
//! The contract is deliberately small: the produced actuation value is always
//! clamped to the laser's `[min_power, max_power]` bounds, and an explicit
//! [`Laser::set_power`] overrides the value until the next
//! [`FeedbackController::adjust`] call recomputes it.
//!
//! The controller output for frame *n* takes effect from frame *n+1*: there
//! is no feedback loop within a single frame.

use crate::config::LaserConfig;

/// A stateless control law mapping a measured signal and a setpoint to a new
/// actuation value (before clamping).
pub trait ControlLaw: Send + Sync {
    fn actuate(&self, measured: f64, setpoint: f64) -> f64;
}

/// Proportional control: move toward the setpoint by `gain * error`.
#[derive(Debug, Clone, Copy)]
pub struct Proportional {
    pub gain: f64,
}

impl ControlLaw for Proportional {
    fn actuate(&self, measured: f64, setpoint: f64) -> f64 {
        measured + self.gain * (setpoint - measured)
    }
}

/// Threshold control: full power below the setpoint, off at or above it.
#[derive(Debug, Clone, Copy)]
pub struct Threshold {
    pub on_value: f64,
    pub off_value: f64,
}

impl ControlLaw for Threshold {
    fn actuate(&self, measured: f64, setpoint: f64) -> f64 {
        if measured < setpoint {
            self.on_value
        } else {
            self.off_value
        }
    }
}

/// The excitation laser: a bounded scalar actuator.
#[derive(Debug, Clone)]
pub struct Laser {
    power: f64,
    min_power: f64,
    max_power: f64,
}

impl Laser {
    pub fn new(config: &LaserConfig) -> Self {
        Self {
            power: config.current_power.clamp(config.min_power, config.max_power),
            min_power: config.min_power,
            max_power: config.max_power,
        }
    }

    /// Current power; always within bounds.
    pub fn power(&self) -> f64 {
        self.power
    }

    /// Sets the power explicitly, clamped to the configured bounds.
    pub fn set_power(&mut self, value: f64) {
        self.power = value.clamp(self.min_power, self.max_power);
    }
}

/// Applies a control law to the laser.
pub struct FeedbackController {
    law: Box<dyn ControlLaw>,
}

impl FeedbackController {
    pub fn new(law: Box<dyn ControlLaw>) -> Self {
        Self { law }
    }

    /// Recomputes the laser power from the measured signal and setpoint.
    /// The result is clamped by the laser itself.
    pub fn adjust(&self, laser: &mut Laser, measured: f64, setpoint: f64) {
        let value = self.law.actuate(measured, setpoint);
        laser.set_power(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn laser() -> Laser {
        Laser::new(&LaserConfig {
            current_power: 0.0,
            min_power: 0.0,
            max_power: 500.0,
        })
    }

    #[test]
    fn test_set_power_clamps_to_bounds() {
        let mut laser = laser();
        laser.set_power(1e9);
        assert_relative_eq!(laser.power(), 500.0);
        laser.set_power(-3.0);
        assert_relative_eq!(laser.power(), 0.0);
    }

    #[test]
    fn test_proportional_law() {
        let controller = FeedbackController::new(Box::new(Proportional { gain: 0.5 }));
        let mut laser = laser();
        controller.adjust(&mut laser, 100.0, 200.0);
        assert_relative_eq!(laser.power(), 150.0);
    }

    #[test]
    fn test_threshold_law() {
        let controller = FeedbackController::new(Box::new(Threshold {
            on_value: 400.0,
            off_value: 0.0,
        }));
        let mut laser = laser();
        controller.adjust(&mut laser, 5.0, 10.0);
        assert_relative_eq!(laser.power(), 400.0);
        controller.adjust(&mut laser, 20.0, 10.0);
        assert_relative_eq!(laser.power(), 0.0);
    }

    #[test]
    fn test_explicit_set_overrides_until_next_adjust() {
        let controller = FeedbackController::new(Box::new(Proportional { gain: 1.0 }));
        let mut laser = laser();
        laser.set_power(42.0);
        assert_relative_eq!(laser.power(), 42.0);
        controller.adjust(&mut laser, 0.0, 300.0);
        assert_relative_eq!(laser.power(), 300.0);
    }
}
