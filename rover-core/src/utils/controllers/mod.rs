//! Module Exports
//!
//! This file exports the modules that turn received commands into actuator
//! output.
//!
//! - `command`: text protocol decoding and the command mailbox.
//! - `motion`: pure mapping from a command to motor and servo duties.
//! - `control`: the periodic task that applies the mapping to the actuators.

pub mod command;
pub mod control;
pub mod motion;

use embedded_hal::pwm::SetDutyCycle;

pub use command::{Action, DecodedCommand, COMMAND_MAILBOX};
pub use motion::{MotionOutput, MotorState, MAX_DUTY};

/// Errors raised while writing duties to the PWM channels.
#[derive(Debug)]
pub enum ActuatorError<E: core::fmt::Debug> {
    Motor { channel: usize, error: E },
    Servo(E),
}

/// The four H-bridge inputs (IN1..IN4) and the steering servo.
///
/// Duties are expressed in `0..=MAX_DUTY` and scaled to each channel's own
/// resolution with `set_duty_cycle_fraction`.
pub struct Actuators<PM, PS> {
    motors: [PM; 4],
    servo: PS,
}

impl<PM, PS> Actuators<PM, PS>
where
    PM: SetDutyCycle,
    PS: SetDutyCycle,
{
    pub fn new(
        motors: [PM; 4],
        servo: PS,
    ) -> Self {
        Actuators { motors, servo }
    }

    /// Write all four motor duties.
    ///
    /// Every channel is written even if an earlier one fails; the first error
    /// is returned.
    pub fn apply_motors(
        &mut self,
        state: &MotorState,
    ) -> Result<(), ActuatorError<PM::Error>> {
        let mut result = Ok(());
        for (channel, (pwm, &duty)) in self.motors.iter_mut().zip(state.duties.iter()).enumerate()
        {
            if let Err(error) = pwm.set_duty_cycle_fraction(duty.min(MAX_DUTY), MAX_DUTY) {
                if result.is_ok() {
                    result = Err(ActuatorError::Motor { channel, error });
                }
            }
        }
        result
    }

    pub fn apply_servo(
        &mut self,
        duty: u16,
    ) -> Result<(), ActuatorError<PS::Error>> {
        self.servo
            .set_duty_cycle_fraction(duty.min(MAX_DUTY), MAX_DUTY)
            .map_err(ActuatorError::Servo)
    }

    /// Zero all motor inputs.
    pub fn stop_all(&mut self) -> Result<(), ActuatorError<PM::Error>> {
        self.apply_motors(&MotorState::STOPPED)
    }

    pub fn release(self) -> ([PM; 4], PS) {
        (self.motors, self.servo)
    }
}
