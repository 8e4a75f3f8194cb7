//! Differential-drive motion mapping.
//!
//! Maps a [`DecodedCommand`] to four H-bridge input duties and an optional servo
//! duty. The mapping is pure: the same command always yields the same output.
//!
//! Channel layout (`MotorState::duties`):
//!
//! | index | pin | motor | nonzero when   |
//! |-------|-----|-------|----------------|
//! | 0     | IN1 | left  | left reverses  |
//! | 1     | IN2 | left  | left forwards  |
//! | 2     | IN3 | right | right forwards |
//! | 3     | IN4 | right | right reverses |

use super::command::{Action, DecodedCommand};

/// Full-scale duty (10-bit PWM).
pub const MAX_DUTY: u16 = 1023;
pub const MAX_PERCENT: u16 = 100;

/// The slow side of a blended turn runs at 6/10 of the commanded duty.
const SLOW_NUM: u32 = 6;
const SLOW_DEN: u32 = 10;

pub const SERVO_MAX_ANGLE: u16 = 180;
pub const SERVO_MIN_DUTY: u16 = 20;
pub const SERVO_MAX_DUTY: u16 = 120;

/// Duties for IN1..IN4, each in `0..=MAX_DUTY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorState {
    pub duties: [u16; 4],
}

impl MotorState {
    pub const STOPPED: MotorState = MotorState { duties: [0; 4] };

    const fn new(
        in1: u16,
        in2: u16,
        in3: u16,
        in4: u16,
    ) -> Self {
        MotorState {
            duties: [in1, in2, in3, in4],
        }
    }

    /// `(IN1, IN2)` of the left motor.
    pub fn left(&self) -> (u16, u16) {
        (self.duties[0], self.duties[1])
    }

    /// `(IN3, IN4)` of the right motor.
    pub fn right(&self) -> (u16, u16) {
        (self.duties[2], self.duties[3])
    }
}

/// What the control loop should write this tick. `None` leaves the output as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionOutput {
    pub motors: Option<MotorState>,
    pub servo: Option<u16>,
}

/// Percentage (clamped to 100) scaled to the duty domain, rounding half up.
pub fn duty_for_percent(percent: u16) -> u16 {
    let percent = u32::from(percent.min(MAX_PERCENT));
    let max = u32::from(MAX_DUTY);
    let hundred = u32::from(MAX_PERCENT);
    ((max * percent + hundred / 2) / hundred) as u16
}

/// Slow-side duty of a blended turn: `floor(duty * 0.6)`.
pub fn slow_duty(duty: u16) -> u16 {
    (u32::from(duty) * SLOW_NUM / SLOW_DEN) as u16
}

/// Servo angle (clamped to 180°) mapped linearly onto `SERVO_MIN_DUTY..=SERVO_MAX_DUTY`.
pub fn servo_duty(angle: u16) -> u16 {
    let angle = u32::from(angle.min(SERVO_MAX_ANGLE));
    let span = u32::from(SERVO_MAX_DUTY - SERVO_MIN_DUTY);
    SERVO_MIN_DUTY + (angle * span / u32::from(SERVO_MAX_ANGLE)) as u16
}

/// Compute the actuator output for one command.
pub fn drive(command: DecodedCommand) -> MotionOutput {
    let d = duty_for_percent(command.magnitude);
    let s = slow_duty(d);

    let motors = match command.action {
        Action::Stop => MotorState::STOPPED,
        Action::Forward => MotorState::new(0, d, d, 0),
        Action::Backward => MotorState::new(d, 0, 0, d),
        // pivots: sides run in opposite senses at full duty
        Action::Left => MotorState::new(d, 0, d, 0),
        Action::Right => MotorState::new(0, d, 0, d),
        Action::ForwardLeft => MotorState::new(0, s, d, 0),
        Action::ForwardRight => MotorState::new(0, d, s, 0),
        Action::BackwardLeft => MotorState::new(s, 0, 0, d),
        Action::BackwardRight => MotorState::new(d, 0, 0, s),
        Action::Servo => {
            return MotionOutput {
                motors: None,
                servo: Some(servo_duty(command.magnitude)),
            }
        }
        Action::Unrecognized => return MotionOutput::default(),
    };

    MotionOutput {
        motors: Some(motors),
        servo: None,
    }
}
