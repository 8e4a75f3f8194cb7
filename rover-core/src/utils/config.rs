//! Startup configuration for the rover.
//!
//! Every field has a default matching the reference hardware, so an empty JSON
//! object (or no config at all) yields a working setup.

use embassy_time::Duration;
use heapless::String;
use serde::{Deserialize, Serialize};

use crate::utils::{
    connection::uart::{Advertisement, APPEARANCE_GENERIC_COMPUTER, MAX_NAME_LEN},
    controllers::motion,
};

pub const DEFAULT_DEVICE_NAME: &str = "lightings";
pub const DEFAULT_ADV_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RX_BUFFER_LEN: usize = 100;
pub const DEFAULT_CONTROL_PERIOD_MS: u64 = 5;
pub const DEFAULT_MOTOR_PWM_HZ: u32 = 10_000;
pub const DEFAULT_SERVO_PWM_HZ: u32 = 50;
pub const DEFAULT_INITIAL_SERVO_ANGLE: u16 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoverConfig {
    /// Advertised GAP device name.
    pub device_name: String<MAX_NAME_LEN>,
    pub adv_interval_ms: u64,
    /// Stack-side buffer length for writes to the RX characteristic.
    pub rx_buffer_len: usize,
    pub control_period_ms: u64,
    pub motor_pwm_hz: u32,
    pub servo_pwm_hz: u32,
    /// Angle the servo is assumed to rest at. The servo is not driven until the
    /// first SERVO command arrives.
    pub initial_servo_angle: u16,
}

impl Default for RoverConfig {
    fn default() -> Self {
        RoverConfig {
            // fits: MAX_NAME_LEN > DEFAULT_DEVICE_NAME.len()
            device_name: String::try_from(DEFAULT_DEVICE_NAME).unwrap_or_default(),
            adv_interval_ms: DEFAULT_ADV_INTERVAL_MS,
            rx_buffer_len: DEFAULT_RX_BUFFER_LEN,
            control_period_ms: DEFAULT_CONTROL_PERIOD_MS,
            motor_pwm_hz: DEFAULT_MOTOR_PWM_HZ,
            servo_pwm_hz: DEFAULT_SERVO_PWM_HZ,
            initial_servo_angle: DEFAULT_INITIAL_SERVO_ANGLE,
        }
    }
}

impl RoverConfig {
    /// Parse a JSON document; missing fields fall back to their defaults.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// The fixed advertising payload derived from this config.
    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            name: self.device_name.clone(),
            appearance: APPEARANCE_GENERIC_COMPUTER,
            interval: Duration::from_millis(self.adv_interval_ms),
        }
    }

    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }

    /// Servo duty matching `initial_servo_angle`, clamped like a SERVO command.
    pub fn initial_servo_duty(&self) -> u16 {
        motion::servo_duty(self.initial_servo_angle)
    }
}
