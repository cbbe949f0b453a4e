use hover_proto::telemetry::{Phase, Setpoint};
use serde::Serialize;

use crate::safety::SafetyBoundExceeded;
use crate::telemetry::Channel;

/// Everything the control loop mutates between commands.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub phase: Phase,
    pub thrust: i32,
    pub pitch: f64,
    pub roll: f64,
    pub yaw_rate: f64,
    pub last_accel_deviation: f64,
    pub last_gyro_deviation: f64,
}

impl ControlState {
    pub fn new(trim_roll: f64, trim_pitch: f64) -> Self {
        Self {
            phase: Phase::Connecting,
            thrust: 0,
            pitch: trim_pitch,
            roll: trim_roll,
            yaw_rate: 0.0,
            last_accel_deviation: 0.0,
            last_gyro_deviation: 0.0,
        }
    }

    pub fn setpoint(&self) -> Setpoint {
        Setpoint::new(self.roll, self.pitch, self.yaw_rate, self.thrust)
    }
}

/// Sensor readings captured at calibration, treated as "stable" for the rest
/// of the flight.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Baselines {
    pub gyro_rate: f64,
    pub vertical_acc: f64,
    pub altitude: f64,
}

impl Baselines {
    /// Channels calibrated at session start, in calibration order.
    pub const CHANNELS: [Channel; 3] = [Channel::GYRO_RATE, Channel::VERTICAL_ACC, Channel::ALTITUDE];

    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::GYRO_RATE => Some(self.gyro_rate),
            Channel::VERTICAL_ACC => Some(self.vertical_acc),
            Channel::ALTITUDE => Some(self.altitude),
            _ => None,
        }
    }

    pub fn set(&mut self, channel: Channel, value: f64) {
        match channel {
            Channel::GYRO_RATE => self.gyro_rate = value,
            Channel::VERTICAL_ACC => self.vertical_acc = value,
            Channel::ALTITUDE => self.altitude = value,
            _ => {}
        }
    }
}

/// Outcome of a session whose control loop ran to completion.
#[derive(Debug, Clone, Serialize)]
pub struct FlightReport {
    pub final_phase: Phase,
    pub baselines: Baselines,
    pub hover_iterations: u32,
    pub abort: Option<SafetyBoundExceeded>,
    pub touchdown_detected: bool,
    pub last_hover_thrust: i32,
    pub setpoints_sent: u32,
}
