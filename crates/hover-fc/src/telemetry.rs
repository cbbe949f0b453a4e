use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::error::TelemetryError;

/// Telemetry variables the controller knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Channel {
    StabilizerRoll,
    BaroAsl,
    GyroX,
    GyroY,
    GyroZ,
    AccX,
    AccY,
    AccZ,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::StabilizerRoll,
        Channel::BaroAsl,
        Channel::GyroX,
        Channel::GyroY,
        Channel::GyroZ,
        Channel::AccX,
        Channel::AccY,
        Channel::AccZ,
    ];

    /// Yaw-axis gyro rate; negative while climbing on this airframe.
    pub const GYRO_RATE: Channel = Channel::GyroZ;
    /// Vertical acceleration in g; about 1.05 when stable.
    pub const VERTICAL_ACC: Channel = Channel::AccZ;
    pub const ALTITUDE: Channel = Channel::BaroAsl;

    /// Name of the variable in the vehicle's log catalog.
    pub fn var_name(self) -> &'static str {
        match self {
            Channel::StabilizerRoll => "stabilizer.roll",
            Channel::BaroAsl => "baro.asl",
            Channel::GyroX => "gyro.x",
            Channel::GyroY => "gyro.y",
            Channel::GyroZ => "gyro.z",
            Channel::AccX => "acc.x",
            Channel::AccY => "acc.y",
            Channel::AccZ => "acc.z",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.var_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown telemetry variable {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.var_name() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// Mean and population variance over the tail of a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub variance: f64,
    pub count: usize,
}

/// FIFO of the most recent values of one channel.
#[derive(Debug, Clone)]
pub struct ChannelWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl ChannelWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be greater than 0");
        Self { values: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Statistics over the last `min(n, len)` values; None when empty.
    pub fn stats(&self, n: usize) -> Option<WindowStats> {
        let count = n.min(self.values.len());
        if count == 0 {
            return None;
        }
        let tail = self.values.iter().skip(self.values.len() - count);
        let mean = tail.clone().sum::<f64>() / count as f64;
        let variance = tail.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        Some(WindowStats { mean, variance, count })
    }
}

/// One window per known channel, constructed once per session. Each window
/// has its own lock: delivery writes while the control loop reads.
#[derive(Debug)]
pub struct TelemetryAggregator {
    windows: Vec<Mutex<ChannelWindow>>,
    capacity: usize,
}

impl TelemetryAggregator {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let windows = Channel::ALL
            .iter()
            .map(|_| Mutex::new(ChannelWindow::new(capacity)))
            .collect();
        Self { windows, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn add_sample(&self, channel: Channel, value: f64) {
        self.window(channel).push(value);
    }

    pub fn last(&self, channel: Channel) -> Result<f64, TelemetryError> {
        self.window(channel)
            .last()
            .ok_or(TelemetryError::EmptyWindow(channel))
    }

    pub fn average(&self, channel: Channel, n: usize) -> Result<WindowStats, TelemetryError> {
        self.window(channel)
            .stats(n)
            .ok_or(TelemetryError::NoData(channel))
    }

    pub fn len(&self, channel: Channel) -> usize {
        self.window(channel).len()
    }

    fn window(&self, channel: Channel) -> MutexGuard<'_, ChannelWindow> {
        // a push cannot panic halfway, so a poisoned window is still whole
        self.windows[channel.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
