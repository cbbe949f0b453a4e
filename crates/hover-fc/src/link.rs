use async_trait::async_trait;
use hover_proto::telemetry::Setpoint;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::telemetry::Channel;

/// Largest log packet payload the vehicle will stream, in bytes.
pub const MAX_LOG_PAYLOAD_BYTES: usize = 26;
/// Every logged variable is a 32-bit float.
pub const LOG_VARIABLE_BYTES: usize = 4;

/// Events raised by a link, delivered in order on one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    ConnectionFailed(String),
    ConnectionLost(String),
    Disconnected,
    DataReceived {
        group: String,
        timestamp_ms: u64,
        values: BTreeMap<String, f64>,
    },
    LogError {
        group: String,
        message: String,
    },
}

/// A set of variables the vehicle streams together at a fixed period.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogGroup {
    pub name: String,
    pub period_ms: u64,
    pub variables: Vec<String>,
}

impl LogGroup {
    pub fn new(name: &str, period_ms: u64, channels: &[Channel]) -> Self {
        Self {
            name: name.into(),
            period_ms,
            variables: channels.iter().map(|c| c.var_name().to_string()).collect(),
        }
    }

    pub fn payload_bytes(&self) -> usize {
        self.variables.len() * LOG_VARIABLE_BYTES
    }

    /// Checks the group against a variable catalog and the packet size limit.
    pub fn validate<'a>(&self, catalog: impl IntoIterator<Item = &'a str>) -> Result<(), LogConfigError> {
        if self.variables.is_empty() {
            return Err(LogConfigError::EmptyGroup { group: self.name.clone() });
        }
        if self.period_ms == 0 {
            return Err(LogConfigError::InvalidPeriod { group: self.name.clone() });
        }
        if self.payload_bytes() > MAX_LOG_PAYLOAD_BYTES {
            return Err(LogConfigError::PayloadTooLarge {
                group: self.name.clone(),
                bytes: self.payload_bytes(),
                max: MAX_LOG_PAYLOAD_BYTES,
            });
        }
        let catalog: Vec<&str> = catalog.into_iter().collect();
        if let Some(missing) = self.variables.iter().find(|v| !catalog.contains(&v.as_str())) {
            return Err(LogConfigError::UnknownVariable {
                group: self.name.clone(),
                variable: missing.clone(),
            });
        }
        Ok(())
    }

    pub fn covers(&self, channel: Channel) -> bool {
        self.variables.iter().any(|v| v == channel.var_name())
    }
}

/// The two groups the controller flies with. Putting all eight variables in
/// one group overflows a log packet.
pub fn default_log_groups() -> Vec<LogGroup> {
    vec![
        LogGroup::new(
            "baro",
            10,
            &[Channel::StabilizerRoll, Channel::BaroAsl, Channel::GyroX, Channel::GyroY, Channel::GyroZ],
        ),
        LogGroup::new("acc", 10, &[Channel::AccX, Channel::AccY, Channel::AccZ]),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogConfigError {
    #[error("log group {group}: {variable} not found in the vehicle catalog")]
    UnknownVariable { group: String, variable: String },
    #[error("log group {group}: {bytes} bytes exceeds the {max} byte log packet")]
    PayloadTooLarge { group: String, bytes: usize, max: usize },
    #[error("log group {group} has no variables")]
    EmptyGroup { group: String },
    #[error("log group {group} has a zero period")]
    InvalidPeriod { group: String },
    #[error("log group {group}: link not connected")]
    NotConnected { group: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link not connected")]
    NotConnected,
    #[error("link closed")]
    Closed,
    #[error("link transport: {0}")]
    Transport(String),
}

/// A command/telemetry link to one vehicle.
///
/// Connection outcome and telemetry arrive asynchronously on the event sender
/// handed to `connect`. Setpoints are fire-and-forget: the vehicle never
/// acknowledges them.
#[async_trait]
pub trait VehicleLink: Send + Sync + 'static {
    async fn connect(&self, uri: &str, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError>;

    /// Starts streaming a log group. Only valid once connected.
    async fn subscribe(&self, group: &LogGroup) -> Result<(), LogConfigError>;

    async fn send_setpoint(&self, setpoint: Setpoint) -> Result<(), LinkError>;

    /// Releases the link. Callers make sure nothing else is in flight.
    async fn close(&self) -> Result<(), LinkError>;
}
