use std::time::Duration;
use thiserror::Error;

use crate::link::LinkError;
use crate::telemetry::Channel;

/// A statistic was requested before the channel had any samples.
/// Callers retry after a delay; this is never terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TelemetryError {
    #[error("no samples recorded for {0}")]
    EmptyWindow(Channel),
    #[error("no data to average for {0}")]
    NoData(Channel),
}

/// Failures that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection to {uri} failed: {reason}")]
    ConnectionFailed { uri: String, reason: String },
    #[error("connection to {uri} lost: {reason}")]
    ConnectionLost { uri: String, reason: String },
    #[error("link disconnected before the vehicle came up")]
    Disconnected,
    #[error("calibration of {channel} gave up after {waited:?}")]
    CalibrationTimeout { channel: Channel, waited: Duration },
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("control task failed: {0}")]
    ControlTask(String),
}
