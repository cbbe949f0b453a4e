pub mod controller;
pub mod doctor;
pub mod error;
pub mod heuristics;
pub mod hooks;
pub mod link;
pub mod safety;
pub mod session;
pub mod sim;
pub mod state;
pub mod telemetry;

use serde::Deserialize;
use std::time::Duration;

use crate::link::{default_log_groups, LogGroup};

pub use controller::FlightController;
pub use error::{SessionError, TelemetryError};
pub use session::FlightSession;
pub use state::{Baselines, ControlState, FlightReport};
pub use telemetry::{Channel, TelemetryAggregator, WindowStats};

/// Which feedback paths feed the hover thrust correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorrectionPath {
    /// Vertical acceleration only.
    #[default]
    Accel,
    /// Vertical acceleration, plus the gyro-rate correction whenever the
    /// acceleration path asks for a change. Unreliable while yawing in circles.
    AccelAndGyro,
}

/// Tuning for one flight. Defaults are the values the airframe was tuned with;
/// change them only with a reason.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    /// Link address, e.g. "radio://0/80/250K" or "sim://hover".
    pub uri: String,

    /// Telemetry log groups to subscribe once connected. Each group must fit
    /// in one log packet, which is why the sensors are split across two.
    pub groups: Vec<LogGroup>,

    /// Samples kept per channel.
    pub window_capacity: usize,

    /// Emit a sample summary every N packets of a group.
    pub sample_summary_every: u64,

    /// Wait before the first calibration read.
    pub calibration_settle_ms: u64,
    /// Delay between calibration retries while a channel still averages to zero.
    pub calibration_poll_ms: u64,
    /// Samples averaged into a baseline.
    pub calibration_window: usize,
    /// Give up calibrating after this long. None waits forever.
    pub calibration_timeout_ms: Option<u64>,

    /// Sleep after every paced setpoint.
    pub pacing_ms: u64,

    /// Attitude trim flown outside the hover phase.
    pub trim_roll: f64,
    pub trim_pitch: f64,

    pub takeoff_start_thrust: i32,
    pub takeoff_end_thrust: i32,
    pub takeoff_step: i32,
    /// Thrust held for one command between takeoff and hover.
    pub takeoff_hold_thrust: i32,

    pub hover_iterations: u32,
    /// Added to both roll and pitch to drift in a circle.
    pub hover_attitude_offset: f64,
    pub hover_yaw_rate: f64,
    /// Added to the acc.z baseline to compensate for the hover attitude.
    pub hover_acc_baseline_bump: f64,
    pub correction: CorrectionPath,

    /// Positive corrections are halved above this thrust.
    pub damping_upper: i32,
    /// Negative corrections are halved below this thrust.
    pub damping_lower: i32,

    /// Hover aborts to landing outside [thrust_min, thrust_max].
    pub thrust_min: i32,
    pub thrust_max: i32,

    pub landing_ceiling: i32,
    /// Landing starts this far below the last hover thrust.
    pub landing_offset: i32,
    pub landing_step: i32,
    /// Total thrust drop of the landing ramp.
    pub landing_span: i32,

    pub touchdown_iterations: u32,
    pub touchdown_window: usize,
    pub touchdown_max_variance: f64,
    pub touchdown_max_deviation: f64,

    /// Pause after the final zero setpoint so it leaves before the link closes.
    pub close_flush_ms: u64,
    /// Pause after releasing the link.
    pub close_release_ms: u64,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            uri: "radio://0/80/250K".into(),
            groups: default_log_groups(),
            window_capacity: 50,
            sample_summary_every: 2,
            calibration_settle_ms: 2000,
            calibration_poll_ms: 2000,
            calibration_window: 5,
            calibration_timeout_ms: None,
            pacing_ms: 100,
            trim_roll: -0.10,
            trim_pitch: 0.70,
            takeoff_start_thrust: 31_500,
            takeoff_end_thrust: 37_000,
            takeoff_step: 500,
            takeoff_hold_thrust: 34_500,
            hover_iterations: 60,
            hover_attitude_offset: 6.0,
            hover_yaw_rate: 100.0,
            hover_acc_baseline_bump: 0.01,
            correction: CorrectionPath::Accel,
            damping_upper: 35_000,
            damping_lower: 30_000,
            thrust_min: 20_000,
            thrust_max: 43_000,
            landing_ceiling: 35_000,
            landing_offset: 1000,
            landing_step: 500,
            landing_span: 8000,
            touchdown_iterations: 10,
            touchdown_window: 2,
            touchdown_max_variance: 2.0,
            touchdown_max_deviation: 2.0,
            close_flush_ms: 100,
            close_release_ms: 200,
        }
    }
}

impl FlightConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn calibration_timeout(&self) -> Option<Duration> {
        self.calibration_timeout_ms.map(Duration::from_millis)
    }
}
