use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Flight phases, in the order a session walks through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Connecting,
    Calibrating,
    TakingOff,
    Hovering,
    Landing,
    DetectingTouchdown,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Connecting => "connecting",
            Phase::Calibrating => "calibrating",
            Phase::TakingOff => "taking-off",
            Phase::Hovering => "hovering",
            Phase::Landing => "landing",
            Phase::DetectingTouchdown => "detecting-touchdown",
            Phase::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Roll/pitch in degrees, yaw rate in degrees/second, thrust as a 16-bit motor command.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Setpoint {
    pub roll: f32,
    pub pitch: f32,
    pub yaw_rate: f32,
    pub thrust: u16,
}

impl Setpoint {
    /// All-zero setpoint. Unlocks the motors at startup and stops them at shutdown.
    pub const ZERO: Setpoint = Setpoint { roll: 0.0, pitch: 0.0, yaw_rate: 0.0, thrust: 0 };

    /// Builds a setpoint from controller thrust, saturating into the 16-bit command range.
    pub fn new(roll: f64, pitch: f64, yaw_rate: f64, thrust: i32) -> Self {
        Self {
            roll: roll as f32,
            pitch: pitch as f32,
            yaw_rate: yaw_rate as f32,
            thrust: thrust.clamp(0, u16::MAX as i32) as u16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Sample,
    Phase,
    Command,
    Abort,
    Touchdown,
    LogError,
    LinkError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightEvent {
    pub ts_unix_ms: i64,
    pub kind: EventKind,
    pub phase: Option<Phase>,
    pub thrust: Option<i32>,
    pub setpoint: Option<Setpoint>,
    // Log group name for samples and log errors
    pub group: Option<String>,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    pub msg: String,
}

impl FlightEvent {
    pub fn new(ts_unix_ms: i64, kind: EventKind, msg: impl Into<String>) -> Self {
        Self {
            ts_unix_ms,
            kind,
            phase: None,
            thrust: None,
            setpoint: None,
            group: None,
            values: BTreeMap::new(),
            msg: msg.into(),
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_thrust(mut self, thrust: i32) -> Self {
        self.thrust = Some(thrust);
        self
    }

    pub fn with_setpoint(mut self, sp: Setpoint) -> Self {
        self.setpoint = Some(sp);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setpoint_thrust_saturates() {
        assert_eq!(Setpoint::new(0.0, 0.0, 0.0, 70_000).thrust, u16::MAX);
        assert_eq!(Setpoint::new(0.0, 0.0, 0.0, -5).thrust, 0);
        assert_eq!(Setpoint::new(-0.1, 0.7, 0.0, 34_500).thrust, 34_500);
    }

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Connecting < Phase::Calibrating);
        assert!(Phase::Hovering < Phase::Landing);
        assert!(Phase::DetectingTouchdown < Phase::Closed);
    }

    #[test]
    fn event_json_keeps_values() {
        let ev = FlightEvent::new(12, EventKind::Sample, "")
            .with_group("acc")
            .with_value("acc.z", 1.05);
        let line = serde_json::to_string(&ev).unwrap();
        let back: FlightEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back.group.as_deref(), Some("acc"));
        assert_eq!(back.values.get("acc.z"), Some(&1.05));
    }

    #[test]
    fn phase_names_match_display() {
        let json = serde_json::to_string(&Phase::DetectingTouchdown).unwrap();
        assert_eq!(json, format!("\"{}\"", Phase::DetectingTouchdown));
        let back: Phase = serde_json::from_str("\"taking-off\"").unwrap();
        assert_eq!(back, Phase::TakingOff);
    }
}
