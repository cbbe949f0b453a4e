use anyhow::Result;
use tracing::warn;

use crate::link::{LogConfigError, LogGroup};
use crate::state::Baselines;
use crate::telemetry::Channel;
use crate::FlightConfig;

/// Static sanity checks on a flight config, run before anything connects.
pub fn check_flight(cfg: &FlightConfig) -> Result<()> {
    anyhow::ensure!(!cfg.uri.is_empty(), "flight.uri missing");
    anyhow::ensure!(!cfg.groups.is_empty(), "flight.groups empty");
    check_groups(&cfg.groups)?;

    anyhow::ensure!(cfg.window_capacity >= 2, "flight.window_capacity should be >= 2");
    anyhow::ensure!(
        cfg.calibration_window >= 1 && cfg.calibration_window <= cfg.window_capacity,
        "flight.calibration_window should be 1..=window_capacity"
    );
    anyhow::ensure!(
        cfg.touchdown_window >= 1 && cfg.touchdown_window <= cfg.window_capacity,
        "flight.touchdown_window should be 1..=window_capacity"
    );
    anyhow::ensure!(cfg.calibration_timeout_ms != Some(0), "flight.calibration_timeout_ms must be > 0");
    anyhow::ensure!(cfg.pacing_ms > 0, "flight.pacing_ms must be > 0");

    anyhow::ensure!(cfg.thrust_min < cfg.thrust_max, "flight.thrust_min must be below thrust_max");
    anyhow::ensure!(
        cfg.thrust_max <= i32::from(u16::MAX),
        "flight.thrust_max above the {} setpoint limit",
        u16::MAX
    );
    anyhow::ensure!(
        cfg.damping_lower <= cfg.damping_upper,
        "flight.damping_lower must not exceed damping_upper"
    );
    anyhow::ensure!(
        cfg.takeoff_step > 0 && cfg.takeoff_start_thrust < cfg.takeoff_end_thrust,
        "flight.takeoff ramp must climb in positive steps"
    );
    anyhow::ensure!(
        (cfg.thrust_min..=cfg.thrust_max).contains(&cfg.takeoff_hold_thrust),
        "flight.takeoff_hold_thrust outside [thrust_min, thrust_max]"
    );
    anyhow::ensure!(
        cfg.landing_step > 0 && cfg.landing_span >= cfg.landing_step,
        "flight.landing ramp must descend in positive steps"
    );
    anyhow::ensure!(
        cfg.touchdown_max_variance > 0.0 && cfg.touchdown_max_deviation > 0.0,
        "flight.touchdown thresholds must be > 0"
    );

    for channel in Baselines::CHANNELS {
        if !cfg.groups.iter().any(|g| g.covers(channel)) {
            warn!("doctor: {} is not logged; calibration will never finish", channel);
        }
    }
    Ok(())
}

fn check_groups(groups: &[LogGroup]) -> Result<(), LogConfigError> {
    let catalog: Vec<&str> = Channel::ALL.iter().map(|c| c.var_name()).collect();
    for group in groups {
        group.validate(catalog.iter().copied())?;
    }
    Ok(())
}
