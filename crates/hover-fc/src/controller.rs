use hover_proto::telemetry::{EventKind, FlightEvent, Phase, Setpoint};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::heuristics::{acc_adjust, gyro_adjust};
use crate::hooks::{now_unix_ms, SessionHooks};
use crate::link::VehicleLink;
use crate::safety::{SafetyBoundExceeded, ThrustEnvelope};
use crate::state::{Baselines, ControlState, FlightReport};
use crate::telemetry::{Channel, TelemetryAggregator};
use crate::{CorrectionPath, FlightConfig};

/// True when the gyro window looks like a vehicle sitting on the ground.
/// Both comparisons are strict.
pub fn touchdown_detected(variance: f64, deviation: f64, max_variance: f64, max_deviation: f64) -> bool {
    variance < max_variance && deviation > -max_deviation && deviation < max_deviation
}

pub struct FlightController {
    cfg: FlightConfig,
    link: Arc<dyn VehicleLink>,
    telemetry: Arc<TelemetryAggregator>,
    hooks: Arc<dyn SessionHooks>,
    envelope: ThrustEnvelope,
    state: ControlState,
    baselines: Baselines,
    hover_iterations: u32,
    abort: Option<SafetyBoundExceeded>,
    touchdown: bool,
    last_hover_thrust: i32,
    setpoints_sent: u32,
}

impl FlightController {
    pub fn new(
        cfg: FlightConfig,
        link: Arc<dyn VehicleLink>,
        telemetry: Arc<TelemetryAggregator>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Self {
        let envelope = ThrustEnvelope::from_config(&cfg);
        let state = ControlState::new(cfg.trim_roll, cfg.trim_pitch);
        Self {
            cfg,
            link,
            telemetry,
            hooks,
            envelope,
            state,
            baselines: Baselines::default(),
            hover_iterations: 0,
            abort: None,
            touchdown: false,
            last_hover_thrust: 0,
            setpoints_sent: 0,
        }
    }

    /// Skips calibration by supplying baselines up front.
    pub fn with_baselines(mut self, baselines: Baselines) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn baselines(&self) -> &Baselines {
        &self.baselines
    }

    /// Runs every phase and always finishes with the close sequence, even when
    /// calibration fails.
    pub async fn fly(mut self) -> Result<FlightReport, SessionError> {
        let outcome = self.fly_phases().await;
        self.close().await;
        outcome.map(|()| self.report())
    }

    async fn fly_phases(&mut self) -> Result<(), SessionError> {
        self.calibrate().await?;
        self.take_off().await;
        self.hover().await;
        self.land().await;
        self.detect_touchdown().await;
        Ok(())
    }

    pub fn report(&self) -> FlightReport {
        FlightReport {
            final_phase: self.state.phase,
            baselines: self.baselines,
            hover_iterations: self.hover_iterations,
            abort: self.abort,
            touchdown_detected: self.touchdown,
            last_hover_thrust: self.last_hover_thrust,
            setpoints_sent: self.setpoints_sent,
        }
    }

    pub async fn calibrate(&mut self) -> Result<Baselines, SessionError> {
        self.enter(Phase::Calibrating);
        sleep(Duration::from_millis(self.cfg.calibration_settle_ms)).await;

        for channel in Baselines::CHANNELS {
            let value = self.capture_baseline(channel).await?;
            self.baselines.set(channel, value);
        }

        info!(
            "flight: baselines gyro.z={:.3} acc.z={:.3} baro.asl={:.3}",
            self.baselines.gyro_rate, self.baselines.vertical_acc, self.baselines.altitude
        );
        let mut ev = FlightEvent::new(now_unix_ms(), EventKind::Phase, "baselines captured")
            .with_phase(Phase::Calibrating);
        for channel in Baselines::CHANNELS {
            if let Some(v) = self.baselines.get(channel) {
                ev = ev.with_value(channel.var_name(), v);
            }
        }
        self.hooks.on_event(&ev);
        Ok(self.baselines)
    }

    /// Polls the channel average until it is non-zero. A zero mean means the
    /// stream has not produced real data yet.
    async fn capture_baseline(&self, channel: Channel) -> Result<f64, SessionError> {
        let started = Instant::now();
        let poll = Duration::from_millis(self.cfg.calibration_poll_ms);
        loop {
            match self.telemetry.average(channel, self.cfg.calibration_window) {
                Ok(stats) if stats.mean != 0.0 => return Ok(stats.mean),
                Ok(_) => debug!("flight: {} still averages to zero, waiting", channel),
                Err(e) => debug!("flight: {}, waiting", e),
            }
            if let Some(limit) = self.cfg.calibration_timeout() {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(SessionError::CalibrationTimeout { channel, waited });
                }
            }
            sleep(poll).await;
        }
    }

    pub async fn take_off(&mut self) {
        self.enter(Phase::TakingOff);

        // thrust stays locked until one zero setpoint has been seen
        self.send(Setpoint::ZERO).await;

        let step = self.cfg.takeoff_step.max(1) as usize;
        for thrust in (self.cfg.takeoff_start_thrust..=self.cfg.takeoff_end_thrust).step_by(step) {
            self.run_thrust(thrust).await;
        }
        self.run_thrust(self.cfg.takeoff_hold_thrust).await;

        self.hooks.on_phase_complete(Phase::TakingOff);
    }

    pub async fn hover(&mut self) {
        self.enter(Phase::Hovering);

        self.state.pitch += self.cfg.hover_attitude_offset;
        self.state.roll += self.cfg.hover_attitude_offset;
        self.state.yaw_rate = self.cfg.hover_yaw_rate;
        self.state.last_accel_deviation = 0.0;
        self.state.last_gyro_deviation = 0.0;
        // the tilted attitude reads slightly higher on acc.z
        self.baselines.vertical_acc += self.cfg.hover_acc_baseline_bump;

        for _ in 0..self.cfg.hover_iterations {
            let delta = self.hover_correction();
            let delta = self.envelope.damp(self.state.thrust, delta);
            self.state.thrust += delta;

            if let Err(breach) = self.envelope.check(self.state.thrust) {
                error!("flight: ABORT, {} after {} hover commands", breach, self.hover_iterations);
                self.hooks.on_event(
                    &FlightEvent::new(now_unix_ms(), EventKind::Abort, breach.to_string())
                        .with_phase(Phase::Hovering)
                        .with_thrust(breach.thrust),
                );
                self.abort = Some(breach);
                break;
            }

            self.state.yaw_rate = self.cfg.hover_yaw_rate;
            self.send_paced().await;
            self.hover_iterations += 1;
        }

        self.last_hover_thrust = self.state.thrust;
        self.hooks.on_phase_complete(Phase::Hovering);
    }

    /// Acceleration delta for this hover command, still to be damped. When
    /// the gyro path is on, its delta goes straight into thrust first.
    fn hover_correction(&mut self) -> i32 {
        let acc = match self.telemetry.last(Channel::VERTICAL_ACC) {
            Ok(v) => v,
            Err(e) => {
                warn!("flight: {}, holding thrust", e);
                return 0;
            }
        };
        let deviation = acc - self.baselines.vertical_acc;
        let delta = acc_adjust(deviation, self.state.last_accel_deviation);
        self.state.last_accel_deviation = deviation;

        if self.cfg.correction == CorrectionPath::AccelAndGyro && delta != 0 {
            match self.telemetry.last(Channel::GYRO_RATE) {
                Ok(gyro) => {
                    let gyro_deviation = gyro - self.baselines.gyro_rate;
                    let gyro_delta = gyro_adjust(gyro_deviation, self.state.last_gyro_deviation);
                    self.state.last_gyro_deviation = gyro_deviation;
                    self.state.thrust += gyro_delta;
                    debug!("flight: gyro.z deviation {:+.2} -> thrust {:+}", gyro_deviation, gyro_delta);
                }
                Err(e) => warn!("flight: {}, skipping gyro correction", e),
            }
        }

        debug!("flight: acc.z deviation {:+.3} -> thrust delta {}", deviation, delta);
        delta
    }

    pub async fn land(&mut self) {
        self.enter(Phase::Landing);

        self.state.yaw_rate = 0.0;
        self.state.pitch = self.cfg.trim_pitch;
        self.state.roll = self.cfg.trim_roll;

        let landing = self.cfg.landing_ceiling.min(self.state.thrust - self.cfg.landing_offset);
        info!("flight: landing from thrust {}", landing);

        let step = self.cfg.landing_step.max(1);
        let mut thrust = landing;
        while landing - thrust < self.cfg.landing_span {
            self.run_thrust(thrust).await;
            thrust -= step;
        }
    }

    /// Keeps resending the final landing thrust until the gyro looks grounded.
    pub async fn detect_touchdown(&mut self) -> bool {
        self.enter(Phase::DetectingTouchdown);

        for _ in 0..self.cfg.touchdown_iterations {
            match self.telemetry.average(Channel::GYRO_RATE, self.cfg.touchdown_window) {
                Ok(stats) => {
                    let deviation = stats.mean - self.baselines.gyro_rate;
                    if touchdown_detected(
                        stats.variance,
                        deviation,
                        self.cfg.touchdown_max_variance,
                        self.cfg.touchdown_max_deviation,
                    ) {
                        info!(
                            "flight: touchdown (gyro.z deviation {:+.2}, variance {:.2})",
                            deviation, stats.variance
                        );
                        self.hooks.on_event(
                            &FlightEvent::new(now_unix_ms(), EventKind::Touchdown, "touchdown detected")
                                .with_phase(Phase::DetectingTouchdown)
                                .with_thrust(self.state.thrust)
                                .with_value("gyro.z.deviation", deviation)
                                .with_value("gyro.z.variance", stats.variance),
                        );
                        self.touchdown = true;
                        break;
                    }
                }
                Err(e) => warn!("flight: touchdown check: {}", e),
            }
            self.send_paced().await;
        }
        self.touchdown
    }

    /// Zero setpoint, wait for it to leave, release the link, wait again.
    pub async fn close(&mut self) {
        self.enter(Phase::Closed);
        self.send(Setpoint::ZERO).await;
        sleep(Duration::from_millis(self.cfg.close_flush_ms)).await;
        if let Err(e) = self.link.close().await {
            warn!("flight: closing link: {}", e);
        }
        sleep(Duration::from_millis(self.cfg.close_release_ms)).await;
    }

    fn enter(&mut self, phase: Phase) {
        info!("flight: {} -> {} (thrust {})", self.state.phase, phase, self.state.thrust);
        self.state.phase = phase;
        self.hooks.on_event(
            &FlightEvent::new(now_unix_ms(), EventKind::Phase, format!("entered {}", phase))
                .with_phase(phase)
                .with_thrust(self.state.thrust),
        );
    }

    async fn run_thrust(&mut self, thrust: i32) {
        self.state.thrust = thrust;
        self.send_paced().await;
    }

    async fn send_paced(&mut self) {
        self.send(self.state.setpoint()).await;
        sleep(self.cfg.pacing()).await;
    }

    async fn send(&mut self, setpoint: Setpoint) {
        debug!(
            "flight: roll {:.2}, pitch {:.2}, yawrate {}, thrust {}",
            setpoint.roll, setpoint.pitch, setpoint.yaw_rate, setpoint.thrust
        );
        match self.link.send_setpoint(setpoint).await {
            Ok(()) => self.setpoints_sent += 1,
            Err(e) => warn!("flight: setpoint dropped: {}", e),
        }
        self.hooks.on_event(
            &FlightEvent::new(now_unix_ms(), EventKind::Command, "")
                .with_phase(self.state.phase)
                .with_thrust(i32::from(setpoint.thrust))
                .with_setpoint(setpoint),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoHooks;
    use crate::link::{LinkError, LinkEvent, LogConfigError, LogGroup};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingLink {
        sent: Mutex<Vec<Setpoint>>,
        closed: Mutex<bool>,
    }

    impl RecordingLink {
        fn thrusts(&self) -> Vec<u16> {
            self.sent.lock().unwrap().iter().map(|s| s.thrust).collect()
        }
    }

    #[async_trait]
    impl VehicleLink for RecordingLink {
        async fn connect(&self, _uri: &str, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError> {
            events.send(LinkEvent::Connected).await.map_err(|e| LinkError::Transport(e.to_string()))
        }

        async fn subscribe(&self, _group: &LogGroup) -> Result<(), LogConfigError> {
            Ok(())
        }

        async fn send_setpoint(&self, setpoint: Setpoint) -> Result<(), LinkError> {
            self.sent.lock().unwrap().push(setpoint);
            Ok(())
        }

        async fn close(&self) -> Result<(), LinkError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    const BASELINES: Baselines = Baselines { gyro_rate: 0.3, vertical_acc: 1.05, altitude: 41.2 };

    fn controller(cfg: FlightConfig) -> (FlightController, Arc<RecordingLink>, Arc<TelemetryAggregator>) {
        let link = Arc::new(RecordingLink::default());
        let telemetry = Arc::new(TelemetryAggregator::new(cfg.window_capacity));
        let ctl = FlightController::new(cfg, link.clone(), telemetry.clone(), Arc::new(NoHooks))
            .with_baselines(BASELINES);
        (ctl, link, telemetry)
    }

    #[test]
    fn touchdown_thresholds_are_strict() {
        assert!(!touchdown_detected(2.0, 0.0, 2.0, 2.0));
        assert!(!touchdown_detected(1.9, 2.0, 2.0, 2.0));
        assert!(!touchdown_detected(1.9, -2.0, 2.0, 2.0));
        assert!(touchdown_detected(1.9, 1.9, 2.0, 2.0));
        assert!(touchdown_detected(0.0, -1.9, 2.0, 2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn takeoff_unlocks_then_ramps() {
        let (mut ctl, link, _) = controller(FlightConfig::default());
        ctl.take_off().await;

        let thrusts = link.thrusts();
        assert_eq!(thrusts[0], 0);
        let ramp: Vec<u16> = (31_500..=37_000).step_by(500).collect();
        assert_eq!(&thrusts[1..=ramp.len()], ramp.as_slice());
        assert_eq!(*thrusts.last().unwrap(), 34_500);
        assert_eq!(thrusts.len(), ramp.len() + 2);
        assert_eq!(ctl.state().thrust, 34_500);
    }

    #[tokio::test(start_paused = true)]
    async fn level_hover_holds_thrust() {
        let (mut ctl, link, telemetry) = controller(FlightConfig::default());
        ctl.state.thrust = 34_500;
        telemetry.add_sample(Channel::AccZ, 1.06);

        ctl.hover().await;

        let thrusts = link.thrusts();
        assert_eq!(thrusts.len(), 60);
        assert!(thrusts.iter().all(|&t| t == 34_500));
        assert_eq!(ctl.report().hover_iterations, 60);
        assert!(ctl.report().abort.is_none());
        let sent = link.sent.lock().unwrap();
        assert!(sent.iter().all(|s| s.yaw_rate == 100.0));
        assert!((sent[0].pitch - 6.70).abs() < 1e-5);
    }

    #[tokio::test(start_paused = true)]
    async fn hover_aborts_before_sending_high_thrust() {
        let (mut ctl, link, telemetry) = controller(FlightConfig::default());
        ctl.state.thrust = 34_500;
        // far below the bumped baseline: the vehicle is sinking hard
        telemetry.add_sample(Channel::AccZ, 0.80);

        ctl.hover().await;

        assert_eq!(link.thrusts(), vec![34_700, 39_200, 41_450]);
        let report = ctl.report();
        assert_eq!(report.hover_iterations, 3);
        let abort = report.abort.unwrap();
        assert_eq!(abort.thrust, 43_700);
        assert_eq!(abort.bound, crate::safety::Bound::Upper(43_000));
        assert_eq!(report.last_hover_thrust, 43_700);
    }

    #[tokio::test(start_paused = true)]
    async fn hover_aborts_before_sending_low_thrust() {
        let (mut ctl, link, telemetry) = controller(FlightConfig::default());
        ctl.state.thrust = 34_500;
        telemetry.add_sample(Channel::AccZ, 1.40);

        ctl.hover().await;

        assert_eq!(link.thrusts(), vec![34_300, 29_800, 27_550, 25_300, 23_050, 20_800]);
        let abort = ctl.report().abort.unwrap();
        assert_eq!(abort.thrust, 18_550);
        assert_eq!(abort.bound, crate::safety::Bound::Lower(20_000));
    }

    #[tokio::test(start_paused = true)]
    async fn gyro_path_only_runs_when_selected() {
        let cfg = FlightConfig { hover_iterations: 1, ..FlightConfig::default() };
        let (mut ctl, link, telemetry) = controller(cfg);
        ctl.state.thrust = 34_500;
        telemetry.add_sample(Channel::AccZ, 1.04);
        telemetry.add_sample(Channel::GyroZ, -2.7);
        ctl.hover().await;
        assert_eq!(link.thrusts(), vec![34_700]);

        let cfg = FlightConfig {
            hover_iterations: 1,
            correction: CorrectionPath::AccelAndGyro,
            ..FlightConfig::default()
        };
        let (mut ctl, link, telemetry) = controller(cfg);
        ctl.state.thrust = 34_500;
        telemetry.add_sample(Channel::AccZ, 1.04);
        telemetry.add_sample(Channel::GyroZ, -2.7);
        ctl.hover().await;
        // +200 from acc.z, -200 from a gyro that says we are climbing
        assert_eq!(link.thrusts(), vec![34_500]);
    }

    #[tokio::test(start_paused = true)]
    async fn gyro_delta_lands_before_damping() {
        let cfg = FlightConfig {
            hover_iterations: 1,
            correction: CorrectionPath::AccelAndGyro,
            ..FlightConfig::default()
        };
        let (mut ctl, link, telemetry) = controller(cfg);
        ctl.state.thrust = 36_000;
        telemetry.add_sample(Channel::AccZ, 1.04);
        telemetry.add_sample(Channel::GyroZ, -2.7);
        ctl.hover().await;
        // gyro takes 36000 to 35800, still above the band, so the +200 halves
        assert_eq!(link.thrusts(), vec![35_900]);
        assert_eq!(ctl.state().last_gyro_deviation, -2.7 - 0.3);
    }

    #[tokio::test(start_paused = true)]
    async fn landing_ramps_down_from_capped_thrust() {
        let (mut ctl, link, _) = controller(FlightConfig::default());
        ctl.state.thrust = 43_700;
        ctl.state.yaw_rate = 100.0;
        ctl.land().await;

        let thrusts = link.thrusts();
        let expected: Vec<u16> = (0..16).map(|k| 35_000 - k * 500).collect();
        assert_eq!(thrusts, expected);
        let sent = link.sent.lock().unwrap();
        assert!(sent.iter().all(|s| s.yaw_rate == 0.0 && s.pitch == 0.70_f32 && s.roll == -0.10_f32));
    }

    #[tokio::test(start_paused = true)]
    async fn landing_starts_below_last_hover_thrust() {
        let (mut ctl, link, _) = controller(FlightConfig::default());
        ctl.state.thrust = 33_000;
        ctl.land().await;
        let thrusts = link.thrusts();
        assert_eq!(thrusts[0], 32_000);
        assert_eq!(*thrusts.last().unwrap(), 24_500);
        assert_eq!(ctl.state().thrust, 24_500);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_gyro_means_touchdown() {
        let (mut ctl, link, telemetry) = controller(FlightConfig::default());
        telemetry.add_sample(Channel::GyroZ, 0.5);
        telemetry.add_sample(Channel::GyroZ, 0.5);
        assert!(ctl.detect_touchdown().await);
        assert!(link.thrusts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn noisy_gyro_keeps_resending_landing_thrust() {
        let (mut ctl, link, telemetry) = controller(FlightConfig::default());
        ctl.state.thrust = 24_500;
        telemetry.add_sample(Channel::GyroZ, 10.0);
        telemetry.add_sample(Channel::GyroZ, -10.0);
        assert!(!ctl.detect_touchdown().await);
        assert_eq!(link.thrusts(), vec![24_500; 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn calibration_waits_for_non_zero_data() {
        let (mut ctl, _, telemetry) = controller(FlightConfig::default());
        telemetry.add_sample(Channel::AccZ, 1.05);
        telemetry.add_sample(Channel::BaroAsl, 41.0);
        telemetry.add_sample(Channel::GyroZ, 0.0);

        let late = telemetry.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(7)).await;
            for _ in 0..5 {
                late.add_sample(Channel::GyroZ, 0.4);
            }
        });

        let started = Instant::now();
        let baselines = ctl.calibrate().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(7));
        assert!((baselines.gyro_rate - 0.4).abs() < 1e-12);
        assert_eq!(baselines.vertical_acc, 1.05);
        assert_eq!(baselines.altitude, 41.0);
    }

    #[tokio::test(start_paused = true)]
    async fn calibration_bound_is_opt_in() {
        let cfg = FlightConfig { calibration_timeout_ms: Some(5000), ..FlightConfig::default() };
        let (ctl, link, _) = controller(cfg);
        let err = ctl.fly().await.unwrap_err();
        assert!(matches!(err, SessionError::CalibrationTimeout { channel: Channel::GyroZ, .. }));
        // the close sequence still runs
        assert_eq!(link.thrusts(), vec![0]);
        assert!(*link.closed.lock().unwrap());
    }
}
