use hover_fc::error::SessionError;
use hover_fc::hooks::SessionHooks;
use hover_fc::link::{LogGroup, VehicleLink};
use hover_fc::safety::Bound;
use hover_fc::sim::{SimLink, VerticalModel};
use hover_fc::{Channel, FlightConfig, FlightSession};
use hover_proto::telemetry::{EventKind, FlightEvent, Phase, Setpoint};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<FlightEvent>>,
    completed: Mutex<Vec<Phase>>,
}

impl Recorder {
    fn kinds(&self, kind: EventKind) -> Vec<FlightEvent> {
        self.events.lock().unwrap().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    fn phases(&self) -> Vec<Phase> {
        self.kinds(EventKind::Phase)
            .iter()
            .filter(|e| e.msg.starts_with("entered"))
            .filter_map(|e| e.phase)
            .collect()
    }
}

impl SessionHooks for Recorder {
    fn on_event(&self, event: &FlightEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_phase_complete(&self, phase: Phase) {
        self.completed.lock().unwrap().push(phase);
    }
}

/// Level airframe: acc.z at the baseline whatever the command, quiet gyro.
fn level(_: &Setpoint, _: Duration) -> Vec<(Channel, f64)> {
    vec![
        (Channel::StabilizerRoll, -0.1),
        (Channel::BaroAsl, 41.2),
        (Channel::GyroZ, 0.3),
        (Channel::AccZ, 1.05),
    ]
}

fn sim_config() -> FlightConfig {
    FlightConfig { uri: "sim://bench".into(), ..Default::default() }
}

#[tokio::test(start_paused = true)]
async fn level_flight_runs_every_phase() {
    // no attitude bump, so the hover deviation is exactly zero
    let cfg = FlightConfig { hover_acc_baseline_bump: 0.0, ..sim_config() };
    let sim = Arc::new(SimLink::new(level));
    let hooks = Arc::new(Recorder::default());

    let session = FlightSession::new(cfg, sim.clone() as Arc<dyn VehicleLink>, hooks.clone());
    let telemetry = session.telemetry();
    let report = session.run().await.unwrap();

    assert_eq!(report.final_phase, Phase::Closed);
    assert_eq!(report.hover_iterations, 60);
    assert_eq!(report.abort, None);
    assert_eq!(report.last_hover_thrust, 34_500);
    assert!(report.touchdown_detected);
    assert_eq!(report.baselines.vertical_acc, 1.05);
    assert_eq!(report.baselines.gyro_rate, 0.3);
    assert_eq!(report.baselines.altitude, 41.2);

    let sent = sim.sent();
    let hover: Vec<&Setpoint> = sent.iter().filter(|s| s.yaw_rate == 100.0).collect();
    assert_eq!(hover.len(), 60);
    assert!(hover.iter().all(|s| s.thrust == 34_500));
    assert_eq!(sent.first(), Some(&Setpoint::ZERO));
    assert_eq!(sent.last(), Some(&Setpoint::ZERO));
    assert_eq!(report.setpoints_sent as usize, sent.len());
    assert!(sim.is_closed());

    assert_eq!(
        hooks.phases(),
        vec![
            Phase::Calibrating,
            Phase::TakingOff,
            Phase::Hovering,
            Phase::Landing,
            Phase::DetectingTouchdown,
            Phase::Closed
        ]
    );
    assert_eq!(*hooks.completed.lock().unwrap(), vec![Phase::TakingOff, Phase::Hovering]);
    assert!(!hooks.kinds(EventKind::Sample).is_empty());
    assert_eq!(hooks.kinds(EventKind::Touchdown).len(), 1);
    assert!(telemetry.len(Channel::AccZ) > 0);
    assert_eq!(telemetry.len(Channel::AccX), 0);
}

#[tokio::test(start_paused = true)]
async fn sinking_hover_aborts_into_landing() {
    // acc.z collapses as soon as the hover yaw starts
    let model = |sp: &Setpoint, _: Duration| {
        let acc = if sp.yaw_rate > 0.0 { 0.90 } else { 1.05 };
        vec![(Channel::BaroAsl, 41.2), (Channel::GyroZ, 0.3), (Channel::AccZ, acc)]
    };
    let sim = Arc::new(SimLink::new(model));
    let hooks = Arc::new(Recorder::default());

    let report = FlightSession::new(sim_config(), sim.clone() as Arc<dyn VehicleLink>, hooks.clone())
        .run()
        .await
        .unwrap();

    let abort = report.abort.expect("hover should abort");
    assert_eq!(abort.bound, Bound::Upper(43_000));
    assert!(abort.thrust > 43_000);
    assert!(report.hover_iterations < 60);
    assert_eq!(report.final_phase, Phase::Closed);
    assert!(sim.sent().iter().all(|s| s.thrust <= 43_000));
    assert_eq!(hooks.kinds(EventKind::Abort).len(), 1);
    assert!(hooks.phases().contains(&Phase::Landing));
}

#[tokio::test(start_paused = true)]
async fn wrong_scheme_fails_to_connect() {
    let sim = Arc::new(SimLink::new(level));
    let cfg = FlightConfig { uri: "radio://0/80/250K".into(), ..Default::default() };
    let err = FlightSession::new(cfg, sim.clone() as Arc<dyn VehicleLink>, Arc::new(Recorder::default()))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::ConnectionFailed { .. }), "{}", err);
    assert!(sim.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lost_link_ends_the_session() {
    let sim = Arc::new(SimLink::new(level));
    let hooks = Arc::new(Recorder::default());
    let session = FlightSession::new(sim_config(), sim.clone() as Arc<dyn VehicleLink>, hooks.clone());

    let dropper = Arc::clone(&sim);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        dropper.lose_connection("out of range");
    });

    let err = session.run().await.unwrap_err();
    assert!(matches!(err, SessionError::ConnectionLost { .. }), "{}", err);
    assert_eq!(hooks.kinds(EventKind::LinkError).len(), 1);

    // the control task is gone, nothing else goes out
    let commands = hooks.kinds(EventKind::Command).len();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(hooks.kinds(EventKind::Command).len(), commands);
}

#[tokio::test(start_paused = true)]
async fn bad_log_group_does_not_stop_the_flight() {
    let mut cfg = FlightConfig { hover_acc_baseline_bump: 0.0, ..sim_config() };
    let mut power = LogGroup::new("pm", 100, &[]);
    power.variables.push("pm.vbat".into());
    cfg.groups.push(power);

    let sim = Arc::new(SimLink::new(level));
    let hooks = Arc::new(Recorder::default());
    let report = FlightSession::new(cfg, sim as Arc<dyn VehicleLink>, hooks.clone()).run().await.unwrap();

    let errors = hooks.kinds(EventKind::LogError);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].group.as_deref(), Some("pm"));
    assert_eq!(report.final_phase, Phase::Closed);
}

#[tokio::test(start_paused = true)]
async fn vertical_model_flight_closes_cleanly() {
    let sim = Arc::new(SimLink::new(VerticalModel::new(42)));
    let report = FlightSession::new(sim_config(), sim.clone() as Arc<dyn VehicleLink>, Arc::new(Recorder::default()))
        .run()
        .await
        .unwrap();

    assert_eq!(report.final_phase, Phase::Closed);
    assert!(report.setpoints_sent > 60);
    assert!(report.baselines.altitude > 40.0);
    assert!(sim.sent().iter().all(|s| s.thrust <= 43_000));
    assert!(sim.is_closed());
}
