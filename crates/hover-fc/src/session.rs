use hover_proto::telemetry::{EventKind, FlightEvent};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::controller::FlightController;
use crate::error::SessionError;
use crate::hooks::{now_unix_ms, SessionHooks};
use crate::link::{LinkEvent, VehicleLink};
use crate::state::FlightReport;
use crate::telemetry::{Channel, TelemetryAggregator};
use crate::FlightConfig;

const EVENT_QUEUE: usize = 256;

enum Flow {
    Continue,
    Disconnected,
}

/// Owns the link's event channel. Dispatch only ever calls `add_sample` on
/// shared state; the control loop runs in its own task.
pub struct FlightSession {
    cfg: FlightConfig,
    link: Arc<dyn VehicleLink>,
    telemetry: Arc<TelemetryAggregator>,
    hooks: Arc<dyn SessionHooks>,
    packets: HashMap<String, u64>,
}

impl FlightSession {
    pub fn new(cfg: FlightConfig, link: Arc<dyn VehicleLink>, hooks: Arc<dyn SessionHooks>) -> Self {
        let telemetry = Arc::new(TelemetryAggregator::new(cfg.window_capacity));
        Self { cfg, link, telemetry, hooks, packets: HashMap::new() }
    }

    pub fn telemetry(&self) -> Arc<TelemetryAggregator> {
        Arc::clone(&self.telemetry)
    }

    /// Flies one session end to end. Link failures end it with an error and
    /// there is no reconnect.
    pub async fn run(mut self) -> Result<FlightReport, SessionError> {
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
        info!("session: connecting to {}", self.cfg.uri);
        self.link.connect(&self.cfg.uri, tx).await?;

        loop {
            match rx.recv().await {
                Some(LinkEvent::Connected) => break,
                Some(ev) => {
                    if let Flow::Disconnected = self.dispatch(ev)? {
                        return Err(SessionError::Disconnected);
                    }
                }
                None => return Err(SessionError::Disconnected),
            }
        }
        info!("session: connected to {}", self.cfg.uri);

        self.subscribe_groups().await;

        let controller = FlightController::new(
            self.cfg.clone(),
            Arc::clone(&self.link),
            Arc::clone(&self.telemetry),
            Arc::clone(&self.hooks),
        );
        let mut control = tokio::spawn(controller.fly());

        loop {
            let ev = tokio::select! {
                joined = &mut control => return finish(joined),
                ev = rx.recv() => ev,
            };
            let flow = match ev {
                Some(ev) => self.dispatch(ev),
                None => Ok(Flow::Disconnected),
            };
            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Disconnected) => {
                    // raised by the close sequence itself; let the control task finish
                    return finish(control.await);
                }
                Err(e) => {
                    self.abandon(control).await;
                    return Err(e);
                }
            }
        }
    }

    async fn subscribe_groups(&self) {
        for group in &self.cfg.groups {
            match self.link.subscribe(group).await {
                Ok(()) => info!(
                    "session: logging {} every {}ms ({})",
                    group.name,
                    group.period_ms,
                    group.variables.join(", ")
                ),
                Err(e) => {
                    warn!("session: could not start log group: {}", e);
                    self.hooks.on_event(
                        &FlightEvent::new(now_unix_ms(), EventKind::LogError, e.to_string())
                            .with_group(group.name.clone()),
                    );
                }
            }
        }
    }

    fn dispatch(&mut self, ev: LinkEvent) -> Result<Flow, SessionError> {
        match ev {
            LinkEvent::Connected => debug!("session: duplicate connected event"),
            LinkEvent::DataReceived { group, timestamp_ms, values } => {
                self.record_samples(group, timestamp_ms, values)
            }
            LinkEvent::LogError { group, message } => {
                warn!("session: error when logging {}: {}", group, message);
                self.hooks.on_event(
                    &FlightEvent::new(now_unix_ms(), EventKind::LogError, message).with_group(group),
                );
            }
            LinkEvent::ConnectionFailed(reason) => {
                error!("session: connection to {} failed: {}", self.cfg.uri, reason);
                self.link_error(&reason);
                return Err(SessionError::ConnectionFailed { uri: self.cfg.uri.clone(), reason });
            }
            LinkEvent::ConnectionLost(reason) => {
                error!("session: connection to {} lost: {}", self.cfg.uri, reason);
                self.link_error(&reason);
                return Err(SessionError::ConnectionLost { uri: self.cfg.uri.clone(), reason });
            }
            LinkEvent::Disconnected => {
                info!("session: disconnected from {}", self.cfg.uri);
                return Ok(Flow::Disconnected);
            }
        }
        Ok(Flow::Continue)
    }

    fn record_samples(&mut self, group: String, timestamp_ms: u64, values: BTreeMap<String, f64>) {
        for (name, value) in &values {
            match name.parse::<Channel>() {
                Ok(channel) => self.telemetry.add_sample(channel, *value),
                Err(e) => trace!("session: dropping sample: {}", e),
            }
        }

        let count = self.packets.entry(group.clone()).or_insert(0);
        *count += 1;
        let every = self.cfg.sample_summary_every;
        if every == 0 || *count % every != 0 {
            return;
        }

        let summary = values
            .iter()
            .map(|(name, value)| format!("{}: {:.2}", name, value))
            .collect::<Vec<_>>()
            .join(", ");
        debug!("[{}][{}]: {}", timestamp_ms, group, summary);

        let mut ev = FlightEvent::new(now_unix_ms(), EventKind::Sample, format!("t={}ms", timestamp_ms))
            .with_group(group);
        ev.values = values;
        self.hooks.on_event(&ev);
    }

    fn link_error(&self, reason: &str) {
        self.hooks.on_event(&FlightEvent::new(now_unix_ms(), EventKind::LinkError, reason));
    }

    async fn abandon(&self, control: JoinHandle<Result<FlightReport, SessionError>>) {
        control.abort();
        if let Err(e) = control.await {
            if !e.is_cancelled() {
                warn!("session: control task: {}", e);
            }
        }
        if let Err(e) = self.link.close().await {
            debug!("session: releasing lost link: {}", e);
        }
    }
}

fn finish(joined: Result<Result<FlightReport, SessionError>, JoinError>) -> Result<FlightReport, SessionError> {
    match joined {
        Ok(outcome) => {
            if let Ok(report) = &outcome {
                info!(
                    "session: finished in {} after {} setpoints (hover {}x, abort {}, touchdown {})",
                    report.final_phase,
                    report.setpoints_sent,
                    report.hover_iterations,
                    report.abort.map(|a| a.to_string()).unwrap_or_else(|| "none".into()),
                    report.touchdown_detected
                );
            }
            outcome
        }
        Err(e) => Err(SessionError::ControlTask(e.to_string())),
    }
}
