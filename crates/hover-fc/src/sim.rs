use async_trait::async_trait;
use hover_proto::telemetry::Setpoint;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::link::{LinkError, LinkEvent, LogConfigError, LogGroup, VehicleLink};
use crate::telemetry::Channel;

pub const SIM_SCHEME: &str = "sim://";
/// Model step. Log group periods are rounded to a multiple of it.
pub const SIM_TICK: Duration = Duration::from_millis(10);

const STANDARD_GRAVITY: f64 = 9.81;

/// Produces one reading per simulated channel for each tick.
pub trait TelemetryModel: Send + 'static {
    fn step(&mut self, setpoint: &Setpoint, dt: Duration) -> Vec<(Channel, f64)>;
}

impl<F> TelemetryModel for F
where
    F: FnMut(&Setpoint, Duration) -> Vec<(Channel, f64)> + Send + 'static,
{
    fn step(&mut self, setpoint: &Setpoint, dt: Duration) -> Vec<(Channel, f64)> {
        self(setpoint, dt)
    }
}

/// One-axis airframe: thrust against gravity, resting on the ground at zero
/// altitude.
///
/// `acc.z` reads `stable_acc` at `neutral_thrust` and scales with thrust in
/// flight. `gyro.z` swings against vertical speed, the way the airframe's
/// yaw gyro picks up climb vibration.
#[derive(Debug, Clone)]
pub struct VerticalModel {
    pub neutral_thrust: f64,
    pub stable_acc: f64,
    pub ground_asl: f64,
    pub gyro_bias: f64,
    pub gyro_per_mps: f64,
    pub noise: f64,
    altitude: f64,
    vertical_speed: f64,
    rng: StdRng,
}

impl VerticalModel {
    pub fn new(seed: u64) -> Self {
        Self {
            neutral_thrust: 34_500.0,
            stable_acc: 1.05,
            ground_asl: 41.0,
            gyro_bias: 0.3,
            gyro_per_mps: 8.0,
            noise: 0.004,
            altitude: 0.0,
            vertical_speed: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn altitude(&self) -> f64 {
        self.altitude
    }

    fn jitter(&mut self, scale: f64) -> f64 {
        if self.noise <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-self.noise..self.noise) * scale
    }
}

impl TelemetryModel for VerticalModel {
    fn step(&mut self, setpoint: &Setpoint, dt: Duration) -> Vec<(Channel, f64)> {
        let dt = dt.as_secs_f64();
        let lift = f64::from(setpoint.thrust) / self.neutral_thrust;
        let accel = (lift - 1.0) * STANDARD_GRAVITY;

        let acc_z = if self.altitude <= 0.0 && accel <= 0.0 {
            self.altitude = 0.0;
            self.vertical_speed = 0.0;
            self.stable_acc
        } else {
            self.vertical_speed += accel * dt;
            self.altitude += self.vertical_speed * dt;
            if self.altitude < 0.0 {
                self.altitude = 0.0;
                self.vertical_speed = 0.0;
            }
            self.stable_acc * lift
        };

        let roll = f64::from(setpoint.roll);
        let pitch = f64::from(setpoint.pitch);
        let gyro_z = self.gyro_bias - self.gyro_per_mps * self.vertical_speed;

        vec![
            (Channel::StabilizerRoll, roll + self.jitter(10.0)),
            (Channel::BaroAsl, self.ground_asl + self.altitude + self.jitter(5.0)),
            (Channel::GyroX, self.jitter(50.0)),
            (Channel::GyroY, self.jitter(50.0)),
            (Channel::GyroZ, gyro_z + self.jitter(50.0)),
            (Channel::AccX, pitch.to_radians().sin() + self.jitter(1.0)),
            (Channel::AccY, -roll.to_radians().sin() + self.jitter(1.0)),
            (Channel::AccZ, acc_z + self.jitter(1.0)),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimState {
    Idle,
    Connected,
    Closed,
}

struct Shared {
    state: SimState,
    events: Option<mpsc::Sender<LinkEvent>>,
    groups: Vec<LogGroup>,
    last_setpoint: Setpoint,
    sent: Vec<Setpoint>,
}

/// In-process vehicle for `sim://` URIs. Records every setpoint it is sent.
pub struct SimLink {
    shared: Arc<Mutex<Shared>>,
    model: Arc<Mutex<Box<dyn TelemetryModel>>>,
    streamer: Mutex<Option<JoinHandle<()>>>,
}

impl SimLink {
    pub fn new(model: impl TelemetryModel) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state: SimState::Idle,
                events: None,
                groups: Vec::new(),
                last_setpoint: Setpoint::ZERO,
                sent: Vec::new(),
            })),
            model: Arc::new(Mutex::new(Box::new(model))),
            streamer: Mutex::new(None),
        }
    }

    /// Every setpoint accepted so far, in send order.
    pub fn sent(&self) -> Vec<Setpoint> {
        lock(&self.shared).sent.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared).state == SimState::Closed
    }

    /// Drops the radio link as if the vehicle went out of range.
    pub fn lose_connection(&self, reason: &str) {
        self.stop_streaming();
        let events = {
            let mut shared = lock(&self.shared);
            shared.state = SimState::Closed;
            shared.events.take()
        };
        if let Some(tx) = events {
            let _ = tx.try_send(LinkEvent::ConnectionLost(reason.to_string()));
        }
    }

    fn stop_streaming(&self) {
        if let Some(handle) = lock(&self.streamer).take() {
            handle.abort();
        }
    }

    fn ensure_streaming(&self) {
        let mut streamer = lock(&self.streamer);
        if streamer.is_none() {
            let shared = Arc::clone(&self.shared);
            let model = Arc::clone(&self.model);
            *streamer = Some(tokio::spawn(stream(shared, model)));
        }
    }
}

#[async_trait]
impl VehicleLink for SimLink {
    async fn connect(&self, uri: &str, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError> {
        if !uri.starts_with(SIM_SCHEME) {
            let reason = format!("no simulated vehicle at {}", uri);
            events
                .send(LinkEvent::ConnectionFailed(reason))
                .await
                .map_err(|_| LinkError::Closed)?;
            return Ok(());
        }
        {
            let mut shared = lock(&self.shared);
            if shared.state == SimState::Closed {
                return Err(LinkError::Closed);
            }
            shared.state = SimState::Connected;
            shared.events = Some(events.clone());
        }
        info!("sim: vehicle up at {}", uri);
        events.send(LinkEvent::Connected).await.map_err(|_| LinkError::Closed)
    }

    async fn subscribe(&self, group: &LogGroup) -> Result<(), LogConfigError> {
        {
            let mut shared = lock(&self.shared);
            if shared.state != SimState::Connected {
                return Err(LogConfigError::NotConnected { group: group.name.clone() });
            }
            group.validate(Channel::ALL.iter().map(|c| c.var_name()))?;
            shared.groups.push(group.clone());
        }
        self.ensure_streaming();
        Ok(())
    }

    async fn send_setpoint(&self, setpoint: Setpoint) -> Result<(), LinkError> {
        let mut shared = lock(&self.shared);
        match shared.state {
            SimState::Idle => Err(LinkError::NotConnected),
            SimState::Closed => Err(LinkError::Closed),
            SimState::Connected => {
                shared.last_setpoint = setpoint;
                shared.sent.push(setpoint);
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<(), LinkError> {
        self.stop_streaming();
        let events = {
            let mut shared = lock(&self.shared);
            shared.state = SimState::Closed;
            shared.events.take()
        };
        if let Some(tx) = events {
            debug!("sim: vehicle released");
            let _ = tx.try_send(LinkEvent::Disconnected);
        }
        Ok(())
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

async fn stream(shared: Arc<Mutex<Shared>>, model: Arc<Mutex<Box<dyn TelemetryModel>>>) {
    let tick_ms = SIM_TICK.as_millis() as u64;
    let started = Instant::now();
    let mut interval = tokio::time::interval(SIM_TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u64 = 0;

    loop {
        interval.tick().await;
        ticks += 1;

        let (setpoint, groups, events) = {
            let shared = lock(&shared);
            (shared.last_setpoint, shared.groups.clone(), shared.events.clone())
        };
        let Some(events) = events else { return };
        let readings: BTreeMap<Channel, f64> = lock(&model).step(&setpoint, SIM_TICK).into_iter().collect();
        let timestamp_ms = started.elapsed().as_millis() as u64;

        for group in groups {
            let every = (group.period_ms / tick_ms).max(1);
            if ticks % every != 0 {
                continue;
            }
            let values = group
                .variables
                .iter()
                .filter_map(|v| {
                    let channel = v.parse::<Channel>().ok()?;
                    readings.get(&channel).map(|x| (v.clone(), *x))
                })
                .collect();
            let packet = LinkEvent::DataReceived { group: group.name.clone(), timestamp_ms, values };
            if events.send(packet).await.is_err() {
                return;
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
