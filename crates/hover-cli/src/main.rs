mod cue;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use hover_fc::hooks::SessionHooks;
use hover_fc::link::VehicleLink;
use hover_fc::sim::{SimLink, VerticalModel, SIM_SCHEME};
use hover_fc::{doctor as fc_doctor, FlightConfig, FlightReport, FlightSession};
use hover_proto::telemetry::{FlightEvent, Phase};
use hover_recorder::{doctor as recorder_doctor, RecorderConfig};

use cue::CueConfig;

#[derive(Debug, Parser)]
#[command(name = "hover", version, about = "Heuristic hover controller for small quadcopters")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config without connecting.
    Doctor,
    /// Fly one session: calibrate, take off, hover, land.
    Fly {
        /// Print the flight report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print a recorded flight log.
    Show { log: String },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    flight: FlightConfig,
    #[serde(default)]
    sim: SimCfg,
    recorder: Option<RecorderConfig>,
    cue: Option<CueConfig>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct SimCfg {
    seed: u64,
    noise: f64,
    neutral_thrust: f64,
    ground_asl: f64,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self { seed: 1, noise: 0.004, neutral_thrust: 34_500.0, ground_asl: 41.0 }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Doctor => doctor(&load_config(&cli.config)?)?,
        Command::Fly { json } => fly(&load_config(&cli.config)?, json).await?,
        Command::Show { log } => show(&log).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    fc_doctor::check_flight(&cfg.flight)?;
    if !cfg.flight.uri.starts_with(SIM_SCHEME) {
        warn!("doctor: flight.uri {} needs a radio driver; this build flies {} only", cfg.flight.uri, SIM_SCHEME);
    }
    anyhow::ensure!(cfg.sim.neutral_thrust > 0.0, "sim.neutral_thrust must be > 0");
    anyhow::ensure!(cfg.sim.noise >= 0.0, "sim.noise must be >= 0");

    match &cfg.recorder {
        Some(rec) => recorder_doctor::check_spool(rec)?,
        None => warn!("doctor: no [recorder] section, flights will not be logged"),
    }
    if let Some(c) = &cfg.cue {
        cue::check(c)?;
    }

    info!("doctor: OK");
    Ok(())
}

/// Forwards session events to the recorder and plays the operator cue.
struct HostHooks {
    recorder: Option<mpsc::UnboundedSender<FlightEvent>>,
    cue: Option<Arc<CueConfig>>,
}

impl SessionHooks for HostHooks {
    fn on_event(&self, event: &FlightEvent) {
        if let Some(tx) = &self.recorder {
            // recorder gone means its task already failed and logged why
            let _ = tx.send(event.clone());
        }
    }

    fn on_phase_complete(&self, phase: Phase) {
        info!("fly: {} complete", phase);
        let Some(cue) = self.cue.clone() else { return };
        if !cue.wants(phase) {
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = cue::play(&cue).await {
                warn!("cue failed: {:#}", e);
            }
        });
    }
}

async fn fly(cfg: &Config, json: bool) -> Result<()> {
    fc_doctor::check_flight(&cfg.flight)?;
    anyhow::ensure!(
        cfg.flight.uri.starts_with(SIM_SCHEME),
        "flight.uri {}: this build flies {} vehicles only",
        cfg.flight.uri,
        SIM_SCHEME
    );

    let (recorder, recording) = match &cfg.recorder {
        Some(rec) => {
            let (tx, handle) = hover_recorder::start(rec).await?;
            (Some(tx), Some(handle))
        }
        None => (None, None),
    };

    let mut model = VerticalModel::new(cfg.sim.seed);
    model.noise = cfg.sim.noise;
    model.neutral_thrust = cfg.sim.neutral_thrust;
    model.ground_asl = cfg.sim.ground_asl;
    let link: Arc<dyn VehicleLink> = Arc::new(SimLink::new(model));

    let hooks = Arc::new(HostHooks { recorder, cue: cfg.cue.clone().map(Arc::new) });
    info!("fly: starting session on {}", cfg.flight.uri);
    let outcome = FlightSession::new(cfg.flight.clone(), link, hooks.clone()).run().await;
    // last sender; lets the recorder drain and finish
    drop(hooks);

    if let Some(handle) = recording {
        match handle.await.context("recorder task")? {
            Ok(stats) => println!(
                "log={} events={} bytes={} dropped={}",
                stats.path.display(),
                stats.events,
                stats.bytes,
                stats.dropped
            ),
            Err(e) => warn!("recorder failed: {:#}", e),
        }
    }

    let report = outcome.context("flight session")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(r: &FlightReport) {
    println!("final_phase={}", r.final_phase);
    println!(
        "baselines gyro.z={:.3} acc.z={:.3} baro.asl={:.3}",
        r.baselines.gyro_rate, r.baselines.vertical_acc, r.baselines.altitude
    );
    println!("hover_iterations={} last_hover_thrust={}", r.hover_iterations, r.last_hover_thrust);
    match &r.abort {
        Some(a) => println!("abort={}", a),
        None => println!("abort=none"),
    }
    println!("touchdown={}", r.touchdown_detected);
    println!("setpoints_sent={}", r.setpoints_sent);
}

async fn show(path: &str) -> Result<()> {
    let events = hover_recorder::read_log(path).await?;
    let mut tally: BTreeMap<_, usize> = BTreeMap::new();

    for ev in &events {
        *tally.entry(ev.kind).or_default() += 1;
        let phase = ev.phase.map(|p| p.to_string()).unwrap_or_default();
        let thrust = ev.thrust.map(|t| t.to_string()).unwrap_or_default();
        let values = ev
            .values
            .iter()
            .map(|(k, v)| format!("{}={:.3}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{} {:<10} {:<20} {:>6} {} {}",
            format_ts(ev.ts_unix_ms),
            format!("{:?}", ev.kind),
            phase,
            thrust,
            ev.msg,
            values
        );
    }

    println!("---");
    for (kind, n) in tally {
        println!("{:?}={}", kind, n);
    }
    Ok(())
}

fn format_ts(ts_unix_ms: i64) -> String {
    time::OffsetDateTime::from_unix_timestamp_nanos(i128::from(ts_unix_ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok())
        .unwrap_or_else(|| ts_unix_ms.to_string())
}
