use anyhow::{Context, Result};
use hover_proto::telemetry::Phase;
use tokio::process::Command;
use tracing::debug;

/// Operator cue, e.g. `["paplay", "/usr/share/sounds/freedesktop/stereo/complete.oga"]`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CueConfig {
    pub command: Vec<String>,
    /// Phases whose completion plays the cue. Empty means every one.
    #[serde(default)]
    pub on: Vec<Phase>,
}

impl CueConfig {
    pub fn wants(&self, phase: Phase) -> bool {
        self.on.is_empty() || self.on.contains(&phase)
    }
}

pub fn check(cfg: &CueConfig) -> Result<()> {
    anyhow::ensure!(
        cfg.command.first().map(|c| !c.is_empty()).unwrap_or(false),
        "cue.command missing"
    );
    Ok(())
}

pub async fn play(cfg: &CueConfig) -> Result<()> {
    let (program, args) = cfg.command.split_first().context("cue.command missing")?;
    let mut cmd = Command::new(program);
    cmd.args(args);

    debug!("cue: {}", program);
    let status = cmd.status().await.with_context(|| format!("run {}", program))?;
    anyhow::ensure!(status.success(), "{} exited with {}", program, status);
    Ok(())
}
