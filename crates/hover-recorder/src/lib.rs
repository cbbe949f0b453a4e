pub mod doctor;

use anyhow::{Context, Result};
use hover_proto::telemetry::FlightEvent;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory holding one `<unix_ms>.jsonl` log per flight.
    pub spool_dir: String,
    /// Stop writing a flight log once it reaches this size.
    pub spool_max_mb: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self { spool_dir: "./flights".into(), spool_max_mb: 16 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub path: PathBuf,
    pub events: u64,
    pub bytes: u64,
    pub dropped: u64,
}

/// Appends flight events to a JSON-lines log.
pub struct FlightRecorder {
    out: BufWriter<fs::File>,
    max_bytes: u64,
    stats: RecorderStats,
}

impl FlightRecorder {
    pub async fn create(cfg: &RecorderConfig) -> Result<Self> {
        fs::create_dir_all(&cfg.spool_dir)
            .await
            .with_context(|| format!("create spool dir {}", cfg.spool_dir))?;
        let stamp = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let path = Path::new(&cfg.spool_dir).join(format!("{}.jsonl", stamp));
        let file = fs::File::create(&path)
            .await
            .with_context(|| format!("create flight log {}", path.display()))?;
        info!("recorder: writing {}", path.display());
        Ok(Self {
            out: BufWriter::new(file),
            max_bytes: cfg.spool_max_mb * 1024 * 1024,
            stats: RecorderStats { path, ..Default::default() },
        })
    }

    pub fn path(&self) -> &Path {
        &self.stats.path
    }

    pub async fn record(&mut self, ev: &FlightEvent) -> Result<()> {
        let mut line = serde_json::to_vec(ev)?;
        line.push(b'\n');

        if self.stats.bytes + line.len() as u64 > self.max_bytes {
            if self.stats.dropped == 0 {
                warn!(
                    "recorder: {} reached {} bytes, dropping further events",
                    self.stats.path.display(),
                    self.max_bytes
                );
            }
            self.stats.dropped += 1;
            return Ok(());
        }

        self.out.write_all(&line).await?;
        self.stats.events += 1;
        self.stats.bytes += line.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<RecorderStats> {
        self.out.flush().await?;
        info!(
            "recorder: {} events ({} bytes, {} dropped) in {}",
            self.stats.events,
            self.stats.bytes,
            self.stats.dropped,
            self.stats.path.display()
        );
        Ok(self.stats)
    }
}

/// Opens a flight log and records everything sent on the returned channel
/// until every sender is dropped.
pub async fn start(cfg: &RecorderConfig) -> Result<(mpsc::UnboundedSender<FlightEvent>, JoinHandle<Result<RecorderStats>>)> {
    let mut recorder = FlightRecorder::create(cfg).await?;
    let (tx, mut rx) = mpsc::unbounded_channel::<FlightEvent>();
    let handle = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            if let Err(e) = recorder.record(&ev).await {
                warn!("recorder: write failed: {:#}", e);
            }
        }
        recorder.finish().await
    });
    Ok((tx, handle))
}

/// Reads a flight log back. Blank lines are skipped.
pub async fn read_log(path: impl AsRef<Path>) -> Result<Vec<FlightEvent>> {
    let path = path.as_ref();
    let file = fs::File::open(path).await.with_context(|| format!("open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut events = Vec::new();
    let mut n = 0usize;
    while let Some(line) = lines.next_line().await? {
        n += 1;
        if line.trim().is_empty() {
            continue;
        }
        let ev = serde_json::from_str(&line).with_context(|| format!("{}:{}", path.display(), n))?;
        events.push(ev);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hover_proto::telemetry::{EventKind, Phase};

    fn scratch(name: &str) -> RecorderConfig {
        let dir = std::env::temp_dir().join(format!("hover-recorder-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        RecorderConfig { spool_dir: dir.to_string_lossy().into_owned(), spool_max_mb: 1 }
    }

    #[tokio::test]
    async fn records_and_reads_back() {
        let cfg = scratch("roundtrip");
        let (tx, handle) = start(&cfg).await.unwrap();
        tx.send(FlightEvent::new(1, EventKind::Phase, "entered hovering").with_phase(Phase::Hovering))
            .unwrap();
        tx.send(FlightEvent::new(2, EventKind::Sample, "t=20ms").with_group("acc").with_value("acc.z", 1.05))
            .unwrap();
        drop(tx);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.dropped, 0);

        let events = read_log(&stats.path).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, Some(Phase::Hovering));
        assert_eq!(events[1].values["acc.z"], 1.05);
        let _ = std::fs::remove_dir_all(&cfg.spool_dir);
    }

    #[tokio::test]
    async fn stops_writing_past_the_limit() {
        let cfg = scratch("limit");
        let mut rec = FlightRecorder::create(&cfg).await.unwrap();
        let big = "x".repeat(300 * 1024);
        for i in 0..5 {
            rec.record(&FlightEvent::new(i, EventKind::LogError, big.clone())).await.unwrap();
        }
        let stats = rec.finish().await.unwrap();
        assert_eq!(stats.events, 3);
        assert_eq!(stats.dropped, 2);
        assert!(stats.bytes <= 1024 * 1024);
        assert_eq!(read_log(&stats.path).await.unwrap().len(), 3);
        let _ = std::fs::remove_dir_all(&cfg.spool_dir);
    }

    #[tokio::test]
    async fn corrupt_line_names_its_position() {
        let cfg = scratch("corrupt");
        std::fs::create_dir_all(&cfg.spool_dir).unwrap();
        let path = Path::new(&cfg.spool_dir).join("bad.jsonl");
        std::fs::write(&path, "\n{not json}\n").unwrap();
        let err = read_log(&path).await.unwrap_err();
        assert!(format!("{:#}", err).contains("bad.jsonl:2"), "{:#}", err);
        let _ = std::fs::remove_dir_all(&cfg.spool_dir);
    }
}
