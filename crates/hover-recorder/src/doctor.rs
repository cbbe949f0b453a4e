use anyhow::Result;
use std::path::Path;

use crate::RecorderConfig;

pub fn check_spool(cfg: &RecorderConfig) -> Result<()> {
    anyhow::ensure!(!cfg.spool_dir.is_empty(), "recorder.spool_dir missing");
    let p = Path::new(&cfg.spool_dir);
    if p.exists() {
        anyhow::ensure!(p.is_dir(), "recorder.spool_dir is not a dir: {}", cfg.spool_dir);
    }
    anyhow::ensure!(cfg.spool_max_mb >= 1, "recorder.spool_max_mb too small; set >= 1MB");
    Ok(())
}
