//! Resolution audit log at `.triage/audit/resolutions.jsonl`.
//!
//! One JSON object per line, appended after every resolution. This is a
//! product artifact, independent of `RUST_LOG` tracing.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::types::{ActionAttempt, LoopState, ResponseStatus};

/// Everything recorded about one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub resolution_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub message: String,
    pub states: Vec<LoopState>,
    pub iterations: u32,
    pub attempt: Option<ActionAttempt>,
    pub raw_output: Option<String>,
    pub warnings: Vec<String>,
    pub status: ResponseStatus,
    pub output: String,
    /// Failure label, absent on success.
    pub failure: Option<String>,
}

/// `res-<timestamp>-<6 hex>`, unique enough to correlate log lines.
pub fn resolution_id(started_at: DateTime<Utc>) -> String {
    let suffix: [u8; 3] = rand::thread_rng().r#gen();
    format!(
        "res-{}-{}",
        started_at.format("%Y%m%d_%H%M%S"),
        hex::encode(suffix)
    )
}

pub fn append_record(path: &Path, record: &AuditRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record).context("serialize audit record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append audit log {}", path.display()))
}

pub fn read_records(path: &Path) -> Result<Vec<AuditRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read audit log {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse audit log {} line {}", path.display(), idx + 1))
        })
        .collect()
}
