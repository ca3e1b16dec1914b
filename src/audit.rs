use crate::config::AuditConfig;
use crate::interpreter::{FailureClass, Outcome};
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
    Timeout,
    NotAttempted,
    Skipped,
    Fault,
}

impl From<&Outcome> for OutcomeKind {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Success => OutcomeKind::Success,
            Outcome::Failure { .. } => OutcomeKind::Failure,
            Outcome::TimedOut { .. } => OutcomeKind::Timeout,
            Outcome::NotAttempted(_) => OutcomeKind::NotAttempted,
            Outcome::Skipped { .. } => OutcomeKind::Skipped,
            Outcome::Fault { .. } => OutcomeKind::Fault,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuditRecord {
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
    pub operator: String,
    pub operation: String,
    pub targets: Vec<String>,
    pub outcome: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(operator: &str, operation: &str, targets: Vec<String>, outcome: &Outcome) -> Self {
        let timestamp = Utc::now();
        let record_id = record_id(operator, operation, &targets, &timestamp);

        let (exit_code, failure_class, detail) = match outcome {
            Outcome::Success => (Some(0), None, None),
            Outcome::Failure { code, message, class } => (Some(*code), Some(*class), Some(message.clone())),
            Outcome::TimedOut { timeout_ms } => (None, None, Some(format!("terminated after {}ms", timeout_ms))),
            Outcome::NotAttempted(rejection) => (None, None, Some(rejection.to_string())),
            Outcome::Skipped { param } => (None, None, Some(format!("no '{}' given, nothing to do", param))),
            Outcome::Fault { detail } => (None, None, Some(detail.clone())),
        };

        Self {
            record_id,
            timestamp,
            operator: operator.to_string(),
            operation: operation.to_string(),
            targets,
            outcome: OutcomeKind::from(outcome),
            command_line: None,
            exit_code,
            failure_class,
            duration_ms: None,
            detail,
        }
    }

    pub fn with_command_line(mut self, line: String) -> Self {
        self.command_line = Some(line);
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }
}

fn record_id(operator: &str, operation: &str, targets: &[String], timestamp: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operator.as_bytes());
    hasher.update([0u8]);
    hasher.update(operation.as_bytes());
    for target in targets {
        hasher.update([0u8]);
        hasher.update(target.as_bytes());
    }
    hasher.update(timestamp.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}", &digest[..12], timestamp.timestamp())
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub operator: Option<String>,
    pub operation: Option<String>,
    pub limit: Option<usize>,
}

/// Append-only JSON-lines audit trail.
pub struct AuditLog {
    path: PathBuf,
    config: AuditConfig,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn open(config: AuditConfig) -> Result<Self> {
        let path = config.path.clone();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("create audit directory {}", dir.display()))?;
        }
        Ok(Self {
            path,
            config,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One record becomes one line, written with a single `write_all` on an
    /// append-mode handle.
    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("serialize audit record")?;
        line.push(b'\n');

        {
            let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("open audit log {}", self.path.display()))?;
            file.write_all(&line).context("append audit record")?;
        }

        // The record is stored; archiving problems must not turn that into a failure.
        if self.config.auto_archive {
            match self.oldest_is_expired().and_then(|expired| if expired { self.prune() } else { Ok(0) }) {
                Ok(_) => {}
                Err(e) => warn!(error = %format!("{:#}", e), path = %self.path.display(), "audit auto-archive failed"),
            }
        }
        Ok(())
    }

    pub fn records(&self) -> Result<Vec<AuditRecord>> {
        read_records(&self.path)
    }

    /// Matching records, newest first.
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let mut records: Vec<AuditRecord> = self
            .records()?
            .into_iter()
            .filter(|r| query.operator.as_deref().map_or(true, |o| r.operator == o))
            .filter(|r| query.operation.as_deref().map_or(true, |o| r.operation == o))
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Moves records older than the retention window into `audit_<year>.jsonl`
    /// next to the live log. Returns how many were moved.
    pub fn prune(&self) -> Result<usize> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let cutoff = self.cutoff();

        let (expired, kept): (Vec<AuditRecord>, Vec<AuditRecord>) = read_records(&self.path)?
            .into_iter()
            .partition(|r| r.timestamp <= cutoff);
        if expired.is_empty() {
            return Ok(0);
        }

        let mut by_year: BTreeMap<i32, Vec<AuditRecord>> = BTreeMap::new();
        for record in &expired {
            by_year.entry(record.timestamp.year()).or_default().push(record.clone());
        }
        for (year, records) in by_year {
            let archive_path = self.archive_path(year);
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&archive_path)
                .with_context(|| format!("open archive {}", archive_path.display()))?;
            file.write_all(&to_lines(&records)?)
                .with_context(|| format!("save {} archive", year))?;
        }

        let tmp_path = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp_path, to_lines(&kept)?).context("write pruned audit log")?;
        fs::rename(&tmp_path, &self.path).context("replace audit log")?;

        info!(archived = expired.len(), kept = kept.len(), "audit log pruned");
        Ok(expired.len())
    }

    pub fn archive_path(&self, year: i32) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("audit_{}.jsonl", year))
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - Duration::days(self.config.max_retention_days as i64)
    }

    fn oldest_is_expired(&self) -> Result<bool> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(_) => return Ok(false),
        };
        let mut first = String::new();
        BufReader::new(file).read_line(&mut first)?;
        Ok(serde_json::from_str::<AuditRecord>(first.trim())
            .map(|r| r.timestamp <= self.cutoff())
            .unwrap_or(false))
    }
}

fn to_lines(records: &[AuditRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

fn read_records(path: &Path) -> Result<Vec<AuditRecord>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("open audit log {}", path.display())),
    };

    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(line = number + 1, error = %e, "skipping unreadable audit line"),
        }
    }
    Ok(records)
}
