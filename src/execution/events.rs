//! Progress events and sinks

use super::state::RunSummary;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Ordered event stream of one run. Phase indices are 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PhaseStarted {
        phase: usize,
        label: String,
        units: usize,
    },
    UnitDecisionRequested {
        phase: usize,
        unit: String,
        description: String,
        rationale: String,
    },
    /// Never offered because a dependency was skipped, failed or blocked
    UnitBlocked {
        phase: usize,
        unit: String,
        unmet_dependencies: Vec<String>,
    },
    UnitApplied {
        phase: usize,
        unit: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    UnitSkipped {
        phase: usize,
        unit: String,
    },
    UnitFailed {
        phase: usize,
        unit: String,
        error: String,
        /// Units of the phase blocked by this failure
        blocked: Vec<String>,
    },
    PhaseVerified {
        phase: usize,
        passed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    PhaseAborted {
        phase: usize,
        aborted: usize,
    },
    RunCompleted {
        summary: RunSummary,
    },
}

/// Consumer of run events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent);
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct VecSink {
    events: Mutex<Vec<RunEvent>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for VecSink {
    fn emit(&self, event: &RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Appends one JSON object per event to a log file
pub struct JsonlSink {
    path: PathBuf,
    run_id: String,
    file: Mutex<File>,
}

#[derive(Serialize)]
struct LogLine<'a> {
    run_id: &'a str,
    at: String,
    #[serde(flatten)]
    event: &'a RunEvent,
}

impl JsonlSink {
    pub fn open(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            file: Mutex::new(file),
        })
    }

    /// Read the events of one run back from a log
    pub fn read(path: &Path, run_id: &str) -> Result<Vec<RunEvent>> {
        #[derive(Deserialize)]
        struct Line {
            run_id: String,
            #[serde(flatten)]
            event: RunEvent,
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event log {}", path.display()))?;
        let mut events = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: Line = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid event", path.display(), n + 1))?;
            if parsed.run_id == run_id {
                events.push(parsed.event);
            }
        }
        Ok(events)
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &RunEvent) {
        let line = LogLine {
            run_id: &self.run_id,
            at: Utc::now().to_rfc3339(),
            event,
        };
        let result = serde_json::to_string(&line)
            .map_err(anyhow::Error::from)
            .and_then(|json| {
                let mut file = self
                    .file
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
                writeln!(file, "{}", json)?;
                Ok(())
            });
        if let Err(e) = result {
            warn!("Failed to write event to {}: {}", self.path.display(), e);
        }
    }
}

/// Forwards every event to several sinks, in order
pub struct Tee<'a>(pub Vec<&'a dyn EventSink>);

impl EventSink for Tee<'_> {
    fn emit(&self, event: &RunEvent) {
        for sink in &self.0 {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_round_trip_filters_by_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log/events.jsonl");
        let a = JsonlSink::open(&path, "run-a").unwrap();
        let b = JsonlSink::open(&path, "run-b").unwrap();

        let started = RunEvent::PhaseStarted {
            phase: 0,
            label: "Tier 1".into(),
            units: 2,
        };
        let skipped = RunEvent::UnitSkipped {
            phase: 0,
            unit: "modify:a.py".into(),
        };
        a.emit(&started);
        b.emit(&skipped);
        a.emit(&skipped);

        assert_eq!(JsonlSink::read(&path, "run-a").unwrap(), vec![started, skipped.clone()]);
        assert_eq!(JsonlSink::read(&path, "run-b").unwrap(), vec![skipped]);
    }

    #[test]
    fn test_tee_forwards_in_order() {
        let first = VecSink::new();
        let second = VecSink::new();
        let tee = Tee(vec![&first, &second]);
        tee.emit(&RunEvent::PhaseAborted { phase: 1, aborted: 3 });
        assert_eq!(first.events(), second.events());
        assert_eq!(first.events().len(), 1);
    }
}
