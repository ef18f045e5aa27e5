//! Persisted run artifacts
//!
//! A repository's cache directory holds the current plan, the execution
//! state of the run over that plan, and an append-only JSONL event log.
//! State is rewritten after every decision so a run can resume after the
//! process exits.

pub mod paths;

pub use paths::{get_cache_dir, CACHE_DIR_ENV};

use crate::execution::ExecutionState;
use crate::planning::Plan;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads and writes the run artifacts of one repository
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn for_repo(repo_path: &Path) -> Self {
        Self {
            dir: get_cache_dir(repo_path),
        }
    }

    /// Store rooted at an explicit directory
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn plan_path(&self) -> PathBuf {
        self.dir.join("plan.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }

    /// Save a new plan. Any state from a previous plan is discarded.
    pub fn save_plan(&self, plan: &Plan) -> Result<()> {
        write_json(&self.plan_path(), plan)?;
        let state = self.state_path();
        if state.exists() {
            std::fs::remove_file(&state)
                .with_context(|| format!("Failed to remove stale {}", state.display()))?;
        }
        Ok(())
    }

    pub fn load_plan(&self) -> Result<Option<Plan>> {
        read_json(&self.plan_path())
    }

    pub fn save_state(&self, state: &ExecutionState) -> Result<()> {
        write_json(&self.state_path(), state)
    }

    pub fn load_state(&self) -> Result<Option<ExecutionState>> {
        read_json(&self.state_path())
    }
}

/// Write via a sibling temp file and rename, so a crash never leaves a
/// truncated document behind
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    debug!("Saved {}", path.display());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Corrupt cache file {}", path.display()))?;
    Ok(Some(value))
}
