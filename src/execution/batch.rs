//! Batch application of a phase's remaining units
//!
//! Units are applied in dependency waves: a wave holds every unit whose
//! in-batch dependencies have been applied. Inside a wave up to `workers`
//! units run at once, and units sharing a path are serialized by a per-path
//! lock. A failure stops the batch after its wave; an abort stops it before
//! the next unit starts. An in-flight unit always finishes its operation.

use super::mutator::{FileMutator, MutationError, MutationOutcome};
use crate::planning::ChangeUnit;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Cooperative cancellation flag shared with whoever may abort a run
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One lock per path, created on first use
#[derive(Debug, Default)]
struct PathLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl PathLocks {
    /// Locks for `paths` in sorted order, so two units never wait on each other
    fn handles(&self, paths: &[&Path]) -> Vec<Arc<Mutex<()>>> {
        let mut sorted: Vec<&Path> = paths.to_vec();
        sorted.sort();
        sorted.dedup();
        sorted
            .into_iter()
            .map(|p| self.locks.entry(p.to_path_buf()).or_default().clone())
            .collect()
    }
}

/// Result of a batch, in input order
#[derive(Debug, Default)]
pub struct BatchResult {
    pub outcomes: Vec<(String, Result<MutationOutcome, MutationError>)>,
    /// Units never started because of a failure or an abort
    pub not_started: Vec<String>,
}

impl BatchResult {
    pub fn failed(&self) -> impl Iterator<Item = (&str, &MutationError)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (id.as_str(), e)))
    }
}

pub fn apply_batch(
    units: &[&ChangeUnit],
    mutator: &dyn FileMutator,
    workers: usize,
    abort: &AbortHandle,
) -> BatchResult {
    apply_batch_with(units, mutator, workers, abort, |_, _| {})
}

/// [`apply_batch`], calling `on_settled` for each finished unit as its wave
/// completes, on the calling thread
pub fn apply_batch_with(
    units: &[&ChangeUnit],
    mutator: &dyn FileMutator,
    workers: usize,
    abort: &AbortHandle,
    mut on_settled: impl FnMut(&ChangeUnit, &Result<MutationOutcome, MutationError>),
) -> BatchResult {
    let in_batch: HashSet<&str> = units.iter().map(|u| u.id.as_str()).collect();
    let locks = PathLocks::default();
    let mut applied: HashSet<&str> = HashSet::new();
    let mut results: HashMap<&str, Result<MutationOutcome, MutationError>> = HashMap::new();
    let mut remaining: Vec<&ChangeUnit> = units.to_vec();
    let mut wave_no = 0;

    while !remaining.is_empty() && !abort.is_aborted() {
        let (wave, rest): (Vec<&ChangeUnit>, Vec<&ChangeUnit>) =
            remaining.into_iter().partition(|u| {
                u.depends_on
                    .iter()
                    .all(|d| !in_batch.contains(d.as_str()) || applied.contains(d.as_str()))
            });
        remaining = rest;
        if wave.is_empty() {
            break;
        }
        wave_no += 1;
        debug!("Batch wave {}: {} units", wave_no, wave.len());

        let mut failed = false;
        for (unit, result) in wave.iter().zip(run_wave(&wave, mutator, workers, &locks, abort)) {
            let Some(result) = result else {
                continue;
            };
            on_settled(unit, &result);
            match result {
                Ok(outcome) => {
                    applied.insert(unit.id.as_str());
                    results.insert(unit.id.as_str(), Ok(outcome));
                }
                Err(e) => {
                    failed = true;
                    results.insert(unit.id.as_str(), Err(e));
                }
            }
        }
        if failed {
            break;
        }
    }

    let mut batch = BatchResult::default();
    for unit in units {
        match results.remove(unit.id.as_str()) {
            Some(result) => batch.outcomes.push((unit.id.clone(), result)),
            None => batch.not_started.push(unit.id.clone()),
        }
    }
    batch
}

type WaveSlot = Option<Result<MutationOutcome, MutationError>>;

/// Apply one wave; `None` marks units skipped by an abort
fn run_wave(
    wave: &[&ChangeUnit],
    mutator: &dyn FileMutator,
    workers: usize,
    locks: &PathLocks,
    abort: &AbortHandle,
) -> Vec<WaveSlot> {
    let queue: Mutex<VecDeque<usize>> = Mutex::new((0..wave.len()).collect());
    let slots: Mutex<Vec<WaveSlot>> = Mutex::new((0..wave.len()).map(|_| None).collect());

    rayon::scope(|s| {
        for _ in 0..workers.max(1).min(wave.len()) {
            s.spawn(|_| loop {
                let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                let Some(i) = next else {
                    break;
                };
                if abort.is_aborted() {
                    break;
                }
                let unit = wave[i];
                let handles = locks.handles(&unit.touched_paths());
                let _guards: Vec<_> = handles
                    .iter()
                    .map(|m| m.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
                    .collect();

                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    mutator.apply(unit)
                }))
                .unwrap_or_else(|panic_info| {
                    let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    warn!("Mutator panicked on {}: {}", unit.id, message);
                    Err(MutationError::Panicked {
                        unit: unit.id.clone(),
                        message,
                    })
                });

                if let Ok(mut slots) = slots.lock() {
                    slots[i] = Some(result);
                }
            });
        }
    });

    slots.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
}
