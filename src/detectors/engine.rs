//! Rule evaluation engine with parallel support
//!
//! Every `(rule, file)` pair is evaluated on a bounded rayon pool. Pairs are
//! isolated: a predicate that returns an error or panics produces one
//! `internal`/`info` violation for that pair and the pass continues. The
//! merged output is stably sorted so it never depends on scheduling.

use super::sampling::{SamplingPolicy, SamplingSummary};
use crate::graph::{ModuleGraph, SourceFile};
use crate::models::{Violation, ViolationSummary};
use crate::rules::Rule;
use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Progress callback: `(pairs done, total pairs)`
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Output of one detection pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionReport {
    pub violations: Vec<Violation>,
    pub summary: ViolationSummary,
    pub rules_run: usize,
    pub files_evaluated: usize,
    /// Files excluded from evaluation because they failed to parse
    pub unparseable: Vec<PathBuf>,
    /// Present when sampling reduced the evaluated set
    pub sampling: Option<SamplingSummary>,
    /// `(rule, file)` pairs that errored or panicked
    pub rule_failures: usize,
    pub duration_ms: u64,
}

/// Evaluates rules against a module graph
pub struct DetectionEngine {
    workers: usize,
    sampling: Option<SamplingPolicy>,
    progress_callback: Option<ProgressCallback>,
}

impl DetectionEngine {
    /// Create a new engine
    ///
    /// # Arguments
    /// * `workers` - Number of worker threads (0 = auto-detect)
    pub fn new(workers: usize) -> Self {
        let actual_workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
                .min(16) // Cap at 16 threads
        } else {
            workers
        };

        Self {
            workers: actual_workers,
            sampling: None,
            progress_callback: None,
        }
    }

    pub fn with_sampling(mut self, policy: Option<SamplingPolicy>) -> Self {
        self.sampling = policy;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every rule against every evaluated file
    pub fn detect(&self, graph: &ModuleGraph, rules: &[&Rule]) -> Result<DetectionReport> {
        let start = Instant::now();

        let parsed: Vec<&SourceFile> = graph.files().filter(|f| f.is_parsed()).collect();
        let unparseable: Vec<PathBuf> = graph.unparseable().map(|f| f.path.clone()).collect();

        let (files, sampling) = match &self.sampling {
            Some(policy) => {
                let sample = policy.select(&parsed);
                if sample.applied {
                    info!(
                        "Sampling: evaluating {} of {} files ({} skipped, seed {})",
                        sample.selected.len(),
                        parsed.len(),
                        sample.skipped.len(),
                        policy.seed
                    );
                    let summary = SamplingSummary {
                        candidates: parsed.len(),
                        evaluated: sample.selected.len(),
                        skipped: sample.skipped,
                    };
                    (sample.selected, Some(summary))
                } else {
                    (sample.selected, None)
                }
            }
            None => (parsed, None),
        };

        let pairs: Vec<(&Rule, &SourceFile)> = rules
            .iter()
            .flat_map(|rule| files.iter().map(move |file| (*rule, *file)))
            .collect();
        let total = pairs.len();
        debug!(
            "Evaluating {} rules x {} files on {} workers",
            rules.len(),
            files.len(),
            self.workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        let completed = AtomicUsize::new(0);
        let results: Vec<(Vec<Violation>, bool)> = pool.install(|| {
            pairs
                .par_iter()
                .map(|(rule, file)| {
                    let result = self.evaluate_pair(rule, graph, file);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = self.progress_callback {
                        callback(done, total);
                    }
                    result
                })
                .collect()
        });

        let rule_failures = results.iter().filter(|(_, failed)| *failed).count();
        let mut violations: Vec<Violation> =
            results.into_iter().flat_map(|(vs, _)| vs).collect();
        violations.sort_by(|a, b| a.canonical_cmp(b));

        let report = DetectionReport {
            summary: ViolationSummary::from_violations(&violations),
            violations,
            rules_run: rules.len(),
            files_evaluated: files.len(),
            unparseable,
            sampling,
            rule_failures,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Detection complete: {} violations from {} rules over {} files in {}ms",
            report.violations.len(),
            report.rules_run,
            report.files_evaluated,
            report.duration_ms
        );
        if rule_failures > 0 {
            warn!("{} rule evaluations failed", rule_failures);
        }

        Ok(report)
    }

    /// Evaluate one pair; the flag is true when the predicate failed
    fn evaluate_pair(
        &self,
        rule: &Rule,
        graph: &ModuleGraph,
        file: &SourceFile,
    ) -> (Vec<Violation>, bool) {
        // Wrap in catch_unwind to handle panics
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| rule.evaluate(graph, file)));

        match outcome {
            Ok(Ok(violations)) => (violations, false),
            Ok(Err(e)) => {
                warn!(
                    "Rule {} failed on {}: {:#}",
                    rule.id,
                    file.path.display(),
                    e
                );
                (
                    vec![Violation::internal(&rule.id, &file.path, &format!("{:#}", e))],
                    true,
                )
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                error!(
                    "Rule {} panicked on {}: {}",
                    rule.id,
                    file.path.display(),
                    panic_msg
                );
                (
                    vec![Violation::internal(
                        &rule.id,
                        &file.path,
                        &format!("panic: {}", panic_msg),
                    )],
                    true,
                )
            }
        }
    }
}

impl Default for DetectionEngine {
    fn default() -> Self {
        Self::new(0)
    }
}
