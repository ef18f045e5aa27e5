//! Health scoring
//!
//! # Scoring Formula
//!
//! ```text
//! score = clamp(10 - 2 × critical - 1 × major - 0.25 × minor, 0, 10)
//! ```
//!
//! `info` violations never affect the score. A score can be computed for the
//! whole graph, one directory (files directly inside it) or one file, by
//! filtering violations first.
//!
//! Scores are pure functions of the violation set, so [`HealthCalculator`]
//! memoises them by scope and an xxh3 hash of the violation ids.

use crate::models::{Violation, ViolationSummary};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

pub const MAX_SCORE: f64 = 10.0;
pub const CRITICAL_WEIGHT: f64 = 2.0;
pub const MAJOR_WEIGHT: f64 = 1.0;
pub const MINOR_WEIGHT: f64 = 0.25;

/// Score from severity counts
pub fn score_counts(breakdown: &ViolationSummary) -> f64 {
    let penalty = breakdown.critical as f64 * CRITICAL_WEIGHT
        + breakdown.major as f64 * MAJOR_WEIGHT
        + breakdown.minor as f64 * MINOR_WEIGHT;
    (MAX_SCORE - penalty).clamp(0.0, MAX_SCORE)
}

/// Score of a violation set
pub fn score<'a>(violations: impl IntoIterator<Item = &'a Violation>) -> f64 {
    score_counts(&ViolationSummary::from_violations(violations))
}

/// Letter grade: A ≥ 9, B ≥ 8, C ≥ 7, D ≥ 6, else F
pub fn grade(value: f64) -> &'static str {
    if value >= 9.0 {
        "A"
    } else if value >= 8.0 {
        "B"
    } else if value >= 7.0 {
        "C"
    } else if value >= 6.0 {
        "D"
    } else {
        "F"
    }
}

/// What a score covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum Scope {
    Graph,
    /// Files directly inside the directory
    Directory(PathBuf),
    File(PathBuf),
}

impl Scope {
    pub fn contains(&self, path: &Path) -> bool {
        match self {
            Scope::Graph => true,
            Scope::Directory(dir) => path.parent().unwrap_or(Path::new("")) == dir.as_path(),
            Scope::File(file) => path == file.as_path(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Graph => write!(f, "(all files)"),
            Scope::Directory(dir) if dir.as_os_str().is_empty() => write!(f, "./"),
            Scope::Directory(dir) => write!(f, "{}/", dir.display()),
            Scope::File(file) => write!(f, "{}", file.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthScore {
    pub scope: Scope,
    pub value: f64,
    pub grade: &'static str,
    pub breakdown: ViolationSummary,
}

impl HealthScore {
    fn from_violations(scope: Scope, violations: &[&Violation]) -> Self {
        let breakdown = ViolationSummary::from_violations(violations.iter().copied());
        let value = score_counts(&breakdown);
        Self {
            scope,
            value,
            grade: grade(value),
            breakdown,
        }
    }
}

/// Memoising health calculator
#[derive(Debug, Default)]
pub struct HealthCalculator {
    cache: DashMap<(Scope, u64), HealthScore>,
}

impl HealthCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score the violations that fall inside `scope`
    pub fn score_scope(&self, scope: Scope, violations: &[Violation]) -> HealthScore {
        let in_scope: Vec<&Violation> = violations
            .iter()
            .filter(|v| scope.contains(&v.location.path))
            .collect();
        let key = (scope, violation_set_hash(&in_scope));
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let score = HealthScore::from_violations(key.0.clone(), &in_scope);
        self.cache.insert(key, score.clone());
        score
    }

    pub fn graph_score(&self, violations: &[Violation]) -> HealthScore {
        self.score_scope(Scope::Graph, violations)
    }

    /// One score per directory holding any of `files`, worst first
    pub fn directory_scores<'a>(
        &self,
        files: impl IntoIterator<Item = &'a Path>,
        violations: &[Violation],
    ) -> Vec<HealthScore> {
        let dirs: BTreeSet<PathBuf> = files
            .into_iter()
            .map(|p| p.parent().map(Path::to_path_buf).unwrap_or_default())
            .collect();
        let mut scores: Vec<HealthScore> = dirs
            .into_iter()
            .map(|d| self.score_scope(Scope::Directory(d), violations))
            .collect();
        sort_worst_first(&mut scores);
        scores
    }

    /// The `limit` lowest-scoring files that have any violation
    pub fn worst_files(&self, violations: &[Violation], limit: usize) -> Vec<HealthScore> {
        let files: BTreeSet<&Path> = violations.iter().map(|v| v.location.path.as_path()).collect();
        let mut scores: Vec<HealthScore> = files
            .into_iter()
            .map(|f| self.score_scope(Scope::File(f.to_path_buf()), violations))
            .collect();
        sort_worst_first(&mut scores);
        scores.truncate(limit);
        scores
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

fn sort_worst_first(scores: &mut [HealthScore]) {
    scores.sort_by(|a, b| {
        a.value
            .total_cmp(&b.value)
            .then_with(|| b.breakdown.total.cmp(&a.breakdown.total))
            .then_with(|| a.scope.cmp(&b.scope))
    });
}

/// Order-independent hash of a violation id multiset; repeated ids count
fn violation_set_hash(violations: &[&Violation]) -> u64 {
    let mut ids: Vec<&str> = violations.iter().map(|v| v.id.as_str()).collect();
    ids.sort_unstable();
    let mut buf = String::new();
    for id in ids {
        buf.push_str(id);
        buf.push('\n');
    }
    xxh3_64(buf.as_bytes())
}
