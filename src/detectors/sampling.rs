//! Sampling policy for very large graphs
//!
//! Above a file-count threshold only a subset of parsed files is evaluated:
//! every core file, the N largest files, configured entry points, and a
//! seeded random share of the rest. Whatever is skipped is returned so it can
//! be reported; sampling is never silent.

use crate::config::SamplingConfig;
use crate::graph::SourceFile;
use crate::models::Layer;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SamplingPolicy {
    pub threshold_files: usize,
    pub largest: usize,
    pub percent: f64,
    pub seed: u64,
    pub entry_points: BTreeSet<PathBuf>,
}

impl SamplingPolicy {
    pub fn from_config(config: &SamplingConfig, entry_points: &[String]) -> Self {
        Self {
            threshold_files: config.threshold_files,
            largest: config.largest,
            percent: config.percent.clamp(0.0, 100.0),
            seed: config.seed,
            entry_points: entry_points.iter().map(PathBuf::from).collect(),
        }
    }

    /// Pick the files to evaluate. Input order does not matter; the
    /// selection is returned in path order.
    pub fn select<'g>(&self, files: &[&'g SourceFile]) -> Sample<'g> {
        let mut sorted: Vec<&'g SourceFile> = files.to_vec();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        if sorted.len() <= self.threshold_files {
            return Sample {
                selected: sorted,
                skipped: Vec::new(),
                applied: false,
            };
        }

        let mut keep: BTreeSet<&'g PathBuf> = BTreeSet::new();
        for file in sorted.iter().copied() {
            if file.layer == Layer::Core || self.entry_points.contains(&file.path) {
                keep.insert(&file.path);
            }
        }

        let mut by_size = sorted.clone();
        by_size.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.path.cmp(&b.path)));
        for file in by_size.iter().copied().take(self.largest) {
            keep.insert(&file.path);
        }

        let mut rest: Vec<&'g SourceFile> = sorted
            .iter()
            .copied()
            .filter(|f| !keep.contains(&f.path))
            .collect();
        let quota = ((rest.len() as f64) * self.percent / 100.0).ceil() as usize;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rest.shuffle(&mut rng);
        for file in rest.iter().copied().take(quota) {
            keep.insert(&file.path);
        }

        let (selected, skipped): (Vec<&'g SourceFile>, Vec<&'g SourceFile>) =
            sorted.into_iter().partition(|f| keep.contains(&f.path));

        Sample {
            selected,
            skipped: skipped.into_iter().map(|f| f.path.clone()).collect(),
            applied: true,
        }
    }
}

/// Result of applying a [`SamplingPolicy`]
#[derive(Debug)]
pub struct Sample<'g> {
    pub selected: Vec<&'g SourceFile>,
    pub skipped: Vec<PathBuf>,
    /// False when the graph was under the threshold
    pub applied: bool,
}

/// What sampling did, for reports
#[derive(Debug, Clone, Default, Serialize)]
pub struct SamplingSummary {
    pub candidates: usize,
    pub evaluated: usize,
    pub skipped: Vec<PathBuf>,
}
