//! `analyze` and `plan` commands

use super::exit;
use crate::cache::RunStore;
use crate::config::ProjectConfig;
use crate::pipeline::{self, Analysis, AnalysisOptions};
use crate::planning::{Plan, PriorityPolicy};
use crate::reporters::{self, OutputFormat};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Create bar progress style
fn create_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░  ")
}

/// Run the analysis pipeline, with a progress bar on interactive terminals
pub(super) fn run_analysis(
    path: &Path,
    config: &ProjectConfig,
    categories: &[String],
    rule_ids: &[String],
    no_sampling: bool,
    workers: Option<usize>,
    show_progress: bool,
) -> Result<Analysis> {
    let mut options = AnalysisOptions::new();
    options.categories = categories.to_vec();
    options.rule_ids = rule_ids.to_vec();
    options.no_sampling = no_sampling;
    options.workers = workers.unwrap_or(0);

    let bar = (show_progress && console::Term::stderr().is_term()).then(|| {
        let bar = ProgressBar::new(0);
        bar.set_style(create_bar_style());
        bar.set_message("evaluating rules");
        bar
    });
    if let Some(bar) = &bar {
        let bar = bar.clone();
        options.progress = Some(Box::new(move |done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        }));
    }

    let analysis = pipeline::analyze(path, config, options);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    analysis
}

pub(super) fn analyze(
    path: &Path,
    config: &ProjectConfig,
    categories: &[String],
    rule_ids: &[String],
    format: &str,
    no_sampling: bool,
    workers: Option<usize>,
) -> Result<i32> {
    let format = OutputFormat::from_str(format)?;
    let analysis = run_analysis(
        path,
        config,
        categories,
        rule_ids,
        no_sampling,
        workers,
        format == OutputFormat::Text,
    )?;
    let report = analysis.report();
    print!("{}", ensure_newline(reporters::analysis(&report, format)?));

    let found = report.violations.iter().filter(|v| !v.is_internal()).count();
    Ok(if found > 0 { exit::VIOLATIONS } else { exit::OK })
}

/// Synthesize the plan for the current state of the repository
pub(super) fn synthesize(analysis: &Analysis) -> Result<Plan> {
    let plan = analysis
        .plan(&PriorityPolicy::default())
        .context("Failed to order the refactoring plan")?;
    info!(
        "Plan {}: {} phases, {} units",
        plan.id,
        plan.phases.len(),
        plan.total_units()
    );
    Ok(plan)
}

pub(super) fn plan(
    path: &Path,
    config: &ProjectConfig,
    categories: &[String],
    format: &str,
    output: Option<&Path>,
    workers: Option<usize>,
) -> Result<i32> {
    let format = OutputFormat::from_str(format)?;
    let analysis = run_analysis(
        path,
        config,
        categories,
        &[],
        false,
        workers,
        format == OutputFormat::Text,
    )?;
    let plan = synthesize(&analysis)?;
    RunStore::for_repo(&analysis.root).save_plan(&plan)?;

    let rendered = ensure_newline(reporters::plan(&plan, format)?);
    if let Some(output) = output {
        std::fs::write(output, &rendered)
            .with_context(|| format!("Failed to write {}", output.display()))?;
    }
    print!("{}", rendered);

    Ok(if plan.is_empty() { exit::OK } else { exit::VIOLATIONS })
}

pub(super) fn ensure_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}
