//! `status` command - summary of the persisted run

use super::exit;
use super::run::exit_code_for;
use crate::cache::RunStore;
use crate::execution::{RunOutcome, RunSummary};
use crate::reporters::{self, OutputFormat};
use anyhow::{Context, Result};
use console::style;
use std::path::Path;

pub(super) fn run(path: &Path) -> Result<i32> {
    let repo_path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    let store = RunStore::for_repo(&repo_path);

    println!("  Repository: {}", style(repo_path.display()).cyan());
    println!("  Cache: {}", style(store.dir().display()).dim());

    let Some(plan) = store.load_plan()? else {
        println!(
            "  {} No plan yet. Run {}",
            style("[--]").dim(),
            style("archplan plan").cyan()
        );
        return Ok(exit::OK);
    };
    println!(
        "  {} Plan {}: {} phases, {} units",
        style("[OK]").green(),
        plan.id,
        plan.phases.len(),
        plan.total_units()
    );

    let Some(state) = store.load_state()? else {
        println!(
            "  {} Not started. Run {}",
            style("[--]").dim(),
            style("archplan run").cyan()
        );
        return Ok(exit::OK);
    };
    state.check_matches(&plan)?;

    let summary = RunSummary::fold(&plan, &state);
    print!("{}", reporters::summary(&summary, OutputFormat::Text)?);
    Ok(match summary.outcome {
        RunOutcome::InProgress => exit::OK,
        _ => exit_code_for(&summary),
    })
}
