//! `run` command - apply the plan phase by phase

use super::analyze::{ensure_newline, run_analysis, synthesize};
use super::exit;
use super::prompt::PromptDecisions;
use crate::cache::RunStore;
use crate::config::ProjectConfig;
use crate::execution::{
    AutoApprove, Controller, DecisionSource, EventSink, ExecutionState, FsMutator, JsonlSink,
    RunEvent, RunOutcome, RunSummary, Tee,
};
use crate::planning::Plan;
use crate::reporters::{self, render_event, OutputFormat};
use crate::verification::{Gate, ProcessRunner};
use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub(super) struct RunOptions {
    pub categories: Vec<String>,
    pub dry_run: bool,
    /// 1-based
    pub resume_phase: Option<usize>,
    pub yes: bool,
}

/// Prints every event as a progress line
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: &RunEvent) {
        // The final summary is printed once the run returns
        if !matches!(event, RunEvent::RunCompleted { .. }) {
            println!("{}", render_event(event));
        }
    }
}

/// Exit code for the outcome of a run
pub(super) fn exit_code_for(summary: &RunSummary) -> i32 {
    if summary.blocked_by_verification {
        return exit::BLOCKED;
    }
    match summary.outcome {
        RunOutcome::Completed => exit::OK,
        RunOutcome::Aborted | RunOutcome::InProgress => exit::ABORTED,
    }
}

pub(super) fn run(path: &Path, config: &ProjectConfig, options: RunOptions) -> Result<i32> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    let store = RunStore::for_repo(&root);

    let (plan, state) = match resumable(&store, options.dry_run)? {
        Some((plan, state)) => {
            println!(
                "{} run {} of plan {}",
                style("Resuming").bold(),
                state.run_id,
                plan.id
            );
            (plan, state)
        }
        None => {
            let analysis = run_analysis(
                &root,
                config,
                &options.categories,
                &[],
                false,
                config.execution.workers,
                true,
            )?;
            let plan = synthesize(&analysis)?;
            store.save_plan(&plan)?;
            if options.dry_run {
                print!("{}", ensure_newline(reporters::plan(&plan, OutputFormat::Text)?));
                return Ok(if plan.is_empty() { exit::OK } else { exit::VIOLATIONS });
            }
            let state = ExecutionState::new(&plan);
            (plan, state)
        }
    };

    let gate = Gate::new(
        Box::new(ProcessRunner),
        config.verify.command.clone(),
        root.clone(),
    )
    .with_timeout(config.verify.timeout_secs.map(Duration::from_secs));
    if let Some(cmd) = gate.command_line() {
        info!("Verifying phases with `{}`", cmd);
    }

    let mutator = FsMutator::new(&root);
    let console = ConsoleSink;
    let log = JsonlSink::open(&store.events_path(), &state.run_id)?;
    let sink = Tee(vec![&console as &dyn EventSink, &log]);

    let save_settled = |state: &ExecutionState| {
        if let Err(e) = store.save_state(state) {
            warn!("Failed to checkpoint run {}: {:#}", state.run_id, e);
        }
    };

    let mut controller = Controller::resume(&plan, state, &mutator, &gate, &sink)?
        .with_workers(config.execution.workers.unwrap_or(1))
        .with_checkpoint(&save_settled);
    if let Some(phase) = options.resume_phase {
        controller
            .start_at_phase(phase - 1)
            .with_context(|| format!("Cannot resume at phase {}", phase))?;
        store.save_state(controller.state())?;
    }

    let mut auto = AutoApprove;
    let mut prompt;
    let source: &mut dyn DecisionSource = if options.yes {
        &mut auto
    } else {
        prompt = PromptDecisions::stdio();
        &mut prompt
    };
    controller.drive(source, |state| store.save_state(state))?;

    let summary = controller.summary();
    print!("{}", ensure_newline(reporters::summary(&summary, OutputFormat::Text)?));
    if summary.outcome == RunOutcome::InProgress {
        println!(
            "{}",
            style("Run suspended; run `archplan run` again to continue").yellow()
        );
    }
    Ok(exit_code_for(&summary))
}

/// A persisted, unfinished run over the persisted plan
fn resumable(store: &RunStore, dry_run: bool) -> Result<Option<(Plan, ExecutionState)>> {
    if dry_run {
        return Ok(None);
    }
    let (Some(plan), Some(state)) = (store.load_plan()?, store.load_state()?) else {
        return Ok(None);
    };
    if state.status.is_finished() || state.check_matches(&plan).is_err() {
        return Ok(None);
    }
    Ok(Some((plan, state)))
}
