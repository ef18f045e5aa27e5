//! Phased, resumable plan execution
//!
//! The [`Controller`] is a state machine that suspends at every decision
//! point. Decisions come from a [`DecisionSource`]: an interactive prompt in
//! the CLI, a script in tests, or [`AutoApprove`] for `--yes` runs.

mod batch;
mod controller;
mod events;
mod mutator;
mod state;

pub use batch::{apply_batch, apply_batch_with, AbortHandle, BatchResult};
pub use controller::{Checkpoint, Controller};
pub use events::{EventSink, JsonlSink, RunEvent, Tee, VecSink};
pub use mutator::{FileMutator, FsMutator, MutationError, MutationOutcome};
pub use state::{
    ExecutionState, PhaseSummary, RunOutcome, RunStatus, RunSummary, StatusCounts, UnitStatus,
};

use crate::planning::Plan;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Input accepted at a suspension point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Continue,
    SkipPhase,
    Abort,
    Apply,
    Skip,
    ApplyRemaining,
    Retry,
}

impl Decision {
    pub const ALL: [Decision; 7] = [
        Decision::Continue,
        Decision::SkipPhase,
        Decision::Abort,
        Decision::Apply,
        Decision::Skip,
        Decision::ApplyRemaining,
        Decision::Retry,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Decision::Continue => "continue",
            Decision::SkipPhase => "skip-phase",
            Decision::Abort => "abort",
            Decision::Apply => "apply",
            Decision::Skip => "skip",
            Decision::ApplyRemaining => "apply-remaining",
            Decision::Retry => "retry",
        }
    }

    pub fn parse(s: &str) -> Option<Decision> {
        let s = s.trim().to_lowercase().replace('_', "-");
        Decision::ALL.into_iter().find(|d| d.id() == s)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("decision '{decision}' is not valid while {status}")]
    InvalidDecision { decision: Decision, status: String },

    #[error("run is already {status}")]
    Finished { status: String },

    #[error("unit {unit} cannot go from {from} to {to}")]
    IllegalTransition {
        unit: String,
        from: UnitStatus,
        to: UnitStatus,
    },

    #[error("unknown change unit {unit}")]
    UnknownUnit { unit: String },

    #[error("execution state belongs to plan {found}, not {expected}")]
    PlanMismatch { expected: String, found: String },

    #[error("phase {phase} does not exist (plan has {phases})")]
    PhaseOutOfRange { phase: usize, phases: usize },
}

/// Supplies decisions at suspension points. `None` stops driving and
/// leaves the run suspended so it can be persisted.
pub trait DecisionSource {
    fn next_decision(
        &mut self,
        plan: &Plan,
        status: &RunStatus,
        allowed: &[Decision],
    ) -> Option<Decision>;
}

/// Pre-recorded decisions, consumed in order
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecisions {
    queue: VecDeque<Decision>,
}

impl ScriptedDecisions {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            queue: decisions.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl DecisionSource for ScriptedDecisions {
    fn next_decision(&mut self, _: &Plan, _: &RunStatus, _: &[Decision]) -> Option<Decision> {
        self.queue.pop_front()
    }
}

/// Applies everything; aborts on the first mutation or verification failure
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl DecisionSource for AutoApprove {
    fn next_decision(&mut self, _: &Plan, status: &RunStatus, _: &[Decision]) -> Option<Decision> {
        match status {
            RunStatus::AwaitingPhaseDecision { .. } | RunStatus::AwaitingUnitDecision { .. } => {
                Some(Decision::ApplyRemaining)
            }
            RunStatus::AwaitingMutationDecision { .. }
            | RunStatus::AwaitingVerificationDecision { .. } => Some(Decision::Abort),
            RunStatus::Idle | RunStatus::Completed | RunStatus::Aborted => None,
        }
    }
}

impl Controller<'_> {
    /// Feed decisions until the run finishes or the source stops.
    /// `checkpoint` sees the state after every decision.
    pub fn drive(
        &mut self,
        source: &mut dyn DecisionSource,
        mut checkpoint: impl FnMut(&ExecutionState) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        self.start()?;
        checkpoint(self.state())?;
        while !self.is_finished() {
            let allowed = self.allowed_decisions();
            let Some(decision) = source.next_decision(self.plan(), self.status(), allowed) else {
                break;
            };
            self.decide(decision)?;
            checkpoint(self.state())?;
        }
        Ok(())
    }
}
