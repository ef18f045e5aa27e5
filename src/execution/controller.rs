//! Phased execution controller
//!
//! ```text
//! Idle → PhaseStarted → AwaitingPhaseDecision ─Continue→ AwaitingUnitDecision ─Apply/Skip→ …
//!                            │ SkipPhase                    │ ApplyRemaining (batch)
//!                            ▼                              ▼
//!                     (verify if anything applied) → next phase | Completed
//! Abort from any suspension → Aborted
//! ```
//!
//! A unit whose dependency was skipped, failed or blocked is never offered or
//! batched; it moves straight to `Blocked`.
//!
//! The controller only moves when [`Controller::decide`] is called; between
//! calls its whole position is [`ExecutionState`], which can be persisted and
//! handed to [`Controller::resume`].

use super::batch::{apply_batch_with, AbortHandle};
use super::events::{EventSink, RunEvent};
use super::mutator::FileMutator;
use super::state::{ExecutionState, RunStatus, RunSummary, UnitStatus};
use super::{ControllerError, Decision};
use crate::planning::{ChangeUnit, Plan};
use crate::verification::Gate;
use tracing::{debug, info, warn};

/// Lines of verification output kept at a failed gate
const DETAIL_LINES: usize = 20;

/// Called with the state after each unit a batch settles
pub type Checkpoint<'a> = &'a dyn Fn(&ExecutionState);

pub struct Controller<'a> {
    plan: &'a Plan,
    state: ExecutionState,
    mutator: &'a dyn FileMutator,
    gate: &'a Gate,
    sink: &'a dyn EventSink,
    workers: usize,
    abort: AbortHandle,
    checkpoint: Option<Checkpoint<'a>>,
}

impl<'a> Controller<'a> {
    pub fn new(
        plan: &'a Plan,
        mutator: &'a dyn FileMutator,
        gate: &'a Gate,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            plan,
            state: ExecutionState::new(plan),
            mutator,
            gate,
            sink,
            workers: 1,
            abort: AbortHandle::new(),
            checkpoint: None,
        }
    }

    /// Continue from persisted state; no event is re-emitted
    pub fn resume(
        plan: &'a Plan,
        state: ExecutionState,
        mutator: &'a dyn FileMutator,
        gate: &'a Gate,
        sink: &'a dyn EventSink,
    ) -> Result<Self, ControllerError> {
        state.check_matches(plan)?;
        let mut controller = Self::new(plan, mutator, gate, sink);
        controller.state = state;
        Ok(controller)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = handle;
        self
    }

    /// Persist progress inside a batch, not only between decisions
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint<'a>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn plan(&self) -> &Plan {
        self.plan
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn into_state(self) -> ExecutionState {
        self.state
    }

    pub fn status(&self) -> &RunStatus {
        &self.state.status
    }

    pub fn is_finished(&self) -> bool {
        self.state.status.is_finished()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::fold(self.plan, &self.state)
    }

    /// Unit awaiting a decision, if any
    pub fn current_unit(&self) -> Option<&ChangeUnit> {
        match &self.state.status {
            RunStatus::AwaitingUnitDecision { unit, .. } => self.plan.unit(unit),
            _ => None,
        }
    }

    pub fn allowed_decisions(&self) -> &'static [Decision] {
        use Decision::*;
        match self.state.status {
            RunStatus::Idle | RunStatus::Completed | RunStatus::Aborted => &[],
            RunStatus::AwaitingPhaseDecision { .. } => &[Continue, ApplyRemaining, SkipPhase, Abort],
            RunStatus::AwaitingUnitDecision { .. } => &[Apply, Skip, ApplyRemaining, SkipPhase, Abort],
            RunStatus::AwaitingMutationDecision { .. } => &[Continue, SkipPhase, Abort],
            RunStatus::AwaitingVerificationDecision { .. } => &[Retry, SkipPhase, Abort],
        }
    }

    /// Present the first phase. A no-op for a run that already started.
    pub fn start(&mut self) -> Result<(), ControllerError> {
        if self.state.status != RunStatus::Idle {
            return Ok(());
        }
        info!(
            "Starting run {} of plan {} ({} phases, {} units)",
            self.state.run_id,
            self.plan.id,
            self.plan.phases.len(),
            self.plan.total_units()
        );
        self.present_phase(0)
    }

    /// Skip every pending unit before `phase` and present `phase` (0-based)
    pub fn start_at_phase(&mut self, phase: usize) -> Result<(), ControllerError> {
        if !matches!(
            self.state.status,
            RunStatus::Idle | RunStatus::AwaitingPhaseDecision { .. }
        ) {
            return Err(ControllerError::InvalidDecision {
                decision: Decision::SkipPhase,
                status: describe(&self.state.status),
            });
        }
        if phase >= self.plan.phases.len() {
            return Err(ControllerError::PhaseOutOfRange {
                phase: phase + 1,
                phases: self.plan.phases.len(),
            });
        }
        for earlier in 0..phase {
            self.skip_remaining(earlier)?;
        }
        self.present_phase(phase)
    }

    pub fn decide(&mut self, decision: Decision) -> Result<(), ControllerError> {
        if self.is_finished() {
            return Err(ControllerError::Finished {
                status: describe(&self.state.status),
            });
        }
        if !self.allowed_decisions().contains(&decision) {
            return Err(ControllerError::InvalidDecision {
                decision,
                status: describe(&self.state.status),
            });
        }
        debug!("Decision {} at {}", decision, describe(&self.state.status));

        if decision == Decision::Abort {
            return self.abort_run();
        }

        match (self.state.status.clone(), decision) {
            (RunStatus::AwaitingPhaseDecision { phase }, Decision::Continue) => {
                self.next_unit(phase)
            }
            (RunStatus::AwaitingPhaseDecision { phase }, Decision::ApplyRemaining)
            | (RunStatus::AwaitingUnitDecision { phase, .. }, Decision::ApplyRemaining) => {
                self.apply_remaining(phase)
            }
            (RunStatus::AwaitingPhaseDecision { phase }, Decision::SkipPhase)
            | (RunStatus::AwaitingUnitDecision { phase, .. }, Decision::SkipPhase) => {
                self.skip_remaining(phase)?;
                self.finish_phase(phase)
            }
            (RunStatus::AwaitingUnitDecision { phase, unit }, Decision::Apply) => {
                self.apply_one(phase, &unit)
            }
            (RunStatus::AwaitingUnitDecision { phase, unit }, Decision::Skip) => {
                self.state.transition(&unit, UnitStatus::Skipped)?;
                self.sink.emit(&RunEvent::UnitSkipped { phase, unit });
                self.next_unit(phase)
            }
            (RunStatus::AwaitingMutationDecision { phase, .. }, Decision::Continue)
            | (RunStatus::AwaitingMutationDecision { phase, .. }, Decision::SkipPhase) => {
                self.finish_phase(phase)
            }
            (RunStatus::AwaitingVerificationDecision { phase, .. }, Decision::Retry) => {
                self.verify_phase(phase)
            }
            (RunStatus::AwaitingVerificationDecision { phase, .. }, Decision::SkipPhase) => {
                self.present_phase(phase + 1)
            }
            (status, decision) => Err(ControllerError::InvalidDecision {
                decision,
                status: describe(&status),
            }),
        }
    }

    fn present_phase(&mut self, phase: usize) -> Result<(), ControllerError> {
        self.state.current_phase_index = phase;
        let Some(current) = self.plan.phases.get(phase) else {
            return self.complete();
        };
        if self.abort.is_aborted() {
            return self.abort_run();
        }
        self.sink.emit(&RunEvent::PhaseStarted {
            phase,
            label: current.label.clone(),
            units: current.units.len(),
        });
        self.state.status = RunStatus::AwaitingPhaseDecision { phase };
        Ok(())
    }

    fn pending_in(&self, phase: usize) -> Vec<&'a ChangeUnit> {
        let plan: &'a Plan = self.plan;
        plan.phases
            .get(phase)
            .map(|p| {
                p.units
                    .iter()
                    .filter(|u| self.state.status_of(&u.id) == Some(UnitStatus::Pending))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn next_unit(&mut self, phase: usize) -> Result<(), ControllerError> {
        if self.abort.is_aborted() {
            return self.abort_run();
        }
        loop {
            let Some(unit) = self.pending_in(phase).into_iter().next() else {
                return self.finish_phase(phase);
            };
            let unmet = self.unmet_dependencies(unit);
            if !unmet.is_empty() {
                self.block(phase, unit, unmet)?;
                continue;
            }
            self.sink.emit(&RunEvent::UnitDecisionRequested {
                phase,
                unit: unit.id.clone(),
                description: unit.describe(),
                rationale: unit.rationale.clone(),
            });
            self.state.status = RunStatus::AwaitingUnitDecision {
                phase,
                unit: unit.id.clone(),
            };
            return Ok(());
        }
    }

    /// Dependencies that settled without being applied. Dependencies always
    /// precede their dependents, so a pending one is still in the same batch.
    fn unmet_dependencies(&self, unit: &ChangeUnit) -> Vec<String> {
        unit.depends_on
            .iter()
            .filter(|d| {
                matches!(
                    self.state.status_of(d),
                    Some(status) if !matches!(status, UnitStatus::Applied | UnitStatus::Pending)
                )
            })
            .cloned()
            .collect()
    }

    fn block(&mut self, phase: usize, unit: &ChangeUnit, unmet: Vec<String>) -> Result<(), ControllerError> {
        self.state.transition(&unit.id, UnitStatus::Blocked)?;
        info!("Unit {} blocked: needs {}", unit.id, unmet.join(", "));
        self.sink.emit(&RunEvent::UnitBlocked {
            phase,
            unit: unit.id.clone(),
            unmet_dependencies: unmet,
        });
        Ok(())
    }

    fn apply_one(&mut self, phase: usize, unit_id: &str) -> Result<(), ControllerError> {
        let plan: &'a Plan = self.plan;
        let unit = plan
            .unit(unit_id)
            .ok_or_else(|| ControllerError::UnknownUnit {
                unit: unit_id.to_string(),
            })?;
        match self.mutator.apply(unit) {
            Ok(outcome) => {
                self.state.transition(unit_id, UnitStatus::Applied)?;
                self.sink.emit(&RunEvent::UnitApplied {
                    phase,
                    unit: unit_id.to_string(),
                    note: outcome.note,
                });
                self.next_unit(phase)
            }
            Err(e) => self.fail_units(phase, &[(unit_id.to_string(), e.to_string())]),
        }
    }

    fn apply_remaining(&mut self, phase: usize) -> Result<(), ControllerError> {
        // In phase order, so blocking carries down dependency chains
        for unit in self.pending_in(phase) {
            let unmet = self.unmet_dependencies(unit);
            if !unmet.is_empty() {
                self.block(phase, unit, unmet)?;
            }
        }
        // A checkpoint taken mid-batch resumes at the phase prompt
        self.state.status = RunStatus::AwaitingPhaseDecision { phase };

        let pending = self.pending_in(phase);
        info!("Applying {} remaining units of phase {}", pending.len(), phase + 1);
        let (mutator, sink, checkpoint) = (self.mutator, self.sink, self.checkpoint);
        let state = &mut self.state;
        let mut settle_error = None;
        let result = apply_batch_with(&pending, mutator, self.workers, &self.abort, |unit, outcome| {
            let Ok(outcome) = outcome else {
                return;
            };
            if settle_error.is_some() {
                return;
            }
            if let Err(e) = state.transition(&unit.id, UnitStatus::Applied) {
                settle_error = Some(e);
                return;
            }
            sink.emit(&RunEvent::UnitApplied {
                phase,
                unit: unit.id.clone(),
                note: outcome.note.clone(),
            });
            if let Some(checkpoint) = checkpoint {
                checkpoint(&*state);
            }
        });
        if let Some(e) = settle_error {
            return Err(e);
        }

        let failures: Vec<(String, String)> = result
            .outcomes
            .into_iter()
            .filter_map(|(id, outcome)| outcome.err().map(|e| (id, e.to_string())))
            .collect();

        if self.abort.is_aborted() {
            for (id, error) in failures {
                self.state.transition(&id, UnitStatus::Failed)?;
                self.sink.emit(&RunEvent::UnitFailed {
                    phase,
                    unit: id,
                    error,
                    blocked: Vec::new(),
                });
            }
            return self.abort_run();
        }
        if failures.is_empty() {
            return self.finish_phase(phase);
        }
        self.fail_units(phase, &failures)
    }

    /// Mark failures, block the rest of the phase and suspend
    fn fail_units(&mut self, phase: usize, failures: &[(String, String)]) -> Result<(), ControllerError> {
        for (id, _) in failures {
            self.state.transition(id, UnitStatus::Failed)?;
        }
        let blocked: Vec<String> = self.pending_in(phase).iter().map(|u| u.id.clone()).collect();
        for id in &blocked {
            self.state.transition(id, UnitStatus::Blocked)?;
        }

        for (i, (id, error)) in failures.iter().enumerate() {
            warn!("Unit {} failed: {}", id, error);
            self.sink.emit(&RunEvent::UnitFailed {
                phase,
                unit: id.clone(),
                error: error.clone(),
                blocked: if i == 0 { blocked.clone() } else { Vec::new() },
            });
        }

        let (unit, error) = failures[0].clone();
        self.state.status = RunStatus::AwaitingMutationDecision { phase, unit, error };
        Ok(())
    }

    fn skip_remaining(&mut self, phase: usize) -> Result<(), ControllerError> {
        for unit in self.pending_in(phase) {
            self.state.transition(&unit.id, UnitStatus::Skipped)?;
            self.sink.emit(&RunEvent::UnitSkipped {
                phase,
                unit: unit.id.clone(),
            });
        }
        Ok(())
    }

    /// Verify when anything in the phase landed, otherwise move on
    fn finish_phase(&mut self, phase: usize) -> Result<(), ControllerError> {
        let any_applied = self.plan.phases.get(phase).is_some_and(|p| {
            p.units
                .iter()
                .any(|u| self.state.status_of(&u.id) == Some(UnitStatus::Applied))
        });
        if any_applied {
            self.verify_phase(phase)
        } else {
            self.present_phase(phase + 1)
        }
    }

    fn verify_phase(&mut self, phase: usize) -> Result<(), ControllerError> {
        match self.gate.verify() {
            Ok(report) if report.skipped => {
                self.sink.emit(&RunEvent::PhaseVerified {
                    phase,
                    passed: true,
                    exit_code: None,
                    duration_ms: 0,
                    detail: Some("no verification command configured".to_string()),
                });
                self.present_phase(phase + 1)
            }
            Ok(report) => {
                self.state.verification.insert(phase, report.passed);
                self.sink.emit(&RunEvent::PhaseVerified {
                    phase,
                    passed: report.passed,
                    exit_code: Some(report.exit_code),
                    duration_ms: report.duration_ms,
                    detail: None,
                });
                if report.passed {
                    self.present_phase(phase + 1)
                } else {
                    self.state.status = RunStatus::AwaitingVerificationDecision {
                        phase,
                        exit_code: Some(report.exit_code),
                        detail: report.tail(DETAIL_LINES),
                    };
                    Ok(())
                }
            }
            Err(e) => {
                warn!("Verification of phase {} errored: {}", phase + 1, e);
                self.state.verification.insert(phase, false);
                self.sink.emit(&RunEvent::PhaseVerified {
                    phase,
                    passed: false,
                    exit_code: None,
                    duration_ms: 0,
                    detail: Some(e.to_string()),
                });
                self.state.status = RunStatus::AwaitingVerificationDecision {
                    phase,
                    exit_code: None,
                    detail: e.to_string(),
                };
                Ok(())
            }
        }
    }

    /// Freeze every unlanded unit; already applied units stay applied
    fn abort_run(&mut self) -> Result<(), ControllerError> {
        let unlanded: Vec<String> = self
            .plan
            .units()
            .filter(|u| {
                matches!(
                    self.state.status_of(&u.id),
                    Some(UnitStatus::Pending) | Some(UnitStatus::Blocked)
                )
            })
            .map(|u| u.id.clone())
            .collect();
        for id in &unlanded {
            self.state.transition(id, UnitStatus::Aborted)?;
        }
        let phase = self.state.current_phase_index;
        warn!("Run aborted in phase {}: {} units aborted", phase + 1, unlanded.len());
        self.sink.emit(&RunEvent::PhaseAborted {
            phase,
            aborted: unlanded.len(),
        });
        self.state.status = RunStatus::Aborted;
        self.sink.emit(&RunEvent::RunCompleted {
            summary: self.summary(),
        });
        Ok(())
    }

    fn complete(&mut self) -> Result<(), ControllerError> {
        self.state.status = RunStatus::Completed;
        let summary = self.summary();
        info!(
            "Run completed: {} applied, {} skipped, {} failed",
            summary.counts.applied, summary.counts.skipped, summary.counts.failed
        );
        self.sink.emit(&RunEvent::RunCompleted { summary });
        Ok(())
    }
}

fn describe(status: &RunStatus) -> String {
    match status {
        RunStatus::Idle => "idle (not started)".to_string(),
        RunStatus::AwaitingPhaseDecision { phase } => {
            format!("awaiting a decision for phase {}", phase + 1)
        }
        RunStatus::AwaitingUnitDecision { unit, .. } => {
            format!("awaiting a decision for unit {}", unit)
        }
        RunStatus::AwaitingMutationDecision { unit, .. } => {
            format!("paused after unit {} failed", unit)
        }
        RunStatus::AwaitingVerificationDecision { phase, .. } => {
            format!("paused after phase {} failed verification", phase + 1)
        }
        RunStatus::Completed => "completed".to_string(),
        RunStatus::Aborted => "aborted".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::events::VecSink;
    use crate::execution::mutator::{MutationError, MutationOutcome};
    use crate::execution::state::RunOutcome;
    use crate::planning::Phase;
    use crate::verification::{BuildRunner, CommandOutput, VerificationError};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeMutator {
        applied: Mutex<Vec<String>>,
        fail_on: Option<String>,
        abort_on: Option<(String, AbortHandle)>,
    }

    impl FileMutator for FakeMutator {
        fn apply(&self, unit: &ChangeUnit) -> Result<MutationOutcome, MutationError> {
            if let Some((id, handle)) = &self.abort_on {
                if *id == unit.id {
                    handle.abort();
                }
            }
            if self.fail_on.as_deref() == Some(unit.id.as_str()) {
                return Err(MutationError::NotFound {
                    path: unit.target_path.clone(),
                });
            }
            self.applied.lock().unwrap().push(unit.id.clone());
            Ok(MutationOutcome::default())
        }
    }

    /// Returns queued exit codes, then 0
    struct FakeRunner {
        codes: Mutex<VecDeque<i32>>,
        calls: Arc<AtomicUsize>,
    }

    impl BuildRunner for FakeRunner {
        fn run(&self, _: &[String], _: &Path, _: Option<Duration>) -> Result<CommandOutput, VerificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let code = self.codes.lock().unwrap().pop_front().unwrap_or(0);
            Ok(CommandOutput {
                exit_code: code,
                stdout: String::new(),
                stderr: format!("exit {}", code),
                duration_ms: 1,
            })
        }
    }

    fn gate(codes: &[i32]) -> (Gate, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = FakeRunner {
            codes: Mutex::new(codes.iter().copied().collect()),
            calls: calls.clone(),
        };
        (
            Gate::new(Box::new(runner), vec!["test".into()], "."),
            calls,
        )
    }

    /// Three phases with 2, 5 and 1 units
    fn plan() -> Plan {
        let phase = |tier: u8, prefix: &str, n: usize| Phase {
            label: format!("Tier {}", tier),
            priority_tier: tier,
            units: (1..=n)
                .map(|i| {
                    ChangeUnit::modify(format!("{}{}.py", prefix, i), "r")
                        .with_id(format!("{}{}", prefix, i))
                })
                .collect(),
        };
        Plan::new(vec![phase(1, "a", 2), phase(2, "b", 5), phase(3, "c", 1)])
    }

    fn decide_all(c: &mut Controller, decisions: &[Decision]) {
        for d in decisions {
            c.decide(*d).unwrap();
        }
    }

    #[test]
    fn test_abort_mid_phase_freezes_the_rest() {
        use Decision::*;
        let plan = plan();
        let m = FakeMutator::default();
        let (g, _) = gate(&[]);
        let sink = VecSink::new();
        let mut c = Controller::new(&plan, &m, &g, &sink);
        c.start().unwrap();
        decide_all(&mut c, &[Continue, Apply, Apply, Continue, Apply, Apply, Apply, Abort]);

        let status = |id: &str| c.state().status_of(id).unwrap();
        for id in ["a1", "a2", "b1", "b2", "b3"] {
            assert_eq!(status(id), UnitStatus::Applied);
        }
        for id in ["b4", "b5", "c1"] {
            assert_eq!(status(id), UnitStatus::Aborted);
        }
        let summary = c.summary();
        assert_eq!(summary.outcome, RunOutcome::Aborted);
        assert_eq!(summary.counts.applied, 5);
        assert_eq!(summary.counts.aborted, 3);
        assert!(!summary.blocked_by_verification);

        assert!(matches!(c.decide(Continue), Err(ControllerError::Finished { .. })));
        let events = sink.events();
        let aborted_at = events
            .iter()
            .position(|e| matches!(e, RunEvent::PhaseAborted { .. }))
            .unwrap();
        assert!(!events[aborted_at..]
            .iter()
            .any(|e| matches!(e, RunEvent::UnitApplied { .. })));
        assert!(matches!(events.last(), Some(RunEvent::RunCompleted { .. })));
    }

    #[test]
    fn test_abort_during_batch_lets_in_flight_unit_land() {
        use Decision::*;
        let plan = plan();
        let handle = AbortHandle::new();
        let m = FakeMutator {
            abort_on: Some(("b3".into(), handle.clone())),
            ..Default::default()
        };
        let (g, _) = gate(&[]);
        let sink = VecSink::new();
        let mut c = Controller::new(&plan, &m, &g, &sink).with_abort_handle(handle);
        c.start().unwrap();
        decide_all(&mut c, &[ApplyRemaining, ApplyRemaining]);

        assert!(c.is_finished());
        assert_eq!(*m.applied.lock().unwrap(), vec!["a1", "a2", "b1", "b2", "b3"]);
        let summary = c.summary();
        assert_eq!(summary.counts.applied, 5);
        assert_eq!(summary.counts.aborted, 3);
        assert_eq!(summary.phases[1].counts.aborted, 2);
    }

    #[test]
    fn test_failed_verification_and_retry() {
        use Decision::*;
        let plan = plan();
        let m = FakeMutator::default();
        let (g, calls) = gate(&[1]);
        let sink = VecSink::new();
        let mut c = Controller::new(&plan, &m, &g, &sink);
        c.start().unwrap();
        decide_all(&mut c, &[ApplyRemaining]);

        assert!(matches!(
            c.status(),
            RunStatus::AwaitingVerificationDecision { phase: 0, exit_code: Some(1), .. }
        ));
        assert_eq!(c.allowed_decisions(), &[Retry, SkipPhase, Abort]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let applied_before = m.applied.lock().unwrap().len();

        c.decide(Retry).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(m.applied.lock().unwrap().len(), applied_before);
        assert_eq!(c.status(), &RunStatus::AwaitingPhaseDecision { phase: 1 });
        assert_eq!(c.state().verification.get(&0), Some(&true));
    }

    #[test]
    fn test_mutation_failure_blocks_rest_of_phase() {
        use Decision::*;
        let plan = plan();
        let m = FakeMutator {
            fail_on: Some("b2".into()),
            ..Default::default()
        };
        let (g, _) = gate(&[]);
        let sink = VecSink::new();
        let mut c = Controller::new(&plan, &m, &g, &sink);
        c.start().unwrap();
        decide_all(&mut c, &[SkipPhase, Continue, Apply, Apply]);

        assert_eq!(c.state().status_of("a1"), Some(UnitStatus::Skipped));
        assert_eq!(c.state().status_of("b2"), Some(UnitStatus::Failed));
        for id in ["b3", "b4", "b5"] {
            assert_eq!(c.state().status_of(id), Some(UnitStatus::Blocked));
        }
        assert_eq!(c.state().status_of("c1"), Some(UnitStatus::Pending));
        assert!(matches!(c.status(), RunStatus::AwaitingMutationDecision { .. }));
        assert!(matches!(
            sink.events().last(),
            Some(RunEvent::UnitFailed { blocked, .. }) if blocked.len() == 3
        ));

        // Continue verifies the partially applied phase, then moves on
        c.decide(Continue).unwrap();
        assert_eq!(c.status(), &RunStatus::AwaitingPhaseDecision { phase: 2 });
        c.decide(Abort).unwrap();
        assert_eq!(c.state().status_of("b3"), Some(UnitStatus::Aborted));
        assert_eq!(c.summary().counts.failed, 1);
    }

    #[test]
    fn test_resume_replays_the_same_events() {
        use Decision::*;
        let plan = plan();
        let decisions = [Continue, Apply, Skip, Continue, Apply, ApplyRemaining, Retry, Continue, Apply];
        let initial = ExecutionState::new(&plan);

        let m = FakeMutator::default();
        let (g, _) = gate(&[0, 1]);
        let full = VecSink::new();
        let mut c = Controller::resume(&plan, initial.clone(), &m, &g, &full).unwrap();
        c.start().unwrap();
        decide_all(&mut c, &decisions);
        assert!(c.is_finished());
        let uninterrupted = full.events();

        let m = FakeMutator::default();
        let (g, _) = gate(&[0, 1]);
        let first = VecSink::new();
        let mut c = Controller::resume(&plan, initial, &m, &g, &first).unwrap();
        c.start().unwrap();
        decide_all(&mut c, &decisions[..5]);
        let saved = serde_json::to_string(c.state()).unwrap();
        let before = first.events().len();
        drop(c);

        let second = VecSink::new();
        let state: ExecutionState = serde_json::from_str(&saved).unwrap();
        let mut c = Controller::resume(&plan, state, &m, &g, &second).unwrap();
        c.start().unwrap();
        decide_all(&mut c, &decisions[5..]);

        assert_eq!(second.events(), uninterrupted[before..].to_vec());
    }

    /// `a` ← `b` ← `c` in the first phase, `d` independent; `e` ← `a` in the second
    fn dependent_plan() -> Plan {
        Plan::new(vec![
            Phase {
                label: "Tier 1".into(),
                priority_tier: 1,
                units: vec![
                    ChangeUnit::create("a.py", "", "port").with_id("a"),
                    ChangeUnit::modify("b.py", "r").with_id("b").depends_on("a"),
                    ChangeUnit::modify("c.py", "r").with_id("c").depends_on("b"),
                    ChangeUnit::modify("d.py", "r").with_id("d"),
                ],
            },
            Phase {
                label: "Tier 2".into(),
                priority_tier: 2,
                units: vec![ChangeUnit::modify("e.py", "r").with_id("e").depends_on("a")],
            },
        ])
    }

    #[test]
    fn test_skipped_dependency_blocks_its_dependents() {
        use Decision::*;
        let plan = dependent_plan();
        let m = FakeMutator::default();
        let (g, _) = gate(&[]);
        let sink = VecSink::new();
        let mut c = Controller::new(&plan, &m, &g, &sink);
        c.start().unwrap();
        decide_all(&mut c, &[Continue, Skip]);

        // b and c are never offered
        assert_eq!(
            c.status(),
            &RunStatus::AwaitingUnitDecision { phase: 0, unit: "d".into() }
        );
        assert_eq!(c.state().status_of("b"), Some(UnitStatus::Blocked));
        assert_eq!(c.state().status_of("c"), Some(UnitStatus::Blocked));
        let blocked: Vec<(String, Vec<String>)> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::UnitBlocked { unit, unmet_dependencies, .. } => Some((unit, unmet_dependencies)),
                _ => None,
            })
            .collect();
        assert_eq!(
            blocked,
            vec![
                ("b".to_string(), vec!["a".to_string()]),
                ("c".to_string(), vec!["b".to_string()]),
            ]
        );

        decide_all(&mut c, &[Apply, Continue]);
        assert_eq!(*m.applied.lock().unwrap(), vec!["d"]);
    }

    #[test]
    fn test_batch_never_applies_unit_with_unapplied_dependency() {
        use Decision::*;
        let plan = dependent_plan();
        let m = FakeMutator::default();
        let (g, _) = gate(&[]);
        let sink = VecSink::new();
        let mut c = Controller::new(&plan, &m, &g, &sink);
        c.start().unwrap();
        decide_all(&mut c, &[Continue, Skip, ApplyRemaining, ApplyRemaining]);

        assert_eq!(*m.applied.lock().unwrap(), vec!["d"]);
        assert_eq!(c.state().status_of("a"), Some(UnitStatus::Skipped));
        assert_eq!(c.state().status_of("e"), Some(UnitStatus::Blocked));
        assert!(sink.events().iter().any(|e| matches!(
            e,
            RunEvent::UnitBlocked { phase: 1, unit, unmet_dependencies }
                if unit == "e" && unmet_dependencies == &["a".to_string()]
        )));
        let summary = c.summary();
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.counts.blocked, 3);
    }

    #[test]
    fn test_failed_dependency_blocks_later_phase() {
        use Decision::*;
        let plan = dependent_plan();
        let m = FakeMutator {
            fail_on: Some("a".into()),
            ..Default::default()
        };
        let (g, _) = gate(&[]);
        let sink = VecSink::new();
        let mut c = Controller::new(&plan, &m, &g, &sink);
        c.start().unwrap();
        decide_all(&mut c, &[Continue, Apply, Continue, Continue]);

        assert_eq!(c.state().status_of("a"), Some(UnitStatus::Failed));
        assert_eq!(c.state().status_of("e"), Some(UnitStatus::Blocked));
        assert!(m.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_batch_checkpoints_each_settled_unit() {
        use Decision::*;
        let plan = plan();
        let m = FakeMutator::default();
        let (g, _) = gate(&[]);
        let sink = VecSink::new();
        let snapshots: Mutex<Vec<ExecutionState>> = Mutex::new(Vec::new());
        let hook = |state: &ExecutionState| snapshots.lock().unwrap().push(state.clone());
        let mut c = Controller::new(&plan, &m, &g, &sink).with_checkpoint(&hook);
        c.start().unwrap();
        decide_all(&mut c, &[Continue, ApplyRemaining]);
        drop(c);

        let snapshots = snapshots.into_inner().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].status_of("a1"), Some(UnitStatus::Applied));
        assert_eq!(snapshots[0].status_of("a2"), Some(UnitStatus::Pending));
        assert_eq!(snapshots[0].status, RunStatus::AwaitingPhaseDecision { phase: 0 });

        // Crash after the first unit: resuming applies only the second
        let m = FakeMutator::default();
        let sink = VecSink::new();
        let mut c = Controller::resume(&plan, snapshots[0].clone(), &m, &g, &sink).unwrap();
        c.start().unwrap();
        decide_all(&mut c, &[ApplyRemaining]);
        assert_eq!(*m.applied.lock().unwrap(), vec!["a2"]);
        assert_eq!(c.status(), &RunStatus::AwaitingPhaseDecision { phase: 1 });
    }

    #[test]
    fn test_invalid_decisions_and_empty_plan() {
        let plan = plan();
        let m = FakeMutator::default();
        let (g, _) = gate(&[]);
        let sink = VecSink::new();
        let mut c = Controller::new(&plan, &m, &g, &sink);
        assert!(matches!(
            c.decide(Decision::Continue),
            Err(ControllerError::InvalidDecision { .. })
        ));
        c.start().unwrap();
        assert!(matches!(
            c.decide(Decision::Apply),
            Err(ControllerError::InvalidDecision { .. })
        ));

        let empty = Plan::new(Vec::new());
        let sink = VecSink::new();
        let mut c = Controller::new(&empty, &m, &g, &sink);
        c.start().unwrap();
        assert_eq!(c.status(), &RunStatus::Completed);
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_start_at_phase_skips_earlier_units() {
        let plan = plan();
        let m = FakeMutator::default();
        let (g, _) = gate(&[]);
        let sink = VecSink::new();
        let mut c = Controller::new(&plan, &m, &g, &sink);
        c.start_at_phase(2).unwrap();
        assert_eq!(c.status(), &RunStatus::AwaitingPhaseDecision { phase: 2 });
        assert_eq!(c.summary().counts.skipped, 7);
        assert!(matches!(
            c.start_at_phase(9),
            Err(ControllerError::PhaseOutOfRange { .. })
        ));
    }
}
