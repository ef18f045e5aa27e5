//! Execution against a real working tree: file mutation, persisted state
//! and resuming a run in a new controller

use archplan::cache::RunStore;
use archplan::execution::{
    AbortHandle, Controller, Decision, EventSink, ExecutionState, FileMutator, FsMutator,
    JsonlSink, MutationError, MutationOutcome, RunEvent, RunOutcome, RunStatus,
    ScriptedDecisions, UnitStatus, VecSink,
};
use archplan::planning::{ChangeUnit, Phase, Plan};
use archplan::verification::{BuildRunner, CommandOutput, Gate, VerificationError};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn two_phase_plan() -> Plan {
    Plan::new(vec![
        Phase {
            label: "Tier 1: critical".into(),
            priority_tier: 1,
            units: vec![
                ChangeUnit::create("app/core/db_port.py", "class DbPort:\n    pass\n", "port"),
                ChangeUnit::modify("app/core/service.py", "use the port")
                    .with_edit("app.infra.db", "app.core.db_port")
                    .depends_on("create:app/core/db_port.py"),
            ],
        },
        Phase {
            label: "Tier 4: info".into(),
            priority_tier: 4,
            units: vec![ChangeUnit::create(
                "app/core/test_service.py",
                "def test_service():\n    pass\n",
                "add test",
            )],
        },
    ])
}

fn repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("app/core")).unwrap();
    std::fs::write(
        dir.path().join("app/core/service.py"),
        "from app.infra.db import connect\n",
    )
    .unwrap();
    dir
}

/// Fails the first `failures` invocations, then passes
struct FlakyRunner {
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl BuildRunner for FlakyRunner {
    fn run(
        &self,
        _: &[String],
        _: &Path,
        _: Option<Duration>,
    ) -> Result<CommandOutput, VerificationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let exit_code = if call < self.failures { 1 } else { 0 };
        Ok(CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 { String::new() } else { "test_service FAILED".into() },
            duration_ms: 1,
        })
    }
}

/// Stops the process after its first unit lands, like a kill mid-batch
struct DiesAfterFirst {
    inner: FsMutator,
    handle: AbortHandle,
}

impl FileMutator for DiesAfterFirst {
    fn apply(&self, unit: &ChangeUnit) -> Result<MutationOutcome, MutationError> {
        let outcome = self.inner.apply(unit);
        self.handle.abort();
        outcome
    }
}

#[test]
fn test_create_never_overwrites() {
    let dir = repo();
    let mutator = FsMutator::new(dir.path());
    let unit = ChangeUnit::create("app/core/service.py", "replaced\n", "clobber");
    let err = mutator.apply(&unit).unwrap_err();
    assert!(matches!(err, MutationError::AlreadyExists { .. }));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("app/core/service.py")).unwrap(),
        "from app.infra.db import connect\n"
    );
}

#[test]
fn test_mutator_rejects_paths_outside_root() {
    let dir = repo();
    let mutator = FsMutator::new(dir.path());
    let unit = ChangeUnit::create("../escaped.py", "", "escape");
    assert!(matches!(
        mutator.apply(&unit).unwrap_err(),
        MutationError::OutsideRoot { .. }
    ));
}

#[test]
fn test_run_resumes_from_persisted_state() {
    let dir = repo();
    let cache = tempfile::tempdir().unwrap();
    let store = RunStore::at(cache.path());
    let plan = two_phase_plan();
    store.save_plan(&plan).unwrap();

    let mutator = FsMutator::new(dir.path());
    let gate = Gate::disabled();

    // First process: apply phase 1, then stop at phase 2's decision
    let first_sink = VecSink::new();
    let run_id = {
        let mut controller = Controller::new(&plan, &mutator, &gate, &first_sink);
        let mut script = ScriptedDecisions::new([Decision::ApplyRemaining]);
        controller
            .drive(&mut script, |state| store.save_state(state))
            .unwrap();
        assert_eq!(controller.status(), &RunStatus::AwaitingPhaseDecision { phase: 1 });
        controller.state().run_id.clone()
    };
    assert!(dir.path().join("app/core/db_port.py").exists());
    assert!(std::fs::read_to_string(dir.path().join("app/core/service.py"))
        .unwrap()
        .contains("app.core.db_port"));

    // Second process: load everything back from disk
    let plan = store.load_plan().unwrap().unwrap();
    let state = store.load_state().unwrap().unwrap();
    assert_eq!(state.run_id, run_id);
    assert_eq!(state.status_of("create:app/core/db_port.py"), Some(UnitStatus::Applied));

    let second_sink = VecSink::new();
    let mut controller = Controller::resume(&plan, state, &mutator, &gate, &second_sink).unwrap();
    let mut script = ScriptedDecisions::new([Decision::Continue, Decision::Apply]);
    controller
        .drive(&mut script, |state| store.save_state(state))
        .unwrap();

    let summary = controller.summary();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.counts.applied, 3);
    assert!(dir.path().join("app/core/test_service.py").exists());

    // Resuming does not replay the first phase
    let events = second_sink.events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, RunEvent::PhaseStarted { phase: 0, .. })));
    assert!(store.load_state().unwrap().unwrap().status.is_finished());
}

#[test]
fn test_failed_gate_retry_then_pass() {
    let dir = repo();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Gate::new(
        Box::new(FlakyRunner {
            failures: 1,
            calls: calls.clone(),
        }),
        vec!["pytest".into()],
        dir.path(),
    );
    let mutator = FsMutator::new(dir.path());
    let plan = two_phase_plan();
    let sink = VecSink::new();
    let mut controller = Controller::new(&plan, &mutator, &gate, &sink);

    let mut script = ScriptedDecisions::new([
        Decision::ApplyRemaining,
        Decision::Retry,
        Decision::SkipPhase,
    ]);
    controller.drive(&mut script, |_| Ok(())).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let summary = controller.summary();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert!(!summary.blocked_by_verification);
    assert_eq!(summary.phases[0].verified, Some(true));
    assert!(!dir.path().join("app/core/test_service.py").exists());
}

#[test]
fn test_event_log_is_scoped_to_run() {
    let dir = repo();
    let cache = tempfile::tempdir().unwrap();
    let store = RunStore::at(cache.path());
    let plan = two_phase_plan();
    let mutator = FsMutator::new(dir.path());
    let gate = Gate::disabled();

    // An earlier run over the same log
    let earlier = ExecutionState::new(&plan);
    JsonlSink::open(&store.events_path(), &earlier.run_id)
        .unwrap()
        .emit(&RunEvent::PhaseStarted {
            phase: 0,
            label: "old".into(),
            units: 0,
        });

    let state = ExecutionState::new(&plan);
    let run_id = state.run_id.clone();
    let log = JsonlSink::open(&store.events_path(), &run_id).unwrap();
    let mut controller = Controller::resume(&plan, state, &mutator, &gate, &log).unwrap();
    let mut script = ScriptedDecisions::new([Decision::SkipPhase, Decision::Abort]);
    controller.drive(&mut script, |_| Ok(())).unwrap();
    assert_eq!(controller.summary().outcome, RunOutcome::Aborted);

    let events = JsonlSink::read(&store.events_path(), &run_id).unwrap();
    assert!(matches!(events.first(), Some(RunEvent::PhaseStarted { phase: 0, label, .. }) if label != "old"));
    assert!(matches!(events.last(), Some(RunEvent::RunCompleted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::PhaseAborted { phase: 1, aborted: 1 })));
}

#[test]
fn test_interrupted_batch_resumes_without_replaying_units() {
    let dir = repo();
    let cache = tempfile::tempdir().unwrap();
    let store = RunStore::at(cache.path());
    let plan = two_phase_plan();
    let gate = Gate::disabled();

    let handle = AbortHandle::new();
    let dying = DiesAfterFirst {
        inner: FsMutator::new(dir.path()),
        handle: handle.clone(),
    };
    let save = |state: &ExecutionState| store.save_state(state).unwrap();
    {
        let sink = VecSink::new();
        let mut controller = Controller::new(&plan, &dying, &gate, &sink)
            .with_abort_handle(handle)
            .with_checkpoint(&save);
        controller.start().unwrap();
        store.save_state(controller.state()).unwrap();
        // Nothing after the batch reaches disk
        controller.decide(Decision::ApplyRemaining).unwrap();
    }
    assert!(dir.path().join("app/core/db_port.py").exists());

    let state = store.load_state().unwrap().unwrap();
    assert_eq!(state.status, RunStatus::AwaitingPhaseDecision { phase: 0 });
    assert_eq!(state.status_of("create:app/core/db_port.py"), Some(UnitStatus::Applied));

    let mutator = FsMutator::new(dir.path());
    let sink = VecSink::new();
    let mut controller = Controller::resume(&plan, state, &mutator, &gate, &sink).unwrap();
    let mut script = ScriptedDecisions::new([Decision::ApplyRemaining, Decision::ApplyRemaining]);
    controller
        .drive(&mut script, |state| store.save_state(state))
        .unwrap();

    assert!(!sink
        .events()
        .iter()
        .any(|e| matches!(e, RunEvent::UnitFailed { .. })));
    let summary = controller.summary();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.counts.applied, 3);
}
