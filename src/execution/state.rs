//! Serializable execution state and the run summary fold

use super::ControllerError;
use crate::planning::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-unit status. Transitions only move forward:
/// `Pending → {Applied, Skipped, Blocked, Aborted, Failed}`, `Blocked → Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Applied,
    Skipped,
    Blocked,
    Aborted,
    Failed,
}

impl UnitStatus {
    pub fn can_become(self, next: UnitStatus) -> bool {
        matches!(
            (self, next),
            (UnitStatus::Pending, UnitStatus::Applied)
                | (UnitStatus::Pending, UnitStatus::Skipped)
                | (UnitStatus::Pending, UnitStatus::Blocked)
                | (UnitStatus::Pending, UnitStatus::Aborted)
                | (UnitStatus::Pending, UnitStatus::Failed)
                | (UnitStatus::Blocked, UnitStatus::Aborted)
        )
    }

    /// No further decision is needed for this unit
    pub fn is_settled(self) -> bool {
        self != UnitStatus::Pending
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Applied => "applied",
            UnitStatus::Skipped => "skipped",
            UnitStatus::Blocked => "blocked",
            UnitStatus::Aborted => "aborted",
            UnitStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where the controller is suspended, or how the run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    AwaitingPhaseDecision {
        phase: usize,
    },
    AwaitingUnitDecision {
        phase: usize,
        unit: String,
    },
    AwaitingMutationDecision {
        phase: usize,
        unit: String,
        error: String,
    },
    AwaitingVerificationDecision {
        phase: usize,
        exit_code: Option<i32>,
        detail: String,
    },
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Aborted)
    }
}

/// Resumable state of one plan execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub run_id: String,
    pub plan_id: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_phase_index: usize,
    pub unit_status: BTreeMap<String, UnitStatus>,
    /// Last verification result per phase index
    #[serde(default)]
    pub verification: BTreeMap<usize, bool>,
    pub status: RunStatus,
}

impl ExecutionState {
    pub fn new(plan: &Plan) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            started_at: now,
            updated_at: now,
            current_phase_index: 0,
            unit_status: plan
                .units()
                .map(|u| (u.id.clone(), UnitStatus::Pending))
                .collect(),
            verification: BTreeMap::new(),
            status: RunStatus::Idle,
        }
    }

    pub fn status_of(&self, unit: &str) -> Option<UnitStatus> {
        self.unit_status.get(unit).copied()
    }

    /// Move a unit forward; reverts and unknown units are rejected
    pub fn transition(&mut self, unit: &str, next: UnitStatus) -> Result<(), ControllerError> {
        let current = self
            .unit_status
            .get_mut(unit)
            .ok_or_else(|| ControllerError::UnknownUnit {
                unit: unit.to_string(),
            })?;
        if !current.can_become(next) {
            return Err(ControllerError::IllegalTransition {
                unit: unit.to_string(),
                from: *current,
                to: next,
            });
        }
        *current = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// The state must describe exactly the units of `plan`
    pub fn check_matches(&self, plan: &Plan) -> Result<(), ControllerError> {
        if self.plan_id != plan.id {
            return Err(ControllerError::PlanMismatch {
                expected: plan.id.clone(),
                found: self.plan_id.clone(),
            });
        }
        for unit in plan.units() {
            if !self.unit_status.contains_key(&unit.id) {
                return Err(ControllerError::UnknownUnit {
                    unit: unit.id.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Per-status unit counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub applied: usize,
    pub skipped: usize,
    pub blocked: usize,
    pub aborted: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn add(&mut self, status: UnitStatus) {
        match status {
            UnitStatus::Pending => self.pending += 1,
            UnitStatus::Applied => self.applied += 1,
            UnitStatus::Skipped => self.skipped += 1,
            UnitStatus::Blocked => self.blocked += 1,
            UnitStatus::Aborted => self.aborted += 1,
            UnitStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.applied + self.skipped + self.blocked + self.aborted + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    InProgress,
    Completed,
    Aborted,
}

/// Per-phase slice of a [`RunSummary`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub label: String,
    pub priority_tier: u8,
    pub counts: StatusCounts,
    pub verified: Option<bool>,
}

/// Summary of a run, folded from `(Plan, ExecutionState)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub plan_id: String,
    pub run_id: String,
    pub outcome: RunOutcome,
    pub counts: StatusCounts,
    pub phases: Vec<PhaseSummary>,
    /// A failed verification was never resolved by a passing retry
    pub blocked_by_verification: bool,
}

impl RunSummary {
    pub fn fold(plan: &Plan, state: &ExecutionState) -> Self {
        let mut counts = StatusCounts::default();
        let phases = plan
            .phases
            .iter()
            .enumerate()
            .map(|(i, phase)| {
                let mut phase_counts = StatusCounts::default();
                for unit in &phase.units {
                    let status = state.status_of(&unit.id).unwrap_or(UnitStatus::Pending);
                    phase_counts.add(status);
                    counts.add(status);
                }
                PhaseSummary {
                    label: phase.label.clone(),
                    priority_tier: phase.priority_tier,
                    counts: phase_counts,
                    verified: state.verification.get(&i).copied(),
                }
            })
            .collect();

        let outcome = match state.status {
            RunStatus::Completed => RunOutcome::Completed,
            RunStatus::Aborted => RunOutcome::Aborted,
            _ => RunOutcome::InProgress,
        };
        let blocked_by_verification = match outcome {
            // An abort only counts as blocked when it happened at the failed gate
            RunOutcome::Aborted => {
                state.verification.get(&state.current_phase_index) == Some(&false)
            }
            _ => state.verification.values().any(|passed| !passed),
        };

        Self {
            plan_id: plan.id.clone(),
            run_id: state.run_id.clone(),
            outcome,
            counts,
            phases,
            blocked_by_verification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::{ChangeUnit, Phase};

    fn plan() -> Plan {
        Plan::new(vec![Phase {
            label: "p".into(),
            priority_tier: 1,
            units: vec![ChangeUnit::modify("a.py", "r"), ChangeUnit::modify("b.py", "r")],
        }])
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let mut state = ExecutionState::new(&plan());
        state.transition("modify:a.py", UnitStatus::Blocked).unwrap();
        state.transition("modify:a.py", UnitStatus::Aborted).unwrap();
        let err = state
            .transition("modify:a.py", UnitStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, ControllerError::IllegalTransition { .. }));
        assert!(state.transition("modify:b.py", UnitStatus::Applied).is_ok());
        assert!(state.transition("modify:b.py", UnitStatus::Skipped).is_err());
        assert!(matches!(
            state.transition("nope", UnitStatus::Applied),
            Err(ControllerError::UnknownUnit { .. })
        ));
    }

    #[test]
    fn test_summary_fold() {
        let plan = plan();
        let mut state = ExecutionState::new(&plan);
        state.transition("modify:a.py", UnitStatus::Applied).unwrap();
        state.verification.insert(0, false);
        state.status = RunStatus::Aborted;

        let summary = RunSummary::fold(&plan, &state);
        assert_eq!(summary.outcome, RunOutcome::Aborted);
        assert_eq!(summary.counts.applied, 1);
        assert_eq!(summary.counts.pending, 1);
        assert_eq!(summary.counts.total(), 2);
        assert!(summary.blocked_by_verification);
        assert_eq!(summary.phases[0].verified, Some(false));
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let plan = plan();
        let mut state = ExecutionState::new(&plan);
        state.status = RunStatus::AwaitingUnitDecision {
            phase: 0,
            unit: "modify:b.py".into(),
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: ExecutionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert!(back.check_matches(&plan).is_ok());
    }
}
