//! Interactive decision source reading answers from a terminal

use crate::execution::{Decision, DecisionSource, RunStatus};
use crate::planning::Plan;
use console::style;
use std::io::{BufRead, Write};

/// Single-key shortcut for each decision
fn shortcut(decision: Decision) -> &'static str {
    match decision {
        Decision::Continue => "c",
        Decision::Apply => "a",
        Decision::Skip => "s",
        Decision::ApplyRemaining => "A",
        Decision::SkipPhase => "p",
        Decision::Abort => "q",
        Decision::Retry => "r",
    }
}

/// Map an answer to one of the allowed decisions. Shortcuts are case
/// sensitive (`a` applies one unit, `A` applies the rest of the phase).
fn interpret(answer: &str, allowed: &[Decision]) -> Option<Decision> {
    let answer = answer.trim();
    if answer.is_empty() {
        return None;
    }
    allowed
        .iter()
        .copied()
        .find(|d| shortcut(*d) == answer)
        .or_else(|| Decision::parse(answer).filter(|d| allowed.contains(d)))
}

/// Prompts on `output` and reads one line per decision from `input`.
/// End of input leaves the run suspended.
pub struct PromptDecisions<R, W> {
    input: R,
    output: W,
}

impl PromptDecisions<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> PromptDecisions<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn context(&mut self, plan: &Plan, status: &RunStatus) -> std::io::Result<()> {
        match status {
            RunStatus::AwaitingPhaseDecision { phase } => {
                if let Some(p) = plan.phases.get(*phase) {
                    writeln!(
                        self.output,
                        "  {} units in this phase",
                        style(p.units.len()).cyan()
                    )?;
                }
            }
            RunStatus::AwaitingMutationDecision { unit, error, .. } => {
                writeln!(
                    self.output,
                    "  {} {} could not be applied: {}",
                    style("✗").red(),
                    unit,
                    error
                )?;
            }
            RunStatus::AwaitingVerificationDecision {
                exit_code, detail, ..
            } => {
                let code = exit_code
                    .map(|c| format!("exit code {}", c))
                    .unwrap_or_else(|| "no exit code".to_string());
                writeln!(self.output, "  {} Verification failed ({})", style("✗").red(), code)?;
                for line in detail.lines() {
                    writeln!(self.output, "    {}", style(line).dim())?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn ask(&mut self, allowed: &[Decision]) -> std::io::Result<Option<String>> {
        let choices: Vec<String> = allowed
            .iter()
            .map(|d| format!("[{}] {}", shortcut(*d), d))
            .collect();
        write!(self.output, "  {} ", style(choices.join("  ")).bold())?;
        write!(self.output, "> ")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            writeln!(self.output)?;
            return Ok(None);
        }
        Ok(Some(line))
    }
}

impl<R: BufRead, W: Write> DecisionSource for PromptDecisions<R, W> {
    fn next_decision(
        &mut self,
        plan: &Plan,
        status: &RunStatus,
        allowed: &[Decision],
    ) -> Option<Decision> {
        if allowed.is_empty() {
            return None;
        }
        if let Err(e) = self.context(plan, status) {
            tracing::warn!("Failed to write prompt: {}", e);
        }
        loop {
            let line = match self.ask(allowed) {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!("Failed to read decision: {}", e);
                    return None;
                }
            };
            match interpret(&line, allowed) {
                Some(decision) => return Some(decision),
                None => {
                    let _ = writeln!(self.output, "  {}", style("Not a valid choice here").yellow());
                }
            }
        }
    }
}
