//! Text (terminal) reporter with colors and formatting

use crate::execution::{RunEvent, RunOutcome, RunSummary, StatusCounts};
use crate::models::Severity;
use crate::pipeline::AnalysisReport;
use crate::planning::{ChangeKind, Plan};
use crate::scoring::HealthScore;
use anyhow::Result;

/// Maximum violations listed before the "and N more" line
const MAX_VIOLATIONS: usize = 25;

/// Grade colors (ANSI escape codes)
fn grade_color(grade: &str) -> &'static str {
    match grade {
        "A" => "\x1b[32m", // Green
        "B" => "\x1b[92m", // Light green
        "C" => "\x1b[33m", // Yellow
        "D" => "\x1b[91m", // Light red
        "F" => "\x1b[31m", // Red
        _ => "\x1b[0m",
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "\x1b[31m",
        Severity::Major => "\x1b[91m",
        Severity::Minor => "\x1b[33m",
        Severity::Info => "\x1b[90m",
    }
}

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "[C]",
        Severity::Major => "[M]",
        Severity::Minor => "[m]",
        Severity::Info => "[i]",
    }
}

fn kind_symbol(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Create => "+",
        ChangeKind::Modify => "~",
        ChangeKind::Rename => ">",
        ChangeKind::Delete => "-",
    }
}

fn rule() -> String {
    format!("{DIM}──────────────────────────────────────{RESET}\n")
}

fn score_line(score: &HealthScore) -> String {
    let color = grade_color(score.grade);
    format!(
        "{color}{BOLD}{}{RESET} {:>4.1}  {}",
        score.grade, score.value, score.scope
    )
}

pub fn render_analysis(report: &AnalysisReport) -> Result<String> {
    let mut out = String::new();

    let grade_c = grade_color(report.health.grade);
    out.push_str(&format!("\n{BOLD}Architecture Analysis{RESET}\n"));
    out.push_str(&rule());
    out.push_str(&format!(
        "Health: {BOLD}{:.1}/10{RESET}  Grade: {grade_c}{BOLD}{}{RESET}  ",
        report.health.value, report.health.grade
    ));
    out.push_str(&format!(
        "Files: {}  Imports: {}  External: {}\n",
        report.files, report.edges, report.external_imports
    ));
    let layers: Vec<String> = report
        .layers
        .iter()
        .map(|(layer, n)| format!("{} {}", layer, n))
        .collect();
    if !layers.is_empty() {
        out.push_str(&format!("{DIM}Layers: {}{RESET}\n", layers.join(", ")));
    }
    if let Some(sampling) = &report.sampling {
        out.push_str(&format!(
            "{YELLOW}Sampled: {} of {} files evaluated{RESET}\n",
            sampling.evaluated, sampling.candidates
        ));
    }
    out.push('\n');

    let s = &report.summary;
    out.push_str(&format!("{BOLD}VIOLATIONS{RESET} ({} total)\n", s.total));
    if s.total == 0 {
        out.push_str(&format!("  {GREEN}No violations found{RESET}\n"));
    } else {
        let parts: Vec<String> = [
            (Severity::Critical, s.critical),
            (Severity::Major, s.major),
            (Severity::Minor, s.minor),
            (Severity::Info, s.info),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(sev, n)| format!("{}{} {}{RESET}", severity_color(sev), n, sev))
        .collect();
        out.push_str(&format!("  {}\n\n", parts.join("  ")));

        for v in report.violations.iter().take(MAX_VIOLATIONS) {
            let color = severity_color(v.severity);
            out.push_str(&format!(
                "  {color}{}{RESET} {}  {DIM}{}{RESET}\n",
                severity_tag(v.severity),
                v.message,
                v.location
            ));
            out.push_str(&format!("      {DIM}{}{RESET}\n", v.rule_id));
        }
        if report.violations.len() > MAX_VIOLATIONS {
            out.push_str(&format!(
                "  {DIM}... and {} more{RESET}\n",
                report.violations.len() - MAX_VIOLATIONS
            ));
        }
    }

    let dirs: Vec<&HealthScore> = report
        .directories
        .iter()
        .filter(|d| d.breakdown.total > 0)
        .collect();
    if !dirs.is_empty() {
        out.push_str(&format!("\n{BOLD}DIRECTORIES{RESET}\n"));
        for d in dirs {
            out.push_str(&format!("  {}\n", score_line(d)));
        }
    }
    if !report.worst_files.is_empty() {
        out.push_str(&format!("\n{BOLD}WORST FILES{RESET}\n"));
        for f in &report.worst_files {
            out.push_str(&format!("  {}\n", score_line(f)));
        }
    }

    if !report.unparseable.is_empty() {
        out.push_str(&format!(
            "\n{BOLD}UNPARSEABLE{RESET} ({} files, not evaluated)\n",
            report.unparseable.len()
        ));
        for u in &report.unparseable {
            out.push_str(&format!("  {} {DIM}{}{RESET}\n", u.path.display(), u.reason));
        }
    }
    if report.rule_failures > 0 {
        out.push_str(&format!(
            "\n{YELLOW}{} rule evaluations failed; see internal violations{RESET}\n",
            report.rule_failures
        ));
    }

    out.push_str(&format!(
        "\n{DIM}{} rules on {} files in {}ms{RESET}\n",
        report.rules_run, report.files_evaluated, report.duration_ms
    ));
    Ok(out)
}

pub fn render_plan(plan: &Plan) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("\n{BOLD}Refactoring Plan{RESET} {DIM}{}{RESET}\n", plan.id));
    out.push_str(&rule());
    if plan.is_empty() {
        out.push_str(&format!("{GREEN}Nothing to do{RESET}\n"));
        return Ok(out);
    }
    out.push_str(&format!(
        "{} phases, {} change units\n",
        plan.phases.len(),
        plan.total_units()
    ));

    for (i, phase) in plan.phases.iter().enumerate() {
        out.push_str(&format!(
            "\n{BOLD}Phase {}{RESET}  {}\n",
            i + 1,
            phase.label
        ));
        for unit in &phase.units {
            out.push_str(&format!(
                "  {}{}{RESET} {}\n",
                severity_color(unit.severity),
                kind_symbol(unit.kind),
                unit.describe()
            ));
            out.push_str(&format!("      {DIM}{}{RESET}\n", unit.rationale));
            if !unit.depends_on.is_empty() {
                let deps: Vec<&str> = unit.depends_on.iter().map(String::as_str).collect();
                out.push_str(&format!("      {DIM}after: {}{RESET}\n", deps.join(", ")));
            }
        }
    }
    Ok(out)
}

fn counts_line(counts: &StatusCounts) -> String {
    let mut parts = vec![format!("{} applied", counts.applied)];
    for (n, label) in [
        (counts.skipped, "skipped"),
        (counts.failed, "failed"),
        (counts.blocked, "blocked"),
        (counts.aborted, "aborted"),
        (counts.pending, "pending"),
    ] {
        if n > 0 {
            parts.push(format!("{} {}", n, label));
        }
    }
    parts.join(", ")
}

pub fn render_summary(summary: &RunSummary) -> Result<String> {
    let mut out = String::new();
    let (color, word) = match summary.outcome {
        RunOutcome::Completed if summary.blocked_by_verification => (YELLOW, "completed with failed verification"),
        RunOutcome::Completed => (GREEN, "completed"),
        RunOutcome::Aborted if summary.blocked_by_verification => (RED, "blocked by verification"),
        RunOutcome::Aborted => (RED, "aborted"),
        RunOutcome::InProgress => (YELLOW, "in progress"),
    };
    out.push_str(&format!("\n{BOLD}Run{RESET} {DIM}{}{RESET}  {color}{BOLD}{word}{RESET}\n", summary.run_id));
    out.push_str(&rule());
    out.push_str(&format!("{}\n", counts_line(&summary.counts)));
    for (i, phase) in summary.phases.iter().enumerate() {
        let verified = match phase.verified {
            Some(true) => format!("{GREEN}verified{RESET}"),
            Some(false) => format!("{RED}verification failed{RESET}"),
            None => format!("{DIM}not verified{RESET}"),
        };
        out.push_str(&format!(
            "  Phase {}  {}  {}  {}\n",
            i + 1,
            phase.label,
            counts_line(&phase.counts),
            verified
        ));
    }
    Ok(out)
}

/// One progress line per event. Phase numbers are shown 1-based.
pub fn render_event(event: &RunEvent) -> String {
    match event {
        RunEvent::PhaseStarted { phase, label, units } => {
            format!("\n{BOLD}Phase {}{RESET}  {} ({} units)", phase + 1, label, units)
        }
        RunEvent::UnitDecisionRequested {
            unit,
            description,
            rationale,
            ..
        } => format!("  ? {}  {DIM}{}{RESET}\n      {}", description, unit, rationale),
        RunEvent::UnitBlocked {
            unit,
            unmet_dependencies,
            ..
        } => format!(
            "  {YELLOW}! {} blocked{RESET}  {DIM}needs {}{RESET}",
            unit,
            unmet_dependencies.join(", ")
        ),
        RunEvent::UnitApplied { unit, note, .. } => match note {
            Some(note) => format!("  {GREEN}✓{RESET} {}  {YELLOW}{}{RESET}", unit, note),
            None => format!("  {GREEN}✓{RESET} {}", unit),
        },
        RunEvent::UnitSkipped { unit, .. } => format!("  {DIM}- {} skipped{RESET}", unit),
        RunEvent::UnitFailed {
            unit,
            error,
            blocked,
            ..
        } => {
            let mut line = format!("  {RED}✗ {}{RESET}  {}", unit, error);
            if !blocked.is_empty() {
                line.push_str(&format!("\n      {DIM}blocked: {}{RESET}", blocked.join(", ")));
            }
            line
        }
        RunEvent::PhaseVerified {
            phase,
            passed,
            exit_code,
            duration_ms,
            detail,
        } => {
            let status = if *passed {
                format!("{GREEN}passed{RESET}")
            } else {
                format!("{RED}failed{RESET}")
            };
            let mut line = format!("  Verification of phase {}: {} {DIM}({}ms", phase + 1, status, duration_ms);
            if let Some(code) = exit_code {
                line.push_str(&format!(", exit {}", code));
            }
            line.push_str(&format!("){RESET}"));
            if let Some(detail) = detail {
                line.push_str(&format!("\n      {DIM}{}{RESET}", detail));
            }
            line
        }
        RunEvent::PhaseAborted { phase, aborted } => {
            format!("  {RED}Phase {} aborted{RESET} ({} units not applied)", phase + 1, aborted)
        }
        RunEvent::RunCompleted { summary } => {
            format!("\n{BOLD}Run finished{RESET}: {}", counts_line(&summary.counts))
        }
    }
}
