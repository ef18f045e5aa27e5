//! Markdown reporter for GitHub-flavored Markdown output
//!
//! Suited to pull request descriptions and design review documents.

use crate::execution::{RunOutcome, RunSummary};
use crate::models::{Severity, Violation};
use crate::pipeline::AnalysisReport;
use crate::planning::Plan;
use anyhow::Result;
use chrono::Local;

/// Maximum violations listed per severity level
const MAX_VIOLATIONS_PER_SEVERITY: usize = 10;

pub fn render_analysis(report: &AnalysisReport) -> Result<String> {
    let mut md = String::new();

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    md.push_str(&format!(
        "# Architecture Report\n\n**Grade: {}** | **Health: {:.1}/10**\n\nGenerated: {}\n\n",
        report.health.grade, report.health.value, timestamp
    ));

    md.push_str(&render_summary_table(report));
    md.push('\n');
    md.push_str(&render_violations(&report.violations));
    md.push('\n');

    let dirs: Vec<_> = report
        .directories
        .iter()
        .filter(|d| d.breakdown.total > 0)
        .collect();
    if !dirs.is_empty() {
        md.push_str("## Directory Health\n\n| Directory | Grade | Health | Violations |\n|-----------|-------|--------|------------|\n");
        for d in dirs {
            md.push_str(&format!(
                "| `{}` | {} | {:.1} | {} |\n",
                d.scope, d.grade, d.value, d.breakdown.total
            ));
        }
        md.push('\n');
    }

    if !report.unparseable.is_empty() {
        md.push_str("## Unparseable Files\n\n");
        for u in &report.unparseable {
            md.push_str(&format!("- `{}`: {}\n", u.path.display(), escape_cell(&u.reason)));
        }
        md.push('\n');
    }

    md.push_str("---\n\n*Generated by archplan*\n");
    Ok(md)
}

fn render_summary_table(report: &AnalysisReport) -> String {
    let s = &report.summary;
    format!(
        r#"## Summary

| Metric | Value |
|--------|-------|
| Files | {} |
| Internal imports | {} |
| Files evaluated | {} |
| Rules run | {} |
| Critical | {} |
| Major | {} |
| Minor | {} |
| Info | {} |
| **Total** | **{}** |
"#,
        report.files,
        report.edges,
        report.files_evaluated,
        report.rules_run,
        s.critical,
        s.major,
        s.minor,
        s.info,
        s.total
    )
}

fn render_violations(violations: &[Violation]) -> String {
    let mut md = String::from("## Violations\n\n");
    if violations.is_empty() {
        md.push_str("No violations found.\n");
        return md;
    }

    for severity in Severity::ALL {
        let group: Vec<&Violation> = violations.iter().filter(|v| v.severity == severity).collect();
        if group.is_empty() {
            continue;
        }
        md.push_str(&format!("### {} ({})\n\n", capitalize(&severity.to_string()), group.len()));
        md.push_str("| Rule | Location | Message |\n|------|----------|---------|\n");
        for v in group.iter().take(MAX_VIOLATIONS_PER_SEVERITY) {
            md.push_str(&format!(
                "| `{}` | `{}` | {} |\n",
                v.rule_id,
                v.location,
                escape_cell(&v.message)
            ));
        }
        if group.len() > MAX_VIOLATIONS_PER_SEVERITY {
            md.push_str(&format!(
                "\n*... and {} more*\n",
                group.len() - MAX_VIOLATIONS_PER_SEVERITY
            ));
        }
        md.push('\n');
    }
    md
}

pub fn render_plan(plan: &Plan) -> Result<String> {
    let mut md = format!("# Refactoring Plan `{}`\n\n", plan.id);
    if plan.is_empty() {
        md.push_str("Nothing to do.\n");
        return Ok(md);
    }
    md.push_str(&format!(
        "{} phases, {} change units.\n\n",
        plan.phases.len(),
        plan.total_units()
    ));

    for (i, phase) in plan.phases.iter().enumerate() {
        md.push_str(&format!("## Phase {}: {}\n\n", i + 1, phase.label));
        md.push_str("| # | Change | Severity | Depends on | Rationale |\n|---|--------|----------|------------|-----------|\n");
        for (n, unit) in phase.units.iter().enumerate() {
            let deps: Vec<String> = unit.depends_on.iter().map(|d| format!("`{}`", d)).collect();
            md.push_str(&format!(
                "| {} | `{}` | {} | {} | {} |\n",
                n + 1,
                unit.describe(),
                unit.severity,
                deps.join(", "),
                escape_cell(&unit.rationale)
            ));
        }
        md.push('\n');
    }
    Ok(md)
}

pub fn render_summary(summary: &RunSummary) -> Result<String> {
    let outcome = match summary.outcome {
        RunOutcome::Completed => "completed",
        RunOutcome::Aborted => "aborted",
        RunOutcome::InProgress => "in progress",
    };
    let mut md = format!(
        "# Run `{}`\n\nPlan `{}`: **{}**",
        summary.run_id, summary.plan_id, outcome
    );
    if summary.blocked_by_verification {
        md.push_str(" (blocked by verification)");
    }
    md.push_str("\n\n| Phase | Applied | Skipped | Failed | Blocked | Aborted | Pending | Verified |\n|-------|---------|---------|--------|---------|---------|---------|----------|\n");
    for (i, phase) in summary.phases.iter().enumerate() {
        let c = &phase.counts;
        let verified = match phase.verified {
            Some(true) => "yes",
            Some(false) => "**failed**",
            None => "-",
        };
        md.push_str(&format!(
            "| {}. {} | {} | {} | {} | {} | {} | {} | {} |\n",
            i + 1,
            phase.label,
            c.applied,
            c.skipped,
            c.failed,
            c.blocked,
            c.aborted,
            c.pending,
            verified
        ));
    }
    Ok(md)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporters::tests::{test_plan, test_report, test_summary};

    #[test]
    fn test_analysis_sections() {
        let md = render_analysis(&test_report()).unwrap();
        assert!(md.starts_with("# Architecture Report"));
        assert!(md.contains("## Summary"));
        assert!(md.contains("### Critical (1)"));
        assert!(md.contains("### Minor (1)"));
        assert!(md.contains("## Directory Health"));
    }

    #[test]
    fn test_plan_tables() {
        let md = render_plan(&test_plan()).unwrap();
        assert!(md.contains("## Phase 1: Tier 1: critical fixes"));
        assert!(md.contains("`create app/core/db_port.py`"));
    }

    #[test]
    fn test_summary_marks_failed_gate() {
        let md = render_summary(&test_summary()).unwrap();
        assert!(md.contains("**aborted**"));
        assert!(md.contains("(blocked by verification)"));
        assert!(md.contains("**failed**"));
    }

    #[test]
    fn test_escape_cell() {
        assert_eq!(escape_cell("a|b\nc"), "a\\|b c");
    }
}
