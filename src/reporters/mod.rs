//! Output reporters for archplan
//!
//! Supports multiple output formats:
//! - `text` - Terminal output with colors
//! - `json` - Machine-readable JSON
//! - `markdown` - GitHub-flavored Markdown
//!
//! Three documents can be rendered: an analysis report, a refactoring plan
//! and a run summary. Live run progress is always rendered as text lines.

mod json;
mod markdown;
mod text;

pub use text::render_event;

use crate::execution::RunSummary;
use crate::pipeline::AnalysisReport;
use crate::planning::Plan;
use anyhow::{anyhow, Result};
use std::str::FromStr;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" | "terminal" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(anyhow!(
                "Unknown format '{}'. Valid formats: text, json, markdown",
                s
            )),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// Render an analysis report
pub fn analysis(report: &AnalysisReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => text::render_analysis(report),
        OutputFormat::Json => json::render(report),
        OutputFormat::Markdown => markdown::render_analysis(report),
    }
}

/// Render a refactoring plan
pub fn plan(plan: &Plan, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => text::render_plan(plan),
        OutputFormat::Json => json::render(plan),
        OutputFormat::Markdown => markdown::render_plan(plan),
    }
}

/// Render the summary of a run
pub fn summary(summary: &RunSummary, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => text::render_summary(summary),
        OutputFormat::Json => json::render(summary),
        OutputFormat::Markdown => markdown::render_summary(summary),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::execution::{ExecutionState, UnitStatus};
    use crate::models::{Category, Layer, LineRange, Location, Severity, Violation, ViolationSummary};
    use crate::planning::{ChangeUnit, Phase};
    use crate::scoring::HealthCalculator;
    use std::collections::BTreeMap;

    /// A small analysis report with one critical and one minor violation
    pub(crate) fn test_report() -> AnalysisReport {
        let violations = vec![
            Violation::new(
                "core-imports-infrastructure",
                Category::new("layering"),
                Severity::Critical,
                Location::at("app/core/service.py", LineRange::line(1)),
                "app/core/service.py imports infrastructure module app/infra/db.py",
            )
            .with_fix_kind("extract-abstraction")
            .with_related("app/infra/db.py"),
            Violation::new(
                "oversized-file",
                Category::new("size"),
                Severity::Minor,
                Location::file("app/infra/db.py"),
                "app/infra/db.py has 812 lines (limit 500)",
            ),
        ];
        let calc = HealthCalculator::new();
        let files = ["app/core/service.py", "app/infra/db.py"];
        let mut layers = BTreeMap::new();
        layers.insert(Layer::Core, 1);
        layers.insert(Layer::Infrastructure, 1);

        AnalysisReport {
            root: "/repo".into(),
            files: 2,
            edges: 1,
            external_imports: 3,
            unparseable: Vec::new(),
            layers,
            health: calc.graph_score(&violations),
            directories: calc.directory_scores(files.iter().map(std::path::Path::new), &violations),
            worst_files: calc.worst_files(&violations, 5),
            summary: ViolationSummary::from_violations(&violations),
            violations,
            rules_run: 7,
            files_evaluated: 2,
            sampling: None,
            rule_failures: 0,
            duration_ms: 12,
        }
    }

    pub(crate) fn test_plan() -> Plan {
        let port = ChangeUnit::create("app/core/db_port.py", "", "introduce port")
            .with_severity(Severity::Critical);
        let consumer = ChangeUnit::modify("app/core/service.py", "use port")
            .with_severity(Severity::Critical)
            .depends_on(port.id.clone());
        let split = ChangeUnit::create("app/infra/db_split.py", "", "split oversized file")
            .with_severity(Severity::Minor);
        Plan::new(vec![
            Phase {
                label: "Tier 1: critical fixes".into(),
                priority_tier: 1,
                units: vec![port, consumer],
            },
            Phase {
                label: "Tier 3: minor + info fixes".into(),
                priority_tier: 3,
                units: vec![split],
            },
        ])
    }

    /// Summary of a run that applied phase 1, failed its gate and aborted
    pub(crate) fn test_summary() -> RunSummary {
        let plan = test_plan();
        let mut state = ExecutionState::new(&plan);
        for unit in &plan.phases[0].units {
            state.transition(&unit.id, UnitStatus::Applied).unwrap();
        }
        state
            .transition(&plan.phases[1].units[0].id, UnitStatus::Aborted)
            .unwrap();
        state.verification.insert(0, false);
        state.status = crate::execution::RunStatus::Aborted;
        RunSummary::fold(&plan, &state)
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(OutputFormat::from_str("text").unwrap(), OutputFormat::Text);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(
            OutputFormat::from_str("md").unwrap(),
            OutputFormat::Markdown
        );
        assert!(OutputFormat::from_str("sarif").is_err());
        assert_eq!(OutputFormat::Markdown.to_string(), "markdown");
    }

    #[test]
    fn test_every_format_renders_every_document() {
        let report = test_report();
        let plan = test_plan();
        let summary = test_summary();
        for format in [OutputFormat::Text, OutputFormat::Json, OutputFormat::Markdown] {
            assert!(!analysis(&report, format).unwrap().is_empty());
            assert!(!super::plan(&plan, format).unwrap().is_empty());
            assert!(!super::summary(&summary, format).unwrap().is_empty());
        }
    }
}
