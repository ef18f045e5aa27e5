//! Analysis pipeline
//!
//! Wires the stages together:
//! 1. Enumerate and parse source files into a [`ModuleGraph`]
//! 2. Evaluate the selected rules
//! 3. Score health at graph, directory and file scope
//! 4. Optionally synthesize a refactoring [`Plan`]

use crate::classifier::PathLayerClassifier;
use crate::config::ProjectConfig;
use crate::detectors::{DetectionEngine, DetectionReport, ProgressCallback, SamplingPolicy, SamplingSummary};
use crate::graph::{BuildReport, FsFileSource, ModelBuilder, ModuleGraph};
use crate::models::{Layer, Violation, ViolationSummary};
use crate::planning::{Plan, PlanError, PlanSynthesizer, PriorityPolicy};
use crate::parsers::TreeSitterParser;
use crate::rules::{RulePack, RuleRegistry};
use crate::scoring::{HealthCalculator, HealthScore};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Knobs for one analysis pass. Empty filters mean "everything".
#[derive(Default)]
pub struct AnalysisOptions {
    pub categories: Vec<String>,
    pub rule_ids: Vec<String>,
    /// Disable sampling even when the config enables it
    pub no_sampling: bool,
    /// Detection workers (0 = auto)
    pub workers: usize,
    /// How many worst files the report lists
    pub worst_files: usize,
    pub progress: Option<ProgressCallback>,
}

impl AnalysisOptions {
    pub fn new() -> Self {
        Self {
            worst_files: 10,
            ..Default::default()
        }
    }
}

/// Everything one pass produced, kept together for reporting and planning
pub struct Analysis {
    pub root: PathBuf,
    pub graph: ModuleGraph,
    pub build: BuildReport,
    pub registry: RuleRegistry,
    pub detection: DetectionReport,
    worst_files: usize,
}

/// Serializable analysis report
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub root: PathBuf,
    pub files: usize,
    pub edges: usize,
    pub external_imports: usize,
    pub unparseable: Vec<UnparseableFile>,
    pub layers: BTreeMap<Layer, usize>,
    pub health: HealthScore,
    pub directories: Vec<HealthScore>,
    pub worst_files: Vec<HealthScore>,
    pub summary: ViolationSummary,
    pub violations: Vec<Violation>,
    pub rules_run: usize,
    pub files_evaluated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingSummary>,
    pub rule_failures: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnparseableFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Load the rule registry for a repository: configured or built-in pack,
/// with per-rule overrides applied
pub fn load_registry(root: &Path, config: &ProjectConfig) -> Result<RuleRegistry> {
    let mut pack = RulePack::for_project(root, config)?;
    pack.apply_overrides(config);
    pack.into_registry().context("Invalid rule pack")
}

/// Run the model builder and the detector over `root`
pub fn analyze(root: &Path, config: &ProjectConfig, options: AnalysisOptions) -> Result<Analysis> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", root.display()))?;
    if !root.is_dir() {
        anyhow::bail!("Path is not a directory: {}", root.display());
    }

    let source = FsFileSource::new();
    let parser = TreeSitterParser::new();
    let classifier = PathLayerClassifier::from_config(&config.layers);
    let (graph, build) = ModelBuilder::new(&source, &parser, &classifier)
        .include(config.scan.include.iter().cloned())
        .exclude(config.scan.effective_excludes())
        .build(&root)?;

    let registry = load_registry(&root, config)?;
    let categories = merged_filter(&options.categories, &config.rules.categories);
    let ids = merged_filter(&options.rule_ids, &config.rules.ids);
    let rules = registry.filter(categories, ids);
    info!("Evaluating {} of {} rules", rules.len(), registry.len());

    let sampling = (config.sampling.enabled && !options.no_sampling)
        .then(|| SamplingPolicy::from_config(&config.sampling, &config.scan.entry_points));
    let mut engine = DetectionEngine::new(options.workers).with_sampling(sampling);
    if let Some(progress) = options.progress {
        engine = engine.with_progress(progress);
    }
    let detection = engine.detect(&graph, &rules)?;

    Ok(Analysis {
        root,
        graph,
        build,
        registry,
        detection,
        worst_files: options.worst_files,
    })
}

/// CLI filters replace config filters; an empty list means no filter
fn merged_filter<'a>(cli: &'a [String], config: &'a [String]) -> Option<&'a [String]> {
    if !cli.is_empty() {
        Some(cli)
    } else if !config.is_empty() {
        Some(config)
    } else {
        None
    }
}

impl Analysis {
    pub fn violations(&self) -> &[Violation] {
        &self.detection.violations
    }

    pub fn report(&self) -> AnalysisReport {
        let calculator = HealthCalculator::new();
        let violations = &self.detection.violations;
        AnalysisReport {
            root: self.root.clone(),
            files: self.graph.len(),
            edges: self.graph.edge_count(),
            external_imports: self.build.external_imports,
            unparseable: self
                .build
                .unparseable
                .iter()
                .map(|(path, reason)| UnparseableFile {
                    path: path.clone(),
                    reason: reason.clone(),
                })
                .collect(),
            layers: self.graph.layer_counts(),
            health: calculator.graph_score(violations),
            directories: calculator
                .directory_scores(self.graph.files().map(|f| f.path.as_path()), violations),
            worst_files: calculator.worst_files(violations, self.worst_files),
            summary: self.detection.summary,
            violations: violations.clone(),
            rules_run: self.detection.rules_run,
            files_evaluated: self.detection.files_evaluated,
            sampling: self.detection.sampling.clone(),
            rule_failures: self.detection.rule_failures,
            duration_ms: self.build.duration_ms + self.detection.duration_ms,
        }
    }

    pub fn plan(&self, policy: &PriorityPolicy) -> Result<Plan, PlanError> {
        PlanSynthesizer::new(&self.registry, &self.graph).synthesize(self.violations(), policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_core_importing_infrastructure_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app/core/service.py", "from app.infra.db import connect\n");
        write(dir.path(), "app/infra/db.py", "def connect():\n    pass\n");

        let mut options = AnalysisOptions::new();
        options.categories = vec!["layering".into()];
        let analysis = analyze(dir.path(), &ProjectConfig::default(), options).unwrap();

        let violations = analysis.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Critical);
        assert_eq!(violations[0].location.path, PathBuf::from("app/core/service.py"));

        let report = analysis.report();
        assert_eq!(report.files, 2);
        assert_eq!(report.edges, 1);
        assert_eq!(report.summary.critical, 1);
        assert!(report.health.value < 10.0);
    }

    #[test]
    fn test_unparseable_file_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app/core/ok.py", "import os\n");
        write(dir.path(), "app/core/broken.py", "def (:\n");

        let analysis =
            analyze(dir.path(), &ProjectConfig::default(), AnalysisOptions::new()).unwrap();
        let report = analysis.report();
        assert_eq!(report.files, 2);
        assert_eq!(report.unparseable.len(), 1);
        assert_eq!(report.unparseable[0].path, PathBuf::from("app/core/broken.py"));
        assert!(report
            .violations
            .iter()
            .all(|v| v.location.path != Path::new("app/core/broken.py")));
    }

    #[test]
    fn test_cli_filter_wins_over_config() {
        let cli = vec!["a".to_string()];
        let config = vec!["b".to_string()];
        assert_eq!(merged_filter(&cli, &config), Some(&cli[..]));
        assert_eq!(merged_filter(&[], &config), Some(&config[..]));
        assert_eq!(merged_filter(&[], &[]), None);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(analyze(&missing, &ProjectConfig::default(), AnalysisOptions::new()).is_err());
    }
}
