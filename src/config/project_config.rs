//! Project-level configuration support
//!
//! Loads per-project configuration from `archplan.toml` or `.archplanrc.json`
//! in the repository root.
//!
//! # Configuration Format
//!
//! ```toml
//! # archplan.toml
//!
//! [scan]
//! include = ["**/*.py", "**/*.ts"]
//! exclude = ["generated/**"]
//! entry_points = ["app/main.py"]
//!
//! [layers]
//! core = ["domain", "model"]
//! suffixes = { "_repository" = "infrastructure" }
//!
//! [rules.overrides.core-imports-infrastructure]
//! severity = "major"
//!
//! [rules.overrides.oversized-file]
//! params = { max_lines = 800 }
//!
//! [verify]
//! command = ["pytest", "-q"]
//! timeout_secs = 300
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Preferred config file name
pub const CONFIG_TOML: &str = "archplan.toml";
/// Fallback config file name
pub const CONFIG_JSON: &str = ".archplanrc.json";

/// Built-in default exclusion patterns for vendored and generated code
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "**/node_modules/**",
    "**/vendor/**",
    "**/third_party/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/.venv/**",
    "**/venv/**",
    "**/__pycache__/**",
    "**/*.min.js",
];

/// Project-level configuration loaded from archplan.toml or similar
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub layers: LayersConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub verify: VerifyConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Which files are scanned
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Include globs (default: every extension the parser understands)
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// Extra exclude globs, added to the built-in defaults
    #[serde(default)]
    pub exclude: Vec<String>,

    /// If true, disable built-in default exclusion patterns
    #[serde(default)]
    pub skip_default_excludes: bool,

    /// Files always evaluated even when sampling is active
    #[serde(default)]
    pub entry_points: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: Vec::new(),
            skip_default_excludes: false,
            entry_points: Vec::new(),
        }
    }
}

fn default_include() -> Vec<String> {
    crate::parsers::default_include_globs()
}

impl ScanConfig {
    /// Effective exclusion patterns (defaults + user patterns)
    pub fn effective_excludes(&self) -> Vec<String> {
        let mut patterns: Vec<String> = if self.skip_default_excludes {
            Vec::new()
        } else {
            DEFAULT_EXCLUDE_PATTERNS.iter().map(|s| s.to_string()).collect()
        };
        for p in &self.exclude {
            if !patterns.contains(p) {
                patterns.push(p.clone());
            }
        }
        patterns
    }
}

/// Path heuristics for the layer classifier
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayersConfig {
    /// Directory (or file stem) names marking the core layer
    #[serde(default = "default_core_segments")]
    pub core: Vec<String>,

    #[serde(default = "default_infrastructure_segments")]
    pub infrastructure: Vec<String>,

    #[serde(default = "default_presentation_segments")]
    pub presentation: Vec<String>,

    /// File-stem suffix to layer name, checked before path segments
    #[serde(default = "default_suffixes")]
    pub suffixes: BTreeMap<String, String>,
}

impl Default for LayersConfig {
    fn default() -> Self {
        Self {
            core: default_core_segments(),
            infrastructure: default_infrastructure_segments(),
            presentation: default_presentation_segments(),
            suffixes: default_suffixes(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_core_segments() -> Vec<String> {
    strings(&["core", "domain", "model", "models", "entities", "entity"])
}

fn default_infrastructure_segments() -> Vec<String> {
    strings(&[
        "infra",
        "infrastructure",
        "adapters",
        "adapter",
        "db",
        "database",
        "persistence",
        "repositories",
        "storage",
    ])
}

fn default_presentation_segments() -> Vec<String> {
    strings(&[
        "ui",
        "web",
        "api",
        "controllers",
        "views",
        "handlers",
        "routes",
        "components",
        "pages",
        "cli",
    ])
}

fn default_suffixes() -> BTreeMap<String, String> {
    let mut suffixes = BTreeMap::new();
    suffixes.insert("_repository".to_string(), "infrastructure".to_string());
    suffixes.insert("_controller".to_string(), "presentation".to_string());
    suffixes.insert("_view".to_string(), "presentation".to_string());
    suffixes
}

/// Rule pack selection and per-rule overrides
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RulesConfig {
    /// External Rule Pack file, relative to the repository root
    #[serde(default)]
    pub pack: Option<PathBuf>,

    /// Only evaluate rules in these categories (empty = all)
    #[serde(default)]
    pub categories: Vec<String>,

    /// Only evaluate these rule ids (empty = all)
    #[serde(default)]
    pub ids: Vec<String>,

    /// Per-rule overrides keyed by rule id
    #[serde(default)]
    pub overrides: BTreeMap<String, RuleOverride>,
}

/// Configuration override for a specific rule
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleOverride {
    /// Whether the rule is enabled (default: true)
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Override the default severity (critical, major, minor, info)
    #[serde(default)]
    pub severity: Option<String>,

    /// Predicate parameter overrides, merged over the pack's params
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

/// A predicate parameter can be an integer, float, boolean, string or list
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    List(Vec<String>),
}

impl ParamValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(v) => Some(*v),
            ParamValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Integer(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// List value; a single string is treated as a one-element list
    pub fn as_list(&self) -> Option<Vec<String>> {
        match self {
            ParamValue::List(v) => Some(v.clone()),
            ParamValue::String(v) => Some(vec![v.clone()]),
            _ => None,
        }
    }
}

/// Sampling policy for very large repositories
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sampling only applies above this many parsed files
    #[serde(default = "default_threshold_files")]
    pub threshold_files: usize,

    /// The N largest files are always evaluated
    #[serde(default = "default_largest")]
    pub largest: usize,

    /// Percentage of the remaining files evaluated
    #[serde(default = "default_percent")]
    pub percent: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_files: default_threshold_files(),
            largest: default_largest(),
            percent: default_percent(),
            seed: default_seed(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_threshold_files() -> usize {
    2000
}
fn default_largest() -> usize {
    50
}
fn default_percent() -> f64 {
    20.0
}
fn default_seed() -> u64 {
    42
}

/// Verification command run between phases
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifyConfig {
    /// Program and arguments; empty means verification always passes
    #[serde(default)]
    pub command: Vec<String>,

    /// Timeout in seconds; absent means wait indefinitely
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> Option<u64> {
    Some(600)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Concurrent unit applications during a batch apply
    #[serde(default)]
    pub workers: Option<usize>,
}

/// Normalize a rule id for override lookup: lowercase, `_` and spaces to `-`
pub fn normalize_rule_id(id: &str) -> String {
    id.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .collect()
}

impl ProjectConfig {
    /// Override for a rule id, matching on the normalized id
    pub fn rule_override(&self, rule_id: &str) -> Option<&RuleOverride> {
        let wanted = normalize_rule_id(rule_id);
        self.rules
            .overrides
            .iter()
            .find(|(id, _)| normalize_rule_id(id) == wanted)
            .map(|(_, o)| o)
    }

    /// External pack path resolved against the repository root
    pub fn pack_path(&self, repo_path: &Path) -> Option<PathBuf> {
        self.rules.pack.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                repo_path.join(p)
            }
        })
    }
}

/// Load project configuration from the repository root.
///
/// Searches for configuration files in this order:
/// 1. `archplan.toml`
/// 2. `.archplanrc.json`
///
/// Returns default configuration if no config file is found or the file
/// fails to load.
pub fn load_project_config(repo_path: &Path) -> ProjectConfig {
    let toml_path = repo_path.join(CONFIG_TOML);
    if toml_path.exists() {
        match load_toml_config(&toml_path) {
            Ok(config) => {
                debug!("Loaded project config from {}", toml_path.display());
                return config;
            }
            Err(e) => {
                warn!("Failed to load {}: {:#}", toml_path.display(), e);
            }
        }
    }

    let json_path = repo_path.join(CONFIG_JSON);
    if json_path.exists() {
        match load_json_config(&json_path) {
            Ok(config) => {
                debug!("Loaded project config from {}", json_path.display());
                return config;
            }
            Err(e) => {
                warn!("Failed to load {}: {:#}", json_path.display(), e);
            }
        }
    }

    debug!("No project config found, using defaults");
    ProjectConfig::default()
}

/// Load an explicitly named config file. Unlike [`load_project_config`] a
/// failure here is an error: the user asked for this file.
pub fn load_config_file(path: &Path) -> anyhow::Result<ProjectConfig> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => load_json_config(path),
        _ => load_toml_config(path),
    }
}

fn load_toml_config(path: &Path) -> anyhow::Result<ProjectConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ProjectConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid TOML in {}", path.display()))?;
    Ok(config)
}

fn load_json_config(path: &Path) -> anyhow::Result<ProjectConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ProjectConfig = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(config)
}
