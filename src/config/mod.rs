//! Configuration module for archplan
//!
//! This module handles:
//! - Project-level configuration (archplan.toml / .archplanrc.json)
//! - Layer classification heuristics
//! - Rule pack selection and per-rule overrides
//! - Sampling, verification and execution defaults

mod project_config;

pub use project_config::{
    load_config_file, load_project_config, normalize_rule_id, ExecutionConfig, LayersConfig,
    ParamValue, ProjectConfig, RuleOverride, RulesConfig, SamplingConfig, ScanConfig,
    VerifyConfig, CONFIG_JSON, CONFIG_TOML, DEFAULT_EXCLUDE_PATTERNS,
};
