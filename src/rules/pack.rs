//! Rule pack loading
//!
//! A pack is an ordered list of rule records (TOML or JSON). The built-in
//! pack is embedded in the binary; `[rules] pack` in the project config
//! replaces it with a file from the repository.

use super::builtin::{build_predicate, FixShape};
use super::{Params, RegistryError, Rule, RuleRegistry};
use crate::config::{normalize_rule_id, ProjectConfig};
use crate::models::{Category, Severity};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// The embedded default pack
pub const DEFAULT_PACK: &str = include_str!("default_pack.toml");

/// A rule pack as read from disk
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulePack {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// One rule record: `{id, category, severity, predicate, fix, params}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleSpec {
    pub id: String,
    pub category: String,
    pub severity: String,
    pub predicate: String,
    #[serde(default = "default_fix")]
    pub fix: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_fix() -> String {
    FixShape::None.id().to_string()
}

fn default_enabled() -> bool {
    true
}

impl RulePack {
    pub fn parse_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid rule pack TOML")
    }

    pub fn default_pack() -> Result<Self> {
        Self::parse_toml(DEFAULT_PACK)
    }

    /// Load a pack file; `.json` is parsed as JSON, anything else as TOML
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule pack {}", path.display()))?;
        let pack = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Invalid rule pack JSON in {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Invalid rule pack TOML in {}", path.display()))?,
        };
        debug!("Loaded rule pack from {}", path.display());
        Ok(pack)
    }

    /// The configured pack for a repository, or the built-in one
    pub fn for_project(repo_path: &Path, config: &ProjectConfig) -> Result<Self> {
        let mut pack = match config.pack_path(repo_path) {
            Some(path) => Self::load(&path)?,
            None => Self::default_pack()?,
        };
        pack.apply_overrides(config);
        Ok(pack)
    }

    /// Apply per-rule `enabled`, `severity` and `params` overrides
    pub fn apply_overrides(&mut self, config: &ProjectConfig) {
        for id in config.rules.overrides.keys() {
            let wanted = normalize_rule_id(id);
            if !self.rules.iter().any(|r| normalize_rule_id(&r.id) == wanted) {
                warn!("Override for unknown rule '{}' ignored", id);
            }
        }

        for spec in &mut self.rules {
            let Some(o) = config.rule_override(&spec.id) else {
                continue;
            };
            if let Some(enabled) = o.enabled {
                spec.enabled = enabled;
            }
            if let Some(severity) = &o.severity {
                spec.severity = severity.clone();
            }
            for (key, value) in &o.params {
                spec.params.insert(key.clone(), value.clone());
            }
        }
    }

    /// Resolve every enabled record against the catalog and index it
    pub fn into_registry(self) -> Result<RuleRegistry, RegistryError> {
        let mut registry = RuleRegistry::new();
        for spec in self.rules {
            if !spec.enabled {
                debug!("Rule '{}' disabled", spec.id);
                continue;
            }
            registry.register(spec.into_rule()?)?;
        }
        Ok(registry)
    }
}

impl RuleSpec {
    fn into_rule(self) -> Result<Rule, RegistryError> {
        let severity =
            Severity::parse(&self.severity).ok_or_else(|| RegistryError::InvalidSeverity {
                rule: self.id.clone(),
                value: self.severity.clone(),
            })?;
        let fix_shape = FixShape::parse(&self.fix).ok_or_else(|| RegistryError::UnknownFixShape {
            rule: self.id.clone(),
            fix: self.fix.clone(),
        })?;
        let predicate = build_predicate(&self.id, &self.predicate, &self.params)?;

        Ok(Rule::new(
            self.id,
            Category::new(self.category),
            severity,
            predicate,
            fix_shape,
        )
        .with_description(self.description)
        .with_params(self.params))
    }
}
