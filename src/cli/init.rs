//! `init` command - write a commented config template

use super::exit;
use crate::config::CONFIG_TOML;
use anyhow::{Context, Result};
use console::style;
use std::path::Path;

const TEMPLATE: &str = r#"# archplan configuration

[scan]
# Files to scan (default: every language the parser understands)
# include = ["**/*.py", "**/*.ts", "**/*.tsx", "**/*.rs"]
# Extra excludes, added to the built-in ones (node_modules, target, ...)
exclude = []
# Files always evaluated when sampling is active
entry_points = []

[layers]
# Path segments (directory names or file stems) marking each layer
core = ["core", "domain", "model", "models", "entities", "entity"]
infrastructure = ["infra", "infrastructure", "adapters", "adapter", "db", "database", "persistence", "repositories", "storage"]
presentation = ["ui", "web", "api", "controllers", "views", "handlers", "routes", "components", "pages", "cli"]

# File-stem suffixes, checked before path segments
[layers.suffixes]
"_repository" = "infrastructure"
"_controller" = "presentation"
"_view" = "presentation"

[rules]
# External rule pack; the built-in pack is used when unset
# pack = "rules.toml"
# Only evaluate these categories / rule ids (empty = all)
categories = []
ids = []

# [rules.overrides.missing-test]
# enabled = false

# [rules.overrides.fan-out]
# severity = "major"
# params = { max_imports = 25 }

[sampling]
enabled = true
threshold_files = 2000
largest = 50
percent = 20.0
seed = 42

[verify]
# Run after every phase; a non-zero exit blocks the next phase
# command = ["cargo", "test"]
timeout_secs = 600

[execution]
# workers = 4
"#;

pub(super) fn run(path: &Path) -> Result<i32> {
    let repo_path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    if !repo_path.is_dir() {
        anyhow::bail!("Path is not a directory: {}", repo_path.display());
    }

    let config_path = repo_path.join(CONFIG_TOML);
    if config_path.exists() {
        println!(
            "{} {} already exists",
            style("✓").green(),
            style(config_path.display()).cyan()
        );
        return Ok(exit::OK);
    }

    std::fs::write(&config_path, TEMPLATE)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!(
        "{} Created {}",
        style("✓").green(),
        style(config_path.display()).cyan()
    );
    Ok(exit::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_project_config;

    #[test]
    fn test_template_parses_and_matches_defaults() {
        let config: crate::config::ProjectConfig = toml::from_str(TEMPLATE).unwrap();
        assert!(config.verify.command.is_empty());
        assert_eq!(config.verify.timeout_secs, Some(600));
        assert_eq!(config.sampling.threshold_files, 2000);
        let defaults = crate::config::LayersConfig::default();
        assert_eq!(config.layers.core, defaults.core);
        assert_eq!(config.layers.infrastructure, defaults.infrastructure);
        assert_eq!(config.layers.presentation, defaults.presentation);
        assert_eq!(config.layers.suffixes, defaults.suffixes);
    }

    #[test]
    fn test_init_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_TOML), "[verify]\ncommand = [\"make\"]\n").unwrap();
        run(dir.path()).unwrap();
        let config = load_project_config(dir.path());
        assert_eq!(config.verify.command, vec!["make"]);
    }
}
