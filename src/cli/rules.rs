//! `rules` command - list registered rules

use super::exit;
use crate::config::ProjectConfig;
use crate::pipeline::load_registry;
use anyhow::{Context, Result};
use console::style;
use std::path::Path;

pub(super) fn run(path: &Path, config: &ProjectConfig, categories: &[String]) -> Result<i32> {
    let repo_path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    let registry = load_registry(&repo_path, config)?;
    let rules = registry.filter(Some(categories), None);

    if rules.is_empty() {
        println!("No rules match.");
        return Ok(exit::OK);
    }

    let id_width = rules.iter().map(|r| r.id.len()).max().unwrap_or(0);
    let cat_width = rules
        .iter()
        .map(|r| r.category.as_str().len())
        .max()
        .unwrap_or(0);
    println!(
        "{}",
        style(format!(
            "{:<id_width$}  {:<cat_width$}  {:<8}  {}",
            "RULE", "CATEGORY", "SEVERITY", "FIX"
        ))
        .bold()
    );
    for rule in rules {
        println!(
            "{:<id_width$}  {:<cat_width$}  {:<8}  {}",
            rule.id,
            rule.category.as_str(),
            rule.default_severity.to_string(),
            rule.fix_shape
        );
        if !rule.description.is_empty() {
            println!("  {}", style(&rule.description).dim());
        }
    }
    Ok(exit::OK)
}
