//! Rule registry: in-memory index of rules by id and by category

use super::Rule;
use crate::models::Category;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while building the registry from a rule pack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate rule id '{id}'")]
    DuplicateId { id: String },

    #[error("rule '{rule}' references unknown predicate '{predicate}'")]
    UnknownPredicate { rule: String, predicate: String },

    #[error("rule '{rule}' references unknown fix shape '{fix}'")]
    UnknownFixShape { rule: String, fix: String },

    #[error("rule '{rule}' has invalid severity '{value}'")]
    InvalidSeverity { rule: String, value: String },

    #[error("rule '{rule}' parameter '{param}': {reason}")]
    InvalidParam {
        rule: String,
        param: String,
        reason: String,
    },
}

/// Rules in load order, indexed by id and category
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
    by_id: BTreeMap<String, usize>,
    by_category: BTreeMap<Category, Vec<usize>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting the first colliding id
    pub fn load(rules: impl IntoIterator<Item = Rule>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for rule in rules {
            registry.register(rule)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, rule: Rule) -> Result<(), RegistryError> {
        if self.by_id.contains_key(&rule.id) {
            return Err(RegistryError::DuplicateId { id: rule.id });
        }
        let idx = self.rules.len();
        self.by_id.insert(rule.id.clone(), idx);
        self.by_category
            .entry(rule.category.clone())
            .or_default()
            .push(idx);
        self.rules.push(rule);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.by_id.get(id).map(|&i| &self.rules[i])
    }

    /// All rules in load order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> + '_ {
        self.by_category.keys()
    }

    pub fn in_category(&self, category: &Category) -> Vec<&Rule> {
        self.by_category
            .get(category)
            .map(|idxs| idxs.iter().map(|&i| &self.rules[i]).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules matching every given filter, in load order. `None` or an empty
    /// slice means no filtering on that axis.
    pub fn filter(&self, categories: Option<&[String]>, ids: Option<&[String]>) -> Vec<&Rule> {
        let categories: Option<Vec<Category>> = categories
            .filter(|c| !c.is_empty())
            .map(|c| c.iter().map(|s| Category::new(s.as_str())).collect());
        let ids = ids.filter(|i| !i.is_empty());

        self.rules
            .iter()
            .filter(|rule| {
                categories
                    .as_ref()
                    .map(|cats| cats.contains(&rule.category))
                    .unwrap_or(true)
            })
            .filter(|rule| ids.map(|ids| ids.contains(&rule.id)).unwrap_or(true))
            .collect()
    }
}
