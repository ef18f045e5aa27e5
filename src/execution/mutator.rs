//! File mutator collaborator
//!
//! [`FsMutator`] applies one change unit to the working tree. It never
//! overwrites: a `Create` or `Rename` onto an existing path is an error.

use crate::planning::{ChangeKind, ChangeUnit, TextEdit};
use regex::Regex;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("{path} already exists")]
    AlreadyExists { path: PathBuf },

    #[error("{path} does not exist")]
    NotFound { path: PathBuf },

    #[error("{path} escapes the repository root")]
    OutsideRoot { path: PathBuf },

    #[error("rename unit {unit} has no destination")]
    MissingDestination { unit: String },

    #[error("mutator panicked on {unit}: {message}")]
    Panicked { unit: String, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What applying a unit did, beyond succeeding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    pub note: Option<String>,
}

impl MutationOutcome {
    fn noted(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
        }
    }
}

pub trait FileMutator: Send + Sync {
    fn apply(&self, unit: &ChangeUnit) -> Result<MutationOutcome, MutationError>;
}

/// Applies units to files under `root`
#[derive(Debug, Clone)]
pub struct FsMutator {
    root: PathBuf,
}

impl FsMutator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute path for a repository-relative target
    fn resolve(&self, relative: &Path) -> Result<PathBuf, MutationError> {
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(MutationError::OutsideRoot {
                path: relative.to_path_buf(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn create(&self, unit: &ChangeUnit) -> Result<MutationOutcome, MutationError> {
        let path = self.resolve(&unit.target_path)?;
        ensure_parent(&path)?;
        // create_new refuses to open an existing file, so the check cannot race
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| match source.kind() {
                ErrorKind::AlreadyExists => MutationError::AlreadyExists {
                    path: unit.target_path.clone(),
                },
                _ => MutationError::Io {
                    path: unit.target_path.clone(),
                    source,
                },
            })?;
        file.write_all(unit.content.as_deref().unwrap_or("").as_bytes())
            .map_err(|source| MutationError::Io {
                path: unit.target_path.clone(),
                source,
            })?;
        Ok(MutationOutcome::default())
    }

    fn modify(&self, unit: &ChangeUnit) -> Result<MutationOutcome, MutationError> {
        let path = self.resolve(&unit.target_path)?;
        if !path.is_file() {
            return Err(MutationError::NotFound {
                path: unit.target_path.clone(),
            });
        }
        if unit.edits.is_empty() {
            return Ok(MutationOutcome::noted("no automatic edits; manual follow-up"));
        }

        let io = |source| MutationError::Io {
            path: unit.target_path.clone(),
            source,
        };
        let original = std::fs::read_to_string(&path).map_err(io)?;
        let (updated, applied) = apply_edits(&original, &unit.edits);
        if updated != original {
            std::fs::write(&path, updated).map_err(io)?;
        }

        if applied == unit.edits.len() {
            Ok(MutationOutcome::default())
        } else {
            Ok(MutationOutcome::noted(format!(
                "{} of {} edits applied; manual follow-up",
                applied,
                unit.edits.len()
            )))
        }
    }

    fn rename(&self, unit: &ChangeUnit) -> Result<MutationOutcome, MutationError> {
        let to_rel = unit
            .rename_to
            .as_ref()
            .ok_or_else(|| MutationError::MissingDestination {
                unit: unit.id.clone(),
            })?;
        let from = self.resolve(&unit.target_path)?;
        let to = self.resolve(to_rel)?;
        if !from.exists() {
            return Err(MutationError::NotFound {
                path: unit.target_path.clone(),
            });
        }
        if to.exists() {
            return Err(MutationError::AlreadyExists {
                path: to_rel.clone(),
            });
        }
        ensure_parent(&to)?;
        std::fs::rename(&from, &to).map_err(|source| MutationError::Io {
            path: unit.target_path.clone(),
            source,
        })?;
        Ok(MutationOutcome::default())
    }

    fn delete(&self, unit: &ChangeUnit) -> Result<MutationOutcome, MutationError> {
        let path = self.resolve(&unit.target_path)?;
        if !path.is_file() {
            return Err(MutationError::NotFound {
                path: unit.target_path.clone(),
            });
        }
        std::fs::remove_file(&path).map_err(|source| MutationError::Io {
            path: unit.target_path.clone(),
            source,
        })?;
        Ok(MutationOutcome::default())
    }
}

impl FileMutator for FsMutator {
    fn apply(&self, unit: &ChangeUnit) -> Result<MutationOutcome, MutationError> {
        debug!("Applying {}", unit.describe());
        match unit.kind {
            ChangeKind::Create => self.create(unit),
            ChangeKind::Modify => self.modify(unit),
            ChangeKind::Rename => self.rename(unit),
            ChangeKind::Delete => self.delete(unit),
        }
    }
}

fn ensure_parent(path: &Path) -> Result<(), MutationError> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent).map_err(|source| MutationError::Io {
            path: parent.to_path_buf(),
            source,
        }),
        None => Ok(()),
    }
}

/// Replace every whole-token occurrence of each edit's `find`; returns the
/// new text and how many edits matched at least once
pub(crate) fn apply_edits(text: &str, edits: &[TextEdit]) -> (String, usize) {
    let mut out = text.to_string();
    let mut applied = 0;
    for edit in edits {
        if edit.find.is_empty() {
            continue;
        }
        let Ok(re) = Regex::new(&token_pattern(&edit.find)) else {
            continue;
        };
        if re.is_match(&out) {
            out = re
                .replace_all(&out, regex::NoExpand(&edit.replace))
                .into_owned();
            applied += 1;
        }
    }
    (out, applied)
}

fn token_pattern(find: &str) -> String {
    let is_word = |c: Option<char>| c.map(|c| c.is_alphanumeric() || c == '_').unwrap_or(false);
    let mut pattern = String::new();
    if is_word(find.chars().next()) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(find));
    if is_word(find.chars().last()) {
        pattern.push_str(r"\b");
    }
    pattern
}
