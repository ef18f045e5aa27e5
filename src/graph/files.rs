//! File enumeration
//!
//! Walks the repository respecting `.gitignore` and `.archplanignore`, and
//! applies the configured include/exclude globs as walker overrides.

use anyhow::{Context, Result};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Custom ignore file honoured next to `.gitignore`
pub const IGNORE_FILENAME: &str = ".archplanignore";

/// Enumerates and reads source files
pub trait FileSource: Send + Sync {
    /// List files under `root` matching `include` and not matching `exclude`.
    /// Returned paths are relative to `root` and sorted.
    fn list(&self, root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<PathBuf>>;

    /// Read a file given its path relative to `root`
    fn read(&self, root: &Path, path: &Path) -> std::io::Result<String>;
}

/// Filesystem-backed file source
#[derive(Debug, Clone, Default)]
pub struct FsFileSource {
    /// Include hidden files and directories
    pub hidden: bool,
}

impl FsFileSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSource for FsFileSource {
    fn list(&self, root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<PathBuf>> {
        let mut overrides = OverrideBuilder::new(root);
        for glob in include {
            overrides
                .add(glob)
                .with_context(|| format!("Invalid include glob '{}'", glob))?;
        }
        for glob in exclude {
            overrides
                .add(&format!("!{}", glob))
                .with_context(|| format!("Invalid exclude glob '{}'", glob))?;
        }
        let overrides = overrides.build().context("Failed to compile glob patterns")?;

        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(!self.hidden)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .require_git(false)
            .add_custom_ignore_filename(IGNORE_FILENAME)
            .overrides(overrides);

        let mut files = Vec::new();
        for entry in builder.build().flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
        files.sort();
        debug!("Enumerated {} files under {}", files.len(), root.display());
        Ok(files)
    }

    fn read(&self, root: &Path, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(root.join(path))
    }
}
