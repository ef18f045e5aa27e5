//! Cache path utilities - uses ~/.cache/archplan/<repo-hash>/ rather than a
//! directory inside the scanned repository

use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

/// Overrides the cache base directory (used by tests and CI sandboxes)
pub const CACHE_DIR_ENV: &str = "ARCHPLAN_CACHE_DIR";

/// Get the cache directory for a repository.
/// Uses ~/.cache/archplan/<repo-hash>/ on Unix, %LOCALAPPDATA%/archplan/<repo-hash>/ on Windows.
pub fn get_cache_dir(repo_path: &Path) -> PathBuf {
    let repo_hash = hash_path(repo_path);

    if let Some(base) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(base).join(&repo_hash);
    }

    let base = if cfg!(windows) {
        std::env::var("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")))
    } else {
        dirs::cache_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".cache"))
                .unwrap_or_else(|| PathBuf::from("."))
        })
    };

    base.join("archplan").join(&repo_hash)
}

/// Hash a path to create a unique but deterministic directory name.
/// Uses the canonical path to ensure consistency.
fn hash_path(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let hash = xxh3_64(canonical.to_string_lossy().as_bytes());

    // Use canonical path's file_name for consistent naming (important when path is ".")
    let repo_name = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("repo")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(20)
        .collect::<String>();

    format!("{}-{:012x}", repo_name, hash & 0xffff_ffff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_path_deterministic() {
        let path = Path::new("/tmp/test-repo");
        assert_eq!(hash_path(path), hash_path(path));
        assert_ne!(hash_path(path), hash_path(Path::new("/tmp/other-repo")));
    }

    #[test]
    fn test_cache_dir_format() {
        let path = Path::new("/home/user/my-project");
        let cache = get_cache_dir(path);
        let name = cache.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("my-project-"));
        assert_eq!(name.len(), "my-project-".len() + 12);
    }
}
