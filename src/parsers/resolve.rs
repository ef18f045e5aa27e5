//! Import specifier resolution
//!
//! Maps a raw specifier to repository-relative paths using purely lexical
//! normalisation against the set of known files. Nothing here touches the
//! filesystem.

use super::{KnownFiles, Language, RawImport};
use std::path::{Component, Path, PathBuf};

const TS_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".d.ts", ".js", ".jsx", ".mjs", ".cjs"];

/// Resolve an import to the known files it refers to. Empty means external.
pub(super) fn resolve(
    language: Language,
    from: &Path,
    import: &RawImport,
    known: &KnownFiles,
) -> Vec<PathBuf> {
    match language {
        Language::Python => resolve_python(from, import, known),
        Language::TypeScript | Language::Tsx => resolve_relative_script(from, &import.specifier, known)
            .into_iter()
            .collect(),
        Language::Rust => resolve_rust(from, &import.specifier, known)
            .into_iter()
            .collect(),
    }
}

/// Lexically normalise `.` and `..`; `None` when the path escapes the root
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

fn resolve_python(from: &Path, import: &RawImport, known: &KnownFiles) -> Vec<PathBuf> {
    let spec = import.specifier.as_str();
    let dots = spec.chars().take_while(|c| *c == '.').count();
    let module = &spec[dots..];

    let bases: Vec<PathBuf> = if dots > 0 {
        let mut base = parent_dir(from);
        for _ in 1..dots {
            if !base.pop() {
                return Vec::new();
            }
        }
        vec![base]
    } else {
        vec![PathBuf::new(), PathBuf::from("src")]
    };

    let mut found = Vec::new();
    for base in &bases {
        for name in &import.names {
            let dotted = if module.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", module, name)
            };
            if let Some(path) = python_module_file(base, &dotted, known) {
                if !found.contains(&path) {
                    found.push(path);
                }
            }
        }
        if !found.is_empty() {
            return found;
        }
        if let Some(path) = python_module_file(base, module, known) {
            return vec![path];
        }
    }
    found
}

/// `a.b` under `base` as `a/b.py`, `a/b.pyi` or `a/b/__init__.py`
fn python_module_file(base: &Path, dotted: &str, known: &KnownFiles) -> Option<PathBuf> {
    let mut dir = base.to_path_buf();
    for segment in dotted.split('.').filter(|s| !s.is_empty()) {
        dir.push(segment);
    }
    if dir == base {
        let init = base.join("__init__.py");
        return known.contains(&init).then_some(init);
    }
    [
        dir.with_extension("py"),
        dir.with_extension("pyi"),
        dir.join("__init__.py"),
    ]
    .into_iter()
    .find(|candidate| known.contains(candidate))
}

// ---------------------------------------------------------------------------
// TypeScript / JavaScript
// ---------------------------------------------------------------------------

/// Only relative specifiers resolve; bare specifiers are packages
fn resolve_relative_script(from: &Path, spec: &str, known: &KnownFiles) -> Option<PathBuf> {
    if !(spec.starts_with("./") || spec.starts_with("../") || spec == "." || spec == "..") {
        return None;
    }
    let joined = normalize(&parent_dir(from).join(spec))?;
    let joined_str = joined.to_string_lossy().into_owned();

    let mut candidates = vec![joined.clone()];
    // ESM TypeScript writes `./x.js` for a `./x.ts` source
    for (written, actual) in [(".js", ".ts"), (".js", ".tsx"), (".jsx", ".tsx"), (".mjs", ".mts")] {
        if let Some(stem) = joined_str.strip_suffix(written) {
            candidates.push(PathBuf::from(format!("{}{}", stem, actual)));
        }
    }
    for ext in TS_EXTENSIONS {
        candidates.push(PathBuf::from(format!("{}{}", joined_str, ext)));
    }
    for ext in TS_EXTENSIONS {
        candidates.push(joined.join(format!("index{}", ext)));
    }

    candidates.into_iter().find(|c| known.contains(c))
}

// ---------------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------------

/// Directory holding the children of the module defined by `file`
fn rust_module_dir(file: &Path) -> PathBuf {
    let parent = parent_dir(file);
    match file.file_stem().and_then(|s| s.to_str()) {
        Some("mod") | Some("lib") | Some("main") | None => parent,
        Some(stem) => parent.join(stem),
    }
}

/// Nearest `src` ancestor, or the scanned root
fn rust_crate_root(file: &Path) -> PathBuf {
    file.ancestors()
        .skip(1)
        .find(|a| a.file_name().map(|n| n == "src").unwrap_or(false))
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

fn resolve_rust(from: &Path, spec: &str, known: &KnownFiles) -> Option<PathBuf> {
    let mut segments: Vec<&str> = spec.split("::").filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return None;
    }

    let mut base = match segments[0] {
        "crate" => {
            segments.remove(0);
            rust_crate_root(from)
        }
        "self" => {
            segments.remove(0);
            rust_module_dir(from)
        }
        "super" => rust_module_dir(from),
        _ => return None,
    };
    while segments.first() == Some(&"super") {
        segments.remove(0);
        if !base.pop() {
            return None;
        }
    }

    // Longest module prefix that exists; the tail names items inside it
    for len in (1..=segments.len()).rev() {
        let mut dir = base.clone();
        for segment in &segments[..len] {
            dir.push(segment);
        }
        let file = dir.with_extension("rs");
        if known.contains(&file) {
            return Some(file);
        }
        let module = dir.join("mod.rs");
        if known.contains(&module) {
            return Some(module);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(paths: &[&str]) -> KnownFiles {
        KnownFiles::new(paths.iter().map(PathBuf::from))
    }

    fn raw(spec: &str, names: &[&str]) -> RawImport {
        RawImport {
            specifier: spec.to_string(),
            names: names.iter().map(|s| s.to_string()).collect(),
            line: 1,
        }
    }

    #[test]
    fn test_normalize_rejects_escape() {
        assert_eq!(
            normalize(Path::new("a/./b/../c")),
            Some(PathBuf::from("a/c"))
        );
        assert_eq!(normalize(Path::new("../x")), None);
    }

    #[test]
    fn test_python_relative_import() {
        let files = known(&["pkg/infra/repo.py", "pkg/infra/__init__.py"]);
        let got = resolve_python(
            Path::new("pkg/domain/order.py"),
            &raw("..infra", &["repo"]),
            &files,
        );
        assert_eq!(got, vec![PathBuf::from("pkg/infra/repo.py")]);
    }

    #[test]
    fn test_python_src_layout_and_package_init() {
        let files = known(&["src/app/__init__.py"]);
        let got = resolve_python(Path::new("tests/t.py"), &raw("app", &[]), &files);
        assert_eq!(got, vec![PathBuf::from("src/app/__init__.py")]);
    }

    #[test]
    fn test_script_esm_js_suffix_maps_to_ts() {
        let files = known(&["src/db.ts"]);
        assert_eq!(
            resolve_relative_script(Path::new("src/app.ts"), "./db.js", &files),
            Some(PathBuf::from("src/db.ts"))
        );
        assert_eq!(
            resolve_relative_script(Path::new("src/app.ts"), "lodash", &files),
            None
        );
    }

    #[test]
    fn test_rust_super_and_self() {
        let files = known(&["src/a/mod.rs", "src/a/b.rs", "src/a/c.rs", "src/a/b/d.rs"]);
        assert_eq!(
            resolve_rust(Path::new("src/a/b.rs"), "super::c::Thing", &files),
            Some(PathBuf::from("src/a/c.rs"))
        );
        assert_eq!(
            resolve_rust(Path::new("src/a/b.rs"), "self::d::Item", &files),
            Some(PathBuf::from("src/a/b/d.rs"))
        );
        assert_eq!(
            resolve_rust(Path::new("src/a/c.rs"), "serde::Serialize", &files),
            None
        );
    }
}
