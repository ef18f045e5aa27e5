//! Rust `use` extraction
//!
//! Each `use` declaration is flattened into one specifier per leaf path:
//! `use crate::a::{b, c::D as E};` becomes `crate::a::b` and `crate::a::c::D`.

use super::{node_line, ParseError, RawImport};
use tree_sitter::{Language, Node, Query, QueryCursor, StreamingIterator};

const USE_QUERY_STR: &str = r#"
    (use_declaration
        argument: (_) @use_path
    )
"#;

pub(super) fn extract_imports(
    root: &Node,
    source: &[u8],
    language: &Language,
) -> Result<Vec<RawImport>, ParseError> {
    let query = Query::new(language, USE_QUERY_STR)
        .map_err(|e| ParseError::Grammar(format!("use query: {}", e)))?;

    let mut imports = Vec::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, *root, source);

    while let Some(m) = matches.next() {
        for capture in m.captures.iter() {
            let Ok(text) = capture.node.utf8_text(source) else {
                continue;
            };
            let line = node_line(&capture.node);
            for specifier in expand_use_tree(text) {
                imports.push(RawImport {
                    specifier,
                    names: Vec::new(),
                    line,
                });
            }
        }
    }

    Ok(imports)
}

/// Flatten a use tree into its leaf paths, dropping aliases, `self` leaves
/// and glob stars
pub(crate) fn expand_use_tree(text: &str) -> Vec<String> {
    let compact: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = Vec::new();
    expand_into("", &compact, &mut out);
    out
}

fn expand_into(prefix: &str, tree: &str, out: &mut Vec<String>) {
    let tree = tree.trim();
    if tree.is_empty() {
        return;
    }

    if let Some(open) = tree.find('{') {
        let head = tree[..open].trim().trim_end_matches("::");
        let inner = tree[open + 1..].trim_end();
        let inner = inner.strip_suffix('}').unwrap_or(inner);
        let base = join(prefix, head);
        for part in split_top_level(inner) {
            expand_into(&base, part, out);
        }
        return;
    }

    let path = tree.split(" as ").next().unwrap_or(tree).trim();
    let path = path.trim_end_matches("::*").trim_end_matches('*');
    let full = if path == "self" {
        prefix.to_string()
    } else {
        join(prefix, path)
    };
    if !full.is_empty() {
        out.push(full);
    }
}

fn join(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}::{}", prefix, path),
    }
}

/// Split on commas that are not nested inside braces
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_simple_path() {
        assert_eq!(expand_use_tree("crate::a::B"), vec!["crate::a::B"]);
    }

    #[test]
    fn test_expand_nested_groups() {
        assert_eq!(
            expand_use_tree("crate::a::{self, b::{C, D as E}, f::*}"),
            vec!["crate::a", "crate::a::b::C", "crate::a::b::D", "crate::a::f"]
        );
    }

    #[test]
    fn test_expand_multiline_group() {
        let text = "super::{\n    x,\n    y,\n}";
        assert_eq!(expand_use_tree(text), vec!["super::x", "super::y"]);
    }
}
