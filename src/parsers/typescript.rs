//! TypeScript/JavaScript import extraction
//!
//! Static `import ... from 'x'`, re-exports `export ... from 'x'` and
//! CommonJS `require('x')` calls.

use super::{node_line, ParseError, RawImport};
use tree_sitter::{Language, Node, Query, QueryCursor, StreamingIterator};

const IMPORT_QUERY_STR: &str = r#"
    (import_statement
        source: (string) @import_source
    )
    (export_statement
        source: (string) @export_source
    )
"#;

pub(super) fn extract_imports(
    root: &Node,
    source: &[u8],
    language: &Language,
) -> Result<Vec<RawImport>, ParseError> {
    let query = Query::new(language, IMPORT_QUERY_STR)
        .map_err(|e| ParseError::Grammar(format!("import query: {}", e)))?;

    let mut imports = Vec::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, *root, source);

    while let Some(m) = matches.next() {
        for capture in m.captures.iter() {
            if let Some(specifier) = string_literal(&capture.node, source) {
                imports.push(RawImport {
                    specifier,
                    names: Vec::new(),
                    line: node_line(&capture.node),
                });
            }
        }
    }

    collect_requires(root, source, &mut imports);
    imports.sort_by_key(|i| i.line);
    Ok(imports)
}

/// `require('x')` with a single string literal argument
fn collect_requires(root: &Node, source: &[u8], imports: &mut Vec<RawImport>) {
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.kind() == "call_expression" {
            let is_require = node
                .child_by_field_name("function")
                .and_then(|f| f.utf8_text(source).ok())
                .map(|name| name == "require")
                .unwrap_or(false);
            if is_require {
                let arg = node
                    .child_by_field_name("arguments")
                    .and_then(|args| args.named_child(0))
                    .filter(|arg| arg.kind() == "string");
                if let Some(specifier) = arg.and_then(|a| string_literal(&a, source)) {
                    imports.push(RawImport {
                        specifier,
                        names: Vec::new(),
                        line: node_line(&node),
                    });
                }
            }
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
}

fn string_literal(node: &Node, source: &[u8]) -> Option<String> {
    let text = node.utf8_text(source).ok()?;
    let value = text
        .trim_start_matches(['"', '\'', '`'])
        .trim_end_matches(['"', '\'', '`']);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
