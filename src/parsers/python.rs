//! Python import extraction
//!
//! Handles `import a.b`, `import a.b as c`, `from a.b import c, d` and
//! relative `from ..pkg import x`, at any nesting depth (imports inside
//! functions and `if TYPE_CHECKING:` blocks count too).

use super::{node_line, RawImport};
use tree_sitter::Node;

pub(super) fn extract_imports(root: &Node, source: &[u8]) -> Vec<RawImport> {
    let mut imports = Vec::new();
    let mut stack = vec![*root];

    while let Some(node) = stack.pop() {
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    if let Some(module) = imported_module(&name, source) {
                        imports.push(RawImport {
                            specifier: module,
                            names: Vec::new(),
                            line: node_line(&node),
                        });
                    }
                }
            }
            "import_from_statement" => {
                let Some(module) = node
                    .child_by_field_name("module_name")
                    .and_then(|m| m.utf8_text(source).ok())
                else {
                    continue;
                };
                let mut cursor = node.walk();
                let names = node
                    .children_by_field_name("name", &mut cursor)
                    .filter_map(|n| imported_module(&n, source))
                    .collect();
                imports.push(RawImport {
                    specifier: module.to_string(),
                    names,
                    line: node_line(&node),
                });
            }
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.children(&mut cursor).collect();
                stack.extend(children.into_iter().rev());
            }
        }
    }

    imports
}

/// Name of an imported module, looking through `x as y` aliases
fn imported_module(node: &Node, source: &[u8]) -> Option<String> {
    let target = if node.kind() == "aliased_import" {
        node.child_by_field_name("name")?
    } else {
        *node
    };
    target.utf8_text(source).ok().map(|s| s.to_string())
}
