//! Python adapter over the tree-sitter grammar

use tree_sitter::{Node, Parser};

use super::{decode, ParseResult, ParserAdapter, Position, SyntaxError, SyntaxNode};

/// Nesting depth past which subtrees are dropped
const MAX_DEPTH: usize = 512;

/// Parses Python source with tree-sitter.
///
/// ERROR nodes and MISSING tokens become syntax errors; the rest of the
/// tree is kept so extraction can still use it.
pub struct PythonParser;

impl ParserAdapter for PythonParser {
    fn language(&self) -> &'static str {
        "python"
    }

    fn parse(&self, bytes: &[u8]) -> ParseResult {
        let content = decode(bytes);
        let mut errors = Vec::new();

        let mut parser = Parser::new();
        let root = match parser.set_language(&tree_sitter_python::language()) {
            Ok(()) => match parser.parse(&content, None) {
                Some(tree) => convert(tree.root_node(), None, 0, &mut errors),
                None => {
                    errors.push(SyntaxError::new(Position::new(1, 1), "parser produced no tree"));
                    SyntaxNode::new("module")
                }
            },
            Err(e) => {
                errors.push(SyntaxError::new(
                    Position::new(1, 1),
                    format!("Failed to set language: {}", e),
                ));
                SyntaxNode::new("module")
            }
        };

        errors.sort_by_key(|e| (e.line, e.column));
        errors.dedup();

        ParseResult {
            language: self.language(),
            root,
            content,
            errors,
        }
    }
}

fn position(point: tree_sitter::Point) -> Position {
    Position::new(point.row + 1, point.column + 1)
}

fn convert(node: Node, field: Option<&str>, depth: usize, errors: &mut Vec<SyntaxError>) -> SyntaxNode {
    let start = position(node.start_position());

    if node.is_missing() {
        errors.push(SyntaxError::new(start, format!("missing {}", node.kind())));
    } else if node.is_error() {
        errors.push(SyntaxError::new(start, "invalid syntax"));
    }

    let mut out = SyntaxNode {
        kind: node.kind().to_string(),
        field: field.map(str::to_string),
        named: node.is_named(),
        value: None,
        range: node.start_byte()..node.end_byte(),
        start,
        end: position(node.end_position()),
        children: Vec::with_capacity(node.child_count()),
    };

    if depth >= MAX_DEPTH {
        if node.child_count() > 0 {
            errors.push(SyntaxError::new(start, "nesting too deep, subtree skipped"));
        }
        return out;
    }

    for i in 0..node.child_count() {
        let Some(child) = node.child(i) else { continue };
        if child.is_extra() && !child.is_error() {
            continue;
        }
        let field = u32::try_from(i).ok().and_then(|i| node.field_name_for_child(i));
        out.children.push(convert(child, field, depth + 1, errors));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_definitions_with_fields() {
        let result = PythonParser.parse(b"class A(Base):\n    def run(self):\n        pass\n");
        assert!(result.is_clean());
        let class = result.root.first_of_kind("class_definition").unwrap();
        assert_eq!(result.text(class.field("name").unwrap()), "A");
        let body = class.field("body").unwrap();
        let method = body.first_of_kind("function_definition").unwrap();
        assert_eq!(result.text(method.field("name").unwrap()), "run");
        assert_eq!(method.start.line, 2);
    }

    #[test]
    fn test_errors_are_reported_not_raised() {
        let result = PythonParser.parse(b"def broken(:\n    pass\n\nx = 1\n");
        assert!(!result.errors.is_empty());
        assert_eq!(result.root.kind, "module");
    }

    #[test]
    fn test_parse_is_deterministic() {
        let src = b"import os\nfrom . import util\n";
        let a = PythonParser.parse(src);
        let b = PythonParser.parse(src);
        assert_eq!(a.root, b.root);
        assert_eq!(a.errors, b.errors);
    }
}
