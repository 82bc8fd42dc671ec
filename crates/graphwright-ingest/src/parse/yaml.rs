//! YAML adapter over serde_yaml

use serde::Deserialize;
use serde_yaml::Value;

use super::{decode, ParseResult, ParserAdapter, Position, SyntaxError, SyntaxNode};

pub(crate) const STREAM: &str = "stream";
pub(crate) const MAPPING: &str = "mapping";
pub(crate) const PAIR: &str = "pair";
pub(crate) const SEQUENCE: &str = "sequence";
pub(crate) const STRING: &str = "string";
pub(crate) const INTEGER: &str = "integer";
pub(crate) const FLOAT: &str = "float";
pub(crate) const BOOLEAN: &str = "boolean";
pub(crate) const NULL: &str = "null";

/// Parses YAML streams into a data tree.
///
/// The root is a `stream` node with one child per document. Mappings hold
/// `pair` children whose `value` is the key text and whose single child is
/// the mapped value. A scan error anywhere in the stream leaves the root
/// empty and produces one located error.
pub struct YamlParser;

impl ParserAdapter for YamlParser {
    fn language(&self) -> &'static str {
        "yaml"
    }

    fn parse(&self, bytes: &[u8]) -> ParseResult {
        let content = decode(bytes);
        let mut root = SyntaxNode::new(STREAM);
        let mut errors = Vec::new();

        for document in serde_yaml::Deserializer::from_str(&content) {
            match Value::deserialize(document) {
                Ok(value) => root.children.push(convert(&value)),
                Err(e) => {
                    let at = e
                        .location()
                        .map(|l| Position::new(l.line(), l.column()))
                        .unwrap_or_else(|| Position::new(1, 1));
                    errors.push(SyntaxError::new(at, e.to_string()));
                    root.children.clear();
                    break;
                }
            }
        }

        ParseResult {
            language: self.language(),
            root,
            content,
            errors,
        }
    }
}

fn convert(value: &Value) -> SyntaxNode {
    match value {
        Value::Null => SyntaxNode::new(NULL),
        Value::Bool(b) => SyntaxNode::leaf(BOOLEAN, b.to_string()),
        Value::Number(n) if n.is_f64() => SyntaxNode::leaf(FLOAT, n.to_string()),
        Value::Number(n) => SyntaxNode::leaf(INTEGER, n.to_string()),
        Value::String(s) => SyntaxNode::leaf(STRING, s.clone()),
        Value::Sequence(items) => {
            let mut node = SyntaxNode::new(SEQUENCE);
            node.children = items.iter().map(convert).collect();
            node
        }
        Value::Mapping(map) => {
            let mut node = SyntaxNode::new(MAPPING);
            for (k, v) in map {
                let Some(key) = key_text(k) else { continue };
                node.children.push(SyntaxNode::leaf(PAIR, key).with_child(convert(v)));
            }
            node
        }
        Value::Tagged(tagged) => convert(&tagged.value),
    }
}

fn key_text(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Tagged(tagged) => key_text(&tagged.value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParseResult {
        YamlParser.parse(text.as_bytes())
    }

    #[test]
    fn test_playbook_shape() {
        let result = parse(
            "---\n- hosts: web\n  become: true\n  tasks:\n    - name: install\n      apt: { name: nginx }\n",
        );
        assert!(result.is_clean());
        let doc = &result.root.children[0];
        assert!(doc.is_sequence());
        let play = &doc.items()[0];
        assert_eq!(play.get("hosts").and_then(SyntaxNode::as_str), Some("web"));
        assert_eq!(play.get("become").and_then(SyntaxNode::as_bool), Some(true));
        let task = &play.get("tasks").unwrap().items()[0];
        assert_eq!(task.entries().map(|(k, _)| k).collect::<Vec<_>>(), vec!["name", "apt"]);
        assert_eq!(
            task.get("apt").unwrap().to_json(),
            serde_json::json!({ "name": "nginx" })
        );
    }

    #[test]
    fn test_scan_error_has_location_and_empty_tree() {
        let result = parse("a: 1\nb: [unclosed\n");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].line >= 2);
        assert!(result.root.children.is_empty());
    }

    #[test]
    fn test_multiple_documents() {
        let result = parse("a: 1\n---\nb: 2\n");
        assert_eq!(result.root.children.len(), 2);
        assert_eq!(
            result.root.children[1].get("b").map(SyntaxNode::to_json),
            Some(serde_json::json!(2))
        );
    }

    #[test]
    fn test_scalar_kinds() {
        let result = parse("i: 3\nf: 1.5\ns: text\nn: ~\nl: [a, b]\n");
        let doc = &result.root.children[0];
        assert_eq!(doc.get("i").unwrap().kind, INTEGER);
        assert_eq!(doc.get("f").unwrap().kind, FLOAT);
        assert_eq!(doc.get("s").unwrap().as_str(), Some("text"));
        assert_eq!(doc.get("n").unwrap().kind, NULL);
        assert_eq!(doc.get("l").unwrap().as_str_list(), vec!["a", "b"]);
    }
}
