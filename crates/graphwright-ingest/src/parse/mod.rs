//! Parser adapters
//!
//! Every adapter turns raw file bytes into a [`ParseResult`]: an owned
//! syntax tree, the decoded content and the syntax errors found on the
//! way. Parsing never fails; malformed input yields a partial tree.

mod jinja;
mod plain;
mod python;
mod yaml;

use std::ops::Range;
use std::path::Path;

use serde::Serialize;

pub use jinja::JinjaParser;
pub use plain::PlainParser;
pub use python::PythonParser;
pub use yaml::YamlParser;

/// 1-based line and column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Position of a byte offset within `content`
    pub fn at_offset(content: &str, offset: usize) -> Self {
        let offset = offset.min(content.len());
        let before = &content.as_bytes()[..offset];
        let line = before.iter().filter(|b| **b == b'\n').count() + 1;
        let line_start = before.iter().rposition(|b| *b == b'\n').map(|i| i + 1).unwrap_or(0);
        Self {
            line,
            column: offset - line_start + 1,
        }
    }
}

/// A located syntax error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(at: Position, message: impl Into<String>) -> Self {
        Self {
            line: at.line,
            column: at.column,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// A node of an owned syntax tree.
///
/// Grammar-backed adapters fill `range` and leave `value` empty, so the
/// text is read back from the content. Data adapters (YAML, Jinja) carry
/// the decoded scalar in `value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntaxNode {
    pub kind: String,
    /// Name of the grammar field this node fills in its parent
    pub field: Option<String>,
    pub named: bool,
    pub value: Option<String>,
    pub range: Range<usize>,
    pub start: Position,
    pub end: Position,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            named: true,
            ..Default::default()
        }
    }

    pub fn leaf(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new(kind)
        }
    }

    pub fn with_child(mut self, child: SyntaxNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn at(mut self, start: Position, end: Position) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// First child filling the given grammar field
    pub fn field(&self, name: &str) -> Option<&SyntaxNode> {
        self.children.iter().find(|c| c.field.as_deref() == Some(name))
    }

    /// Every child filling the given grammar field
    pub fn fields<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SyntaxNode> + 'a {
        self.children
            .iter()
            .filter(move |c| c.field.as_deref() == Some(name))
    }

    pub fn named_children(&self) -> impl Iterator<Item = &SyntaxNode> {
        self.children.iter().filter(|c| c.named)
    }

    pub fn children_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a SyntaxNode> + 'a {
        self.children.iter().filter(move |c| c.kind == kind)
    }

    pub fn first_of_kind(&self, kind: &str) -> Option<&SyntaxNode> {
        self.children.iter().find(|c| c.kind == kind)
    }

    /// Depth-first search for every descendant of a kind, including self
    pub fn descendants_of_kind<'a>(&'a self, kind: &str) -> Vec<&'a SyntaxNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.kind == kind {
                out.push(node);
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Data-tree accessors (YAML)
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_mapping(&self) -> bool {
        self.kind == yaml::MAPPING
    }

    pub fn is_sequence(&self) -> bool {
        self.kind == yaml::SEQUENCE
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self.kind.as_str(),
            yaml::STRING | yaml::INTEGER | yaml::FLOAT | yaml::BOOLEAN
        )
    }

    /// Value under `key` of a mapping node
    pub fn get(&self, key: &str) -> Option<&SyntaxNode> {
        if !self.is_mapping() {
            return None;
        }
        self.entries().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Key/value pairs of a mapping node, in document order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &SyntaxNode)> {
        self.children.iter().filter_map(|pair| {
            let key = pair.value.as_deref()?;
            let value = pair.children.first()?;
            Some((key, value))
        })
    }

    /// Items of a sequence node
    pub fn items(&self) -> &[SyntaxNode] {
        if self.is_sequence() {
            &self.children
        } else {
            &[]
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if self.is_scalar() {
            self.value.as_deref()
        } else {
            None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match (self.kind.as_str(), self.value.as_deref()) {
            (yaml::BOOLEAN, Some("true")) => Some(true),
            (yaml::BOOLEAN, Some("false")) => Some(false),
            _ => None,
        }
    }

    /// Scalar text, or the items of a sequence of scalars
    pub fn as_str_list(&self) -> Vec<String> {
        if let Some(s) = self.as_str() {
            return vec![s.to_string()];
        }
        self.items()
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect()
    }

    /// Convert a data tree back into JSON
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self.kind.as_str() {
            yaml::MAPPING => Value::Object(
                self.entries()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            yaml::SEQUENCE => Value::Array(self.children.iter().map(SyntaxNode::to_json).collect()),
            yaml::BOOLEAN => Value::Bool(self.as_bool().unwrap_or(false)),
            yaml::INTEGER => self
                .value
                .as_deref()
                .and_then(|v| v.parse::<i64>().ok())
                .map(Value::from)
                .unwrap_or(Value::Null),
            yaml::FLOAT => self
                .value
                .as_deref()
                .and_then(|v| v.parse::<f64>().ok())
                .map(Value::from)
                .unwrap_or(Value::Null),
            yaml::STRING => Value::String(self.value.clone().unwrap_or_default()),
            _ => Value::Null,
        }
    }
}

/// Output of one parser adapter call
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub language: &'static str,
    pub root: SyntaxNode,
    pub content: String,
    pub errors: Vec<SyntaxError>,
}

impl ParseResult {
    /// Source text covered by a grammar node
    pub fn text(&self, node: &SyntaxNode) -> &str {
        self.content.get(node.range.clone()).unwrap_or("")
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Converts raw bytes into a syntax tree plus errors.
///
/// Implementations are deterministic and side-effect free.
pub trait ParserAdapter: Send + Sync {
    fn language(&self) -> &'static str;

    fn parse(&self, bytes: &[u8]) -> ParseResult;
}

/// Decode bytes as UTF-8, replacing invalid sequences
pub(crate) fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// The adapters known to the pipeline, selected by file extension
pub struct ParserSet {
    python: PythonParser,
    yaml: YamlParser,
    jinja: JinjaParser,
    plain: PlainParser,
}

impl ParserSet {
    pub fn new() -> Self {
        Self {
            python: PythonParser,
            yaml: YamlParser,
            jinja: JinjaParser,
            plain: PlainParser,
        }
    }

    pub fn for_path(&self, path: &Path) -> &dyn ParserAdapter {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") => &self.python,
            Some("yml") | Some("yaml") => &self.yaml,
            Some("j2") | Some("jinja") | Some("jinja2") => &self.jinja,
            _ => &self.plain,
        }
    }

    pub fn parse(&self, path: &Path, bytes: &[u8]) -> ParseResult {
        self.for_path(path).parse(bytes)
    }
}

impl Default for ParserSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_at_offset() {
        let text = "ab\ncd\nef";
        assert_eq!(Position::at_offset(text, 0), Position::new(1, 1));
        assert_eq!(Position::at_offset(text, 4), Position::new(2, 2));
        assert_eq!(Position::at_offset(text, 100), Position::new(3, 3));
    }

    #[test]
    fn test_parser_selection() {
        let parsers = ParserSet::new();
        assert_eq!(parsers.for_path(Path::new("a/b.py")).language(), "python");
        assert_eq!(parsers.for_path(Path::new("site.yml")).language(), "yaml");
        assert_eq!(parsers.for_path(Path::new("x.yaml")).language(), "yaml");
        assert_eq!(parsers.for_path(Path::new("t/nginx.conf.j2")).language(), "jinja");
        assert_eq!(parsers.for_path(Path::new("README")).language(), "text");
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let parsers = ParserSet::new();
        let result = parsers.parse(Path::new("notes.txt"), b"ok \xff\xfe bytes");
        assert!(result.content.contains('\u{FFFD}'));
        assert!(result.is_clean());
    }

    #[test]
    fn test_descendants_of_kind() {
        let tree = SyntaxNode::new("root")
            .with_child(SyntaxNode::new("a").with_child(SyntaxNode::new("b")))
            .with_child(SyntaxNode::new("b"));
        assert_eq!(tree.descendants_of_kind("b").len(), 2);
    }
}
