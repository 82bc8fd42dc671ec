//! Fallback adapter for files without a grammar

use super::{decode, ParseResult, ParserAdapter, Position, SyntaxNode};

/// Wraps the whole file in a single `document` node
pub struct PlainParser;

impl ParserAdapter for PlainParser {
    fn language(&self) -> &'static str {
        "text"
    }

    fn parse(&self, bytes: &[u8]) -> ParseResult {
        let content = decode(bytes);
        let mut root = SyntaxNode::new("document").at(
            Position::new(1, 1),
            Position::at_offset(&content, content.len()),
        );
        root.range = 0..content.len();

        ParseResult {
            language: self.language(),
            root,
            content,
            errors: Vec::new(),
        }
    }
}
