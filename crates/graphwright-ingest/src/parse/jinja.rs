//! Lexical Jinja adapter
//!
//! Only tag boundaries are recognized. The tree is a flat `template` node
//! with one child per `{{ }}`, `{% %}` or `{# #}` tag; the trimmed tag body
//! is the child's value.

use super::{decode, ParseResult, ParserAdapter, Position, SyntaxError, SyntaxNode};

pub(crate) const OUTPUT: &str = "output";
pub(crate) const STATEMENT: &str = "statement";
pub(crate) const COMMENT: &str = "comment";

pub struct JinjaParser;

impl ParserAdapter for JinjaParser {
    fn language(&self) -> &'static str {
        "jinja"
    }

    fn parse(&self, bytes: &[u8]) -> ParseResult {
        let content = decode(bytes);
        let mut root = SyntaxNode::new("template");
        let mut errors = Vec::new();
        let mut cursor = 0;

        while let Some(found) = content[cursor..].find('{') {
            let open = cursor + found;
            let (kind, close) = match content.as_bytes().get(open + 1) {
                Some(b'{') => (OUTPUT, "}}"),
                Some(b'%') => (STATEMENT, "%}"),
                Some(b'#') => (COMMENT, "#}"),
                _ => {
                    cursor = open + 1;
                    continue;
                }
            };

            let body_start = open + 2;
            let Some(rel_end) = content[body_start..].find(close) else {
                errors.push(SyntaxError::new(
                    Position::at_offset(&content, open),
                    format!("unclosed {} tag, expected '{}'", kind, close),
                ));
                break;
            };
            let body_end = body_start + rel_end;
            let tag_end = body_end + close.len();

            let body = content[body_start..body_end]
                .trim_start_matches(['-', '+'])
                .trim_end_matches(['-', '+'])
                .trim();

            let mut node = SyntaxNode::leaf(kind, body).at(
                Position::at_offset(&content, open),
                Position::at_offset(&content, tag_end),
            );
            node.range = open..tag_end;
            root.children.push(node);

            cursor = tag_end;
        }

        ParseResult {
            language: self.language(),
            root,
            content,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_collected() {
        let result = JinjaParser.parse(
            b"server {{ server_name }};\n{% for p in ports %}listen {{ p }};{% endfor %}{# note #}\n",
        );
        assert!(result.is_clean());
        let kinds: Vec<_> = result.root.children.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, vec![OUTPUT, STATEMENT, OUTPUT, STATEMENT, COMMENT]);
        assert_eq!(result.root.children[1].value.as_deref(), Some("for p in ports"));
    }

    #[test]
    fn test_whitespace_control_is_stripped() {
        let result = JinjaParser.parse(b"{%- if debug -%}x{% endif %}");
        assert_eq!(result.root.children[0].value.as_deref(), Some("if debug"));
    }

    #[test]
    fn test_unclosed_tag_keeps_earlier_tags() {
        let result = JinjaParser.parse(b"{{ a }}\nline two {{ b\n");
        assert_eq!(result.root.children.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].line, 2);
        assert_eq!(result.errors[0].column, 10);
    }

    #[test]
    fn test_plain_braces_are_text() {
        let result = JinjaParser.parse(b"{ \"json\": {} }");
        assert!(result.root.children.is_empty());
        assert!(result.is_clean());
    }
}
