//! Python extractor: modules, classes, functions and imports

use std::collections::{BTreeSet, HashSet};

use graphwright_core::limits::{truncate_chars, MAX_DOCSTRING_LEN};
use graphwright_core::{EntityRecord, NodeRef, RepoType, RepositoryContext, SoftFailure};

use super::{file_record, Extraction, Extractor, SourceInfo};
use crate::parse::{ParseResult, SyntaxNode};

/// Top-level function names that mark a dynamic inventory script
pub const INVENTORY_ENTRY_POINTS: &[&str] =
    &["get_inventory", "parse_cli_args", "list_inventory", "host_inventory"];

#[derive(Debug, Default)]
pub struct PythonExtractor;

impl PythonExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for PythonExtractor {
    fn name(&self) -> &'static str {
        "python"
    }

    fn repo_type(&self) -> RepoType {
        RepoType::Python
    }

    fn handles(&self, rel_path: &str) -> bool {
        rel_path.ends_with(".py")
    }

    fn extract(&self, source: &SourceInfo, parse: &ParseResult, _ctx: &RepositoryContext) -> Extraction {
        let mut out = Extraction::new();
        let file = out.entity(file_record(source, parse));
        if source.extension() != Some("py") {
            return out;
        }

        let (module, is_package) = module_name(&source.rel_path);
        let mut walker = ModuleWalker {
            parse,
            source,
            module: module.clone(),
            file,
            module_ref: NodeRef::new("Module").with("name", module.as_str()),
            classes: Vec::new(),
            out,
        };

        let docstring = docstring(parse, &parse.root);
        walker.out.entity(
            EntityRecord::keyed("Module", [("name", module.as_str())])
                .with("path", source.rel_path.as_str())
                .with("is_package", is_package)
                .with_opt("docstring", docstring),
        );
        walker.out.relate(&walker.module_ref, "IN_FILE", &walker.file);

        walker.walk_block(&parse.root, None);
        walker.link_inheritance();
        walker.imports(is_package);
        walker.out
    }
}

/// Dotted module name for a relative path, and whether it is a package
pub fn module_name(rel_path: &str) -> (String, bool) {
    let stem = rel_path.strip_suffix(".py").unwrap_or(rel_path);
    let (name, is_package) = match stem.strip_suffix("/__init__") {
        Some(package) => (package, true),
        None => (stem, stem == "__init__"),
    };
    (name.replace('/', "."), is_package)
}

/// Resolve a possibly relative `from` import against the importing module
pub fn resolve_import(current: &str, is_package: bool, level: usize, module: Option<&str>) -> Option<String> {
    if level == 0 {
        return module.map(str::to_string);
    }
    let mut parts: Vec<&str> = current.split('.').filter(|p| !p.is_empty()).collect();
    if !is_package {
        parts.pop();
    }
    for _ in 1..level {
        parts.pop()?;
    }
    if let Some(m) = module {
        parts.extend(m.split('.'));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("."))
    }
}

/// Name of the first top-level function that marks an inventory script
pub fn inventory_entry_point(parse: &ParseResult) -> Option<String> {
    parse.root.named_children().find_map(|stmt| {
        let def = match stmt.kind.as_str() {
            "function_definition" => stmt,
            "decorated_definition" => stmt.field("definition")?,
            _ => return None,
        };
        let name = parse.text(def.field("name")?);
        INVENTORY_ENTRY_POINTS.contains(&name).then(|| name.to_string())
    })
}

struct ModuleWalker<'a> {
    parse: &'a ParseResult,
    source: &'a SourceInfo,
    module: String,
    file: NodeRef,
    module_ref: NodeRef,
    /// Declared classes with their base names
    classes: Vec<(String, NodeRef, Vec<String>)>,
    out: Extraction,
}

impl ModuleWalker<'_> {
    fn text(&self, node: &SyntaxNode) -> String {
        self.parse.text(node).to_string()
    }

    fn skip(&mut self, node: &SyntaxNode, message: &str) {
        self.out.soft_failure(
            SoftFailure::new(self.source.rel_path.as_str(), message).at_line(node.start.line),
        );
    }

    /// Walk the statements of a module or class body.
    /// `class` is the enclosing class's qualified name and reference.
    fn walk_block(&mut self, block: &SyntaxNode, class: Option<(&str, &NodeRef)>) {
        for stmt in block.named_children() {
            match stmt.kind.as_str() {
                "class_definition" => self.class(stmt, Vec::new(), class),
                "function_definition" => self.function(stmt, Vec::new(), class),
                "decorated_definition" => {
                    let decorators = stmt
                        .children_of_kind("decorator")
                        .filter_map(|d| self.decorator_name(d))
                        .collect();
                    match stmt.field("definition") {
                        Some(def) if def.is("class_definition") => self.class(def, decorators, class),
                        Some(def) if def.is("function_definition") => self.function(def, decorators, class),
                        _ => self.skip(stmt, "decorator without a definition"),
                    }
                }
                "ERROR" => self.skip(stmt, "skipped unparsable statement"),
                _ => {}
            }
        }
    }

    fn class(&mut self, node: &SyntaxNode, decorators: Vec<String>, outer: Option<(&str, &NodeRef)>) {
        let Some(name) = node.field("name").map(|n| self.text(n)) else {
            self.skip(node, "class definition without a name");
            return;
        };
        let qualified = match outer {
            Some((outer, _)) => format!("{}.{}", outer, name),
            None => name,
        };

        let mut bases = Vec::new();
        let mut metaclass = None;
        if let Some(args) = node.field("superclasses") {
            for arg in args.named_children() {
                match arg.kind.as_str() {
                    "identifier" | "attribute" => bases.push(self.text(arg)),
                    "keyword_argument" => {
                        let key = arg.field("name").map(|n| self.text(n));
                        if key.as_deref() == Some("metaclass") {
                            metaclass = arg.field("value").map(|v| self.text(v));
                        }
                    }
                    _ => {}
                }
            }
        }
        let is_abstract = bases.iter().any(|b| b == "ABC" || b == "abc.ABC")
            || metaclass.is_some_and(|m| m.ends_with("ABCMeta"));

        let body = node.field("body");
        let docstring = body.and_then(|b| docstring(self.parse, b));

        let class_ref = self.out.entity(
            EntityRecord::keyed("Class", [("module", self.module.as_str()), ("name", qualified.as_str())])
                .with("bases", bases.clone())
                .with("decorators", decorators)
                .with("is_abstract", is_abstract)
                .with("line", node.start.line)
                .with_opt("docstring", docstring),
        );
        self.out.relate(&self.module_ref, "DEFINES_CLASS", &class_ref);
        self.out.relate(&class_ref, "IN_FILE", &self.file);
        self.classes.push((qualified.clone(), class_ref.clone(), bases));

        if let Some(body) = body {
            self.walk_block(body, Some((&qualified, &class_ref)));
        }
    }

    fn function(&mut self, node: &SyntaxNode, decorators: Vec<String>, class: Option<(&str, &NodeRef)>) {
        let Some(name) = node.field("name").map(|n| self.text(n)) else {
            self.skip(node, "function definition without a name");
            return;
        };
        let qualified = match class {
            Some((owner, _)) => format!("{}.{}", owner, name),
            None => name.clone(),
        };
        let params: Vec<String> = node
            .field("parameters")
            .map(|p| p.named_children().filter_map(|p| self.param_name(p)).collect())
            .unwrap_or_default();
        let is_async = node.children.iter().any(|c| c.is("async"));

        let function = self.out.entity(
            EntityRecord::keyed(
                "Function",
                [("module", self.module.as_str()), ("qualified_name", qualified.as_str())],
            )
            .with("name", name)
            .with("params", params)
            .with("decorators", decorators)
            .with("is_async", is_async)
            .with("is_method", class.is_some())
            .with("line", node.start.line),
        );
        match class {
            Some((_, class_ref)) => self.out.relate(class_ref, "HAS_METHOD", &function),
            None => self.out.relate(&self.module_ref, "DEFINES_FUNCTION", &function),
        };
        self.out.relate(&function, "IN_FILE", &self.file);
    }

    fn param_name(&self, node: &SyntaxNode) -> Option<String> {
        match node.kind.as_str() {
            "identifier" => Some(self.text(node)),
            "default_parameter" | "typed_default_parameter" => {
                node.field("name").and_then(|n| self.param_name(n))
            }
            "typed_parameter" => node
                .named_children()
                .find(|c| c.field.as_deref() != Some("type"))
                .and_then(|c| self.param_name(c)),
            "list_splat_pattern" => node
                .named_children()
                .next()
                .map(|c| format!("*{}", self.text(c))),
            "dictionary_splat_pattern" => node
                .named_children()
                .next()
                .map(|c| format!("**{}", self.text(c))),
            _ => None,
        }
    }

    fn decorator_name(&self, decorator: &SyntaxNode) -> Option<String> {
        let expr = decorator.named_children().next()?;
        match expr.kind.as_str() {
            "call" => expr.field("function").map(|f| self.text(f)),
            _ => Some(self.text(expr)),
        }
    }

    /// `INHERITS` for bases declared in the same module
    fn link_inheritance(&mut self) {
        let declared: HashSet<&str> = self.classes.iter().map(|(n, _, _)| n.as_str()).collect();
        let mut edges = Vec::new();
        for (name, class_ref, bases) in &self.classes {
            for base in bases {
                if base != name && declared.contains(base.as_str()) {
                    edges.push((
                        class_ref.clone(),
                        NodeRef::new("Class")
                            .with("module", self.module.as_str())
                            .with("name", base.as_str()),
                    ));
                }
            }
        }
        for (from, to) in edges {
            self.out.relate(&from, "INHERITS", &to);
        }
    }

    fn imports(&mut self, is_package: bool) {
        let parse = self.parse;
        let mut targets = BTreeSet::new();

        for stmt in parse.root.descendants_of_kind("import_statement") {
            for name in stmt.fields("name") {
                let dotted = match name.kind.as_str() {
                    "aliased_import" => name.field("name"),
                    _ => Some(name),
                };
                if let Some(dotted) = dotted {
                    targets.insert(("IMPORTS", self.text(dotted)));
                }
            }
        }

        for stmt in parse.root.descendants_of_kind("import_from_statement") {
            let Some(module) = stmt.field("module_name") else { continue };
            let (level, name) = match module.kind.as_str() {
                "relative_import" => {
                    let level = module
                        .first_of_kind("import_prefix")
                        .map(|p| parse.text(p).matches('.').count())
                        .unwrap_or(1);
                    let name = module.first_of_kind("dotted_name").map(|d| self.text(d));
                    (level, name)
                }
                _ => (0, Some(self.text(module))),
            };

            match resolve_import(&self.module, is_package, level, name.as_deref()) {
                Some(target) => {
                    targets.insert(("FROM_IMPORTS", target));
                }
                // `from . import x` at the repository root names sibling modules
                None if level == 1 && name.is_none() => {
                    for imported in stmt.fields("name") {
                        let dotted = match imported.kind.as_str() {
                            "aliased_import" => imported.field("name"),
                            _ => Some(imported),
                        };
                        if let Some(dotted) = dotted {
                            targets.insert(("FROM_IMPORTS", self.text(dotted)));
                        }
                    }
                }
                None => self.skip(stmt, "relative import climbs above the repository root"),
            }
        }

        for (rel_type, target) in targets {
            if target == self.module || target.is_empty() {
                continue;
            }
            let to = NodeRef::new("Module").with("name", target);
            self.out.relate(&self.module_ref, rel_type, &to);
        }
    }
}

/// First-statement string literal of a module, class or function body
fn docstring(parse: &ParseResult, body: &SyntaxNode) -> Option<String> {
    let first = body.named_children().next()?;
    if !first.is("expression_statement") {
        return None;
    }
    let literal = first.named_children().next().filter(|n| n.is("string"))?;
    let text = string_literal_value(parse.text(literal));
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(truncate_chars(text, MAX_DOCSTRING_LEN))
    }
}

fn string_literal_value(raw: &str) -> &str {
    let s = raw.trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}
