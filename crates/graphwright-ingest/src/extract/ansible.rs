//! Ansible extractor: playbooks, roles, variables, templates and inventories

use std::collections::BTreeSet;
use std::sync::OnceLock;

use graphwright_core::limits::{truncate_chars, MAX_VARIABLE_VALUE_LEN};
use graphwright_core::{EntityRecord, NodeRef, RepoType, RepositoryContext, SoftFailure};
use regex::Regex;

use super::python::inventory_entry_point;
use super::{file_record, resolve_relative, Extraction, Extractor, SourceInfo};
use crate::parse::{ParseResult, SyntaxNode};

/// Keys that configure a task rather than name its module
const TASK_KEYWORDS: &[&str] = &[
    "name", "when", "with_items", "with_dict", "with_fileglob", "with_together", "loop",
    "loop_control", "register", "notify", "listen", "tags", "become", "become_user",
    "become_method", "changed_when", "failed_when", "ignore_errors", "delegate_to",
    "delegate_facts", "run_once", "vars", "environment", "no_log", "until", "retries", "delay",
    "args", "check_mode", "diff", "any_errors_fatal", "throttle", "timeout", "collections",
];

/// Keys whose presence in the first item marks a sequence as a playbook
const PLAY_KEYS: &[&str] = &["hosts", "tasks", "roles", "import_playbook"];

const TASK_SECTIONS: &[&str] = &["pre_tasks", "tasks", "post_tasks"];

const BLOCK_SECTIONS: &[&str] = &["block", "rescue", "always"];

/// Jinja names that never refer to a variable
const JINJA_KEYWORDS: &[&str] = &[
    "if", "for", "in", "is", "not", "and", "or", "true", "false", "none", "True", "False",
    "None", "loop", "range", "lookup", "query", "q", "self", "super", "caller", "varargs",
    "kwargs",
];

#[derive(Debug, Default)]
pub struct AnsibleExtractor;

impl AnsibleExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for AnsibleExtractor {
    fn name(&self) -> &'static str {
        "ansible"
    }

    fn repo_type(&self) -> RepoType {
        RepoType::Ansible
    }

    fn handles(&self, rel_path: &str) -> bool {
        [".yml", ".yaml", ".j2", ".py"]
            .iter()
            .any(|ext| rel_path.ends_with(ext))
    }

    fn extract(&self, source: &SourceInfo, parse: &ParseResult, _ctx: &RepositoryContext) -> Extraction {
        let mut ex = FileExtraction::new(source);
        ex.out.entity(file_record(source, parse));

        match source.extension() {
            Some("j2") => ex.template(parse),
            Some("py") => {
                if inventory_entry_point(parse).is_some() {
                    let inventory = ex.out.entity(
                        EntityRecord::keyed("Inventory", [("path", source.rel_path.as_str())])
                            .with("kind", "dynamic"),
                    );
                    ex.out.relate(&inventory, "IN_FILE", &ex.file);
                }
            }
            Some("yml") | Some("yaml") => {
                if let Some(doc) = parse.root.children.first() {
                    ex.yaml(doc);
                }
            }
            _ => {}
        }
        ex.out
    }
}

/// How a YAML document is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum YamlKind {
    Playbook,
    TaskList,
    HandlerList,
    RoleMeta,
    Requirements,
    Inventory,
    Vars,
    Unknown,
}

/// Location of a file inside a role: `<root>/<sub>/...` with `root` ending in `roles/<name>`
#[derive(Debug, Clone, PartialEq, Eq)]
struct RoleInfo {
    name: String,
    root: String,
    sub: String,
}

fn role_of(rel_path: &str) -> Option<RoleInfo> {
    let segments: Vec<&str> = rel_path.split('/').collect();
    let idx = segments.iter().rposition(|s| *s == "roles")?;
    if segments.len() < idx + 4 {
        return None;
    }
    Some(RoleInfo {
        name: segments[idx + 1].to_string(),
        root: segments[..=idx + 1].join("/"),
        sub: segments[idx + 2].to_string(),
    })
}

fn classify(source: &SourceInfo, doc: &SyntaxNode) -> YamlKind {
    let role = role_of(&source.rel_path);
    let sub = role.as_ref().map(|r| r.sub.as_str());
    let parent_dir = source.dir().rsplit('/').next().unwrap_or("");
    let is_requirements = source.file_name().starts_with("requirements");

    if doc.is_sequence() {
        let first = doc.items().iter().find(|i| i.is_mapping());
        if first.is_some_and(|f| PLAY_KEYS.iter().any(|k| f.contains_key(k))) {
            return YamlKind::Playbook;
        }
        if is_requirements
            && doc
                .items()
                .iter()
                .all(|i| i.as_str().is_some() || i.contains_key("name") || i.contains_key("src"))
        {
            return YamlKind::Requirements;
        }
        return match sub.unwrap_or(parent_dir) {
            "tasks" => YamlKind::TaskList,
            "handlers" => YamlKind::HandlerList,
            _ => YamlKind::Unknown,
        };
    }

    if doc.is_mapping() {
        if sub == Some("meta") {
            return YamlKind::RoleMeta;
        }
        if is_requirements && (doc.contains_key("roles") || doc.contains_key("collections")) {
            return YamlKind::Requirements;
        }
        if doc
            .get("all")
            .is_some_and(|all| all.contains_key("hosts") || all.contains_key("children"))
        {
            return YamlKind::Inventory;
        }
        return YamlKind::Vars;
    }

    YamlKind::Unknown
}

/// Variable scope implied by where a vars file lives
fn vars_scope(rel_path: &str) -> &'static str {
    let dirs: Vec<&str> = rel_path.split('/').collect();
    let dirs = &dirs[..dirs.len().saturating_sub(1)];
    if dirs.contains(&"group_vars") {
        "group_vars"
    } else if dirs.contains(&"host_vars") {
        "host_vars"
    } else if dirs.contains(&"defaults") {
        "defaults"
    } else if dirs.contains(&"vars") {
        "vars"
    } else {
        "unknown"
    }
}

/// Scalars as their text, anything else as compact JSON
fn value_text(node: &SyntaxNode) -> Option<String> {
    if node.is("null") {
        return None;
    }
    Some(match node.as_str() {
        Some(s) => s.to_string(),
        None => node.to_json().to_string(),
    })
}

fn role_namespace(name: &str) -> Option<&str> {
    name.split_once('.').map(|(ns, _)| ns)
}

fn role_record(name: &str) -> EntityRecord {
    EntityRecord::keyed("Role", [("name", name)]).with_opt("namespace", role_namespace(name))
}

/// Role name from a `roles:` / `dependencies:` entry
fn role_entry_name(entry: &SyntaxNode) -> Option<&str> {
    entry
        .as_str()
        .or_else(|| entry.get("role").and_then(SyntaxNode::as_str))
        .or_else(|| entry.get("name").and_then(SyntaxNode::as_str))
}

/// Per-file naming context for tasks and handlers
struct TaskScope {
    file_path: String,
    dir: String,
    /// File whose handlers `notify` refers to
    handlers_file: String,
    /// Role root for role files, used to find templates
    role_root: Option<String>,
}

struct FileExtraction<'a> {
    source: &'a SourceInfo,
    file: NodeRef,
    out: Extraction,
}

impl<'a> FileExtraction<'a> {
    fn new(source: &'a SourceInfo) -> Self {
        Self {
            source,
            file: source.file_ref(),
            out: Extraction::new(),
        }
    }

    fn skip(&mut self, node: &SyntaxNode, message: impl Into<String>) {
        let mut failure = SoftFailure::new(self.source.rel_path.as_str(), message);
        if node.start.line > 0 {
            failure = failure.at_line(node.start.line);
        }
        self.out.soft_failure(failure);
    }

    fn path(&self) -> &str {
        &self.source.rel_path
    }

    fn yaml(&mut self, doc: &SyntaxNode) {
        match classify(self.source, doc) {
            YamlKind::Playbook => self.playbook(doc),
            YamlKind::TaskList => self.task_file(doc, false),
            YamlKind::HandlerList => self.task_file(doc, true),
            YamlKind::RoleMeta => self.role_meta(doc),
            YamlKind::Requirements => self.requirements(doc),
            YamlKind::Inventory => {
                let inventory = self.out.entity(
                    EntityRecord::keyed("Inventory", [("path", self.path())]).with("kind", "static"),
                );
                self.out.relate(&inventory, "IN_FILE", &self.file);
            }
            YamlKind::Vars => self.vars_file(doc),
            YamlKind::Unknown => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playbooks
    // ─────────────────────────────────────────────────────────────────────────

    fn playbook(&mut self, doc: &SyntaxNode) {
        let path = self.path().to_string();
        let stem = self
            .source
            .file_name()
            .rsplit_once('.')
            .map(|(s, _)| s)
            .unwrap_or(self.source.file_name())
            .to_string();
        let description = doc
            .items()
            .iter()
            .find_map(|p| p.get("name").and_then(SyntaxNode::as_str));

        let playbook = self.out.entity(
            EntityRecord::keyed("Playbook", [("path", path.as_str())])
                .with("name", stem)
                .with_opt("description", description),
        );
        self.out.relate(&playbook, "IN_FILE", &self.file);

        let scope = TaskScope {
            file_path: path.clone(),
            dir: self.source.dir().to_string(),
            handlers_file: path.clone(),
            role_root: None,
        };
        let mut task_order = 0;

        for (index, play) in doc.items().iter().enumerate() {
            if !play.is_mapping() {
                self.skip(play, format!("play {} is not a mapping", index));
                continue;
            }

            let import = play
                .get("import_playbook")
                .or_else(|| play.get("ansible.builtin.import_playbook"));
            if let Some(import) = import {
                match import.as_str().and_then(|p| resolve_relative(&scope.dir, p)) {
                    Some(target) => {
                        let target = NodeRef::new("Playbook").with("path", target);
                        self.out.relate(&playbook, "INCLUDES", &target);
                    }
                    None => self.skip(play, "import_playbook target cannot be resolved"),
                }
                continue;
            }

            let name = play
                .get("name")
                .and_then(SyntaxNode::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("<unnamed play {}>", index));
            let hosts = play
                .get("hosts")
                .map(|h| h.as_str_list().join(","))
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| "all".to_string());

            let play_ref = self.out.entity(
                EntityRecord::keyed("Play", [("playbook_path", path.as_str())])
                    .with("order", index)
                    .with("name", name)
                    .with("hosts", hosts)
                    .with("become", play.get("become").and_then(SyntaxNode::as_bool).unwrap_or(false))
                    .with(
                        "gather_facts",
                        play.get("gather_facts").and_then(SyntaxNode::as_bool).unwrap_or(true),
                    ),
            );
            self.out
                .relate(&playbook, "HAS_PLAY", &play_ref)
                .properties
                .insert("play_index".into(), index.into());
            self.out.relate(&play_ref, "IN_FILE", &self.file);

            if let Some(vars) = play.get("vars") {
                self.define_vars(&play_ref, vars, "play");
            }

            if let Some(files) = play.get("vars_files") {
                for entry in files.as_str_list() {
                    match resolve_relative(&scope.dir, &entry) {
                        Some(target) => {
                            let vars_file = NodeRef::new("VarsFile").with("path", target);
                            self.out.relate(&play_ref, "LOADS_VARS", &vars_file);
                        }
                        None => self.skip(files, "vars_files entry cannot be resolved"),
                    }
                }
            }

            if let Some(roles) = play.get("roles") {
                for (order, entry) in roles.items().iter().enumerate() {
                    let Some(role_name) = role_entry_name(entry) else {
                        self.skip(entry, "role entry without a name");
                        continue;
                    };
                    let role = self.out.entity(role_record(role_name));
                    let params: serde_json::Map<String, serde_json::Value> = entry
                        .entries()
                        .filter(|(k, _)| *k != "role" && *k != "name")
                        .map(|(k, v)| (k.to_string(), v.to_json()))
                        .collect();
                    let edge = self.out.relate(&play_ref, "USES_ROLE", &role);
                    edge.properties.insert("order".into(), order.into());
                    if !params.is_empty() {
                        edge.properties.insert(
                            "role_params".into(),
                            serde_json::Value::Object(params).to_string().into(),
                        );
                    }
                }
            }

            for section in TASK_SECTIONS {
                if let Some(list) = play.get(section) {
                    self.tasks(&scope, list, section, Some(&play_ref), &mut task_order);
                }
            }

            if let Some(handlers) = play.get("handlers") {
                self.handlers(&scope, handlers, Some(&playbook));
            }
        }
    }

    fn define_vars(&mut self, definer: &NodeRef, vars: &SyntaxNode, scope: &str) {
        let path = self.path().to_string();
        for (name, value) in vars.entries() {
            let mut record = EntityRecord::keyed(
                "Variable",
                [("name", name), ("scope", scope), ("file_path", path.as_str())],
            );
            if let Some(text) = value_text(value) {
                record = record.with("value", truncate_chars(&text, MAX_VARIABLE_VALUE_LEN));
            }
            let variable = self.out.entity(record);
            self.out.relate(definer, "DEFINES_VAR", &variable);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tasks and handlers
    // ─────────────────────────────────────────────────────────────────────────

    fn tasks(
        &mut self,
        scope: &TaskScope,
        list: &SyntaxNode,
        section: &str,
        play: Option<&NodeRef>,
        order: &mut usize,
    ) {
        if !list.is_sequence() {
            self.skip(list, format!("{} is not a list", section));
            return;
        }

        for item in list.items() {
            if !item.is_mapping() {
                self.skip(item, "task entry is not a mapping");
                continue;
            }

            if BLOCK_SECTIONS.iter().any(|k| item.contains_key(k)) {
                for key in BLOCK_SECTIONS {
                    if let Some(inner) = item.get(key) {
                        self.tasks(scope, inner, section, play, order);
                    }
                }
                continue;
            }

            let index = *order;
            *order += 1;
            self.task(scope, item, section, play, index);
        }
    }

    fn task(&mut self, scope: &TaskScope, item: &SyntaxNode, section: &str, play: Option<&NodeRef>, index: usize) {
        let module_entry = item.entries().find(|(k, _)| !TASK_KEYWORDS.contains(k));
        let module = module_entry.map(|(k, _)| k).unwrap_or("unknown");
        let args = module_entry.and_then(|(_, v)| value_text(v));
        let name = item
            .get("name")
            .and_then(SyntaxNode::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("<unnamed task {}>", index));
        let register = item.get("register").and_then(SyntaxNode::as_str);
        let loop_value = ["loop", "with_items", "with_dict"]
            .iter()
            .find_map(|k| item.get(k))
            .and_then(value_text);

        let task = self.out.entity(
            EntityRecord::keyed("Task", [("file_path", scope.file_path.as_str())])
                .with("order", index)
                .with("name", name)
                .with("module", module)
                .with("section", section)
                .with_opt("args", args)
                .with_opt("when", item.get("when").and_then(value_text))
                .with_opt("loop", loop_value)
                .with_opt("register", register)
                .with_opt("become", item.get("become").and_then(SyntaxNode::as_bool)),
        );
        self.out.relate(&task, "IN_FILE", &self.file);
        if let Some(play) = play {
            self.out
                .relate(play, "HAS_TASK", &task)
                .properties
                .insert("task_index".into(), index.into());
        }

        self.notify(scope, &task, item);

        if let Some(register) = register {
            let variable = self.out.entity(EntityRecord::keyed(
                "Variable",
                [("name", register), ("scope", "play"), ("file_path", scope.file_path.as_str())],
            ));
            self.out.relate(&task, "DEFINES_VAR", &variable);
        }

        let Some((_, args)) = module_entry else { return };
        let short = module.rsplit('.').next().unwrap_or(module);
        match short {
            "template" | "copy" => {
                let src = args
                    .get("src")
                    .and_then(SyntaxNode::as_str)
                    .map(str::to_string)
                    .or_else(|| free_form_arg(args.as_str()?, "src"));
                if let Some(src) = src.filter(|s| s.ends_with(".j2")) {
                    match self.template_path(scope, &src) {
                        Some(path) => {
                            let template = NodeRef::new("Template").with("path", path);
                            self.out
                                .relate(&task, "USES_TEMPLATE", &template)
                                .properties
                                .insert("parameter_name".into(), "src".into());
                        }
                        None => self.skip(item, "template src cannot be resolved"),
                    }
                }
            }
            "include_tasks" | "import_tasks" => {
                let target = args
                    .as_str()
                    .or_else(|| args.get("file").and_then(SyntaxNode::as_str))
                    .and_then(|f| resolve_relative(&scope.dir, f));
                match target {
                    Some(path) => {
                        let file = NodeRef::new("File").with("path", path);
                        self.out.relate(&task, "INCLUDES", &file);
                    }
                    None => self.skip(item, format!("{} target cannot be resolved", short)),
                }
            }
            "include_role" | "import_role" => {
                if let Some(role_name) = args.get("name").and_then(SyntaxNode::as_str) {
                    let role = self.out.entity(role_record(role_name));
                    self.out.relate(&task, "USES_ROLE", &role);
                }
            }
            _ => {}
        }
    }

    fn notify(&mut self, scope: &TaskScope, from: &NodeRef, item: &SyntaxNode) {
        let Some(notify) = item.get("notify") else { return };
        for handler_name in notify.as_str_list() {
            let handler = NodeRef::new("Handler")
                .with("file_path", scope.handlers_file.as_str())
                .with("name", handler_name.as_str());
            self.out
                .relate(from, "NOTIFIES", &handler)
                .properties
                .insert("notification_name".into(), handler_name.into());
        }
    }

    fn handlers(&mut self, scope: &TaskScope, list: &SyntaxNode, owner: Option<&NodeRef>) {
        for item in list.items() {
            let Some(name) = item.get("name").and_then(SyntaxNode::as_str) else {
                self.skip(item, "handler without a name");
                continue;
            };
            let module_entry = item.entries().find(|(k, _)| !TASK_KEYWORDS.contains(k));
            let handler = self.out.entity(
                EntityRecord::keyed(
                    "Handler",
                    [("file_path", scope.file_path.as_str()), ("name", name)],
                )
                .with_opt("module", module_entry.map(|(k, _)| k))
                .with_opt("args", module_entry.and_then(|(_, v)| value_text(v))),
            );
            self.out.relate(&handler, "IN_FILE", &self.file);
            if let Some(owner) = owner {
                self.out.relate(owner, "HAS_HANDLER", &handler);
            }
            self.notify(scope, &handler, item);
        }
    }

    fn template_path(&self, scope: &TaskScope, src: &str) -> Option<String> {
        if src.contains('/') {
            return resolve_relative(&scope.dir, src);
        }
        match &scope.role_root {
            Some(root) => resolve_relative(root, &format!("templates/{}", src)),
            None => resolve_relative(&scope.dir, &format!("templates/{}", src)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    fn task_file(&mut self, doc: &SyntaxNode, handlers: bool) {
        let path = self.path().to_string();
        let role = role_of(&path);
        let scope = TaskScope {
            file_path: path.clone(),
            dir: self.source.dir().to_string(),
            handlers_file: role
                .as_ref()
                .map(|r| format!("{}/handlers/main.yml", r.root))
                .unwrap_or_else(|| path.clone()),
            role_root: role.as_ref().map(|r| r.root.clone()),
        };

        if handlers {
            self.handlers(&scope, doc, None);
        } else {
            let section = if role.is_some() { "role" } else { "tasks" };
            self.tasks(&scope, doc, section, None, &mut 0);
        }

        if let Some(role) = role {
            let role_ref = self.out.entity(role_record(&role.name));
            self.out.relate(&role_ref, "INCLUDES", &self.file);
        }
    }

    fn role_meta(&mut self, doc: &SyntaxNode) {
        let Some(role) = role_of(self.path()) else { return };
        let mut record = role_record(&role.name);
        if let Some(ns) = doc
            .get("galaxy_info")
            .and_then(|g| g.get("namespace"))
            .and_then(SyntaxNode::as_str)
        {
            record = record.with("namespace", ns);
        }
        let role_ref = self.out.entity(record);

        let Some(deps) = doc.get("dependencies") else { return };
        for dep in deps.items() {
            match role_entry_name(dep).or_else(|| dep.get("src").and_then(SyntaxNode::as_str)) {
                Some(name) => {
                    let dep_ref = self.out.entity(role_record(name));
                    self.out.relate(&role_ref, "DEPENDS_ON", &dep_ref);
                }
                None => self.skip(dep, "role dependency without a name"),
            }
        }
    }

    fn requirements(&mut self, doc: &SyntaxNode) {
        let entries = if doc.is_sequence() {
            doc.items()
        } else {
            doc.get("roles").map(SyntaxNode::items).unwrap_or(&[])
        };

        for entry in entries {
            let src = entry.get("src").and_then(SyntaxNode::as_str);
            let name = entry
                .as_str()
                .or_else(|| entry.get("name").and_then(SyntaxNode::as_str))
                .map(str::to_string)
                .or_else(|| src.map(name_from_src));
            let Some(name) = name.filter(|n| !n.is_empty()) else {
                self.skip(entry, "requirement without a name");
                continue;
            };

            let record = role_record(&name)
                .with("source", src.unwrap_or("galaxy"))
                .with_opt("version", entry.get("version").and_then(value_text));
            let role = self.out.entity(record);
            self.out.relate(&role, "IN_FILE", &self.file);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Variables and templates
    // ─────────────────────────────────────────────────────────────────────────

    fn vars_file(&mut self, doc: &SyntaxNode) {
        let scope = vars_scope(self.path());
        let vars_file = self.out.entity(
            EntityRecord::keyed("VarsFile", [("path", self.path())]).with("scope", scope),
        );
        self.out.relate(&vars_file, "IN_FILE", &self.file);
        self.define_vars(&vars_file, doc, scope);
    }

    fn template(&mut self, parse: &ParseResult) {
        let path = self.path().to_string();
        let variables = template_variables(&parse.root);
        let template = self.out.entity(
            EntityRecord::keyed("Template", [("path", path.as_str())])
                .with("variables_used", variables.iter().cloned().collect::<Vec<_>>()),
        );
        self.out.relate(&template, "IN_FILE", &self.file);

        for name in &variables {
            let variable = self.out.entity(EntityRecord::keyed(
                "Variable",
                [("name", name.as_str()), ("scope", "template"), ("file_path", path.as_str())],
            ));
            self.out.relate(&template, "USES_VAR", &variable);
        }
    }
}

/// Role name implied by a requirement `src` (repository URL or galaxy name)
fn name_from_src(src: &str) -> String {
    let last = src.trim_end_matches('/').rsplit('/').next().unwrap_or(src);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// `key=value` from a free-form module argument string
fn free_form_arg(args: &str, key: &str) -> Option<String> {
    args.split_whitespace()
        .find_map(|kv| kv.strip_prefix(key)?.strip_prefix('='))
        .map(|v| v.trim_matches(|c| c == '"' || c == '\'').to_string())
}

fn output_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_]\w*)\s*(\()?").expect("static regex"))
}

fn for_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^for\s+([\w\s,]+?)\s+in\s+([A-Za-z_]\w*)").expect("static regex")
    })
}

fn condition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:if|elif)\s+(?:not\s+)?([A-Za-z_]\w*)").expect("static regex")
    })
}

/// Root variable names referenced by a template's tags.
///
/// Loop targets declared by `for` statements are not variables of the
/// template; neither are function calls or Jinja keywords.
pub fn template_variables(root: &SyntaxNode) -> BTreeSet<String> {
    let mut used = BTreeSet::new();
    let mut loop_vars = BTreeSet::new();

    for tag in &root.children {
        let Some(body) = tag.value.as_deref() else { continue };
        match tag.kind.as_str() {
            "output" => {
                if let Some(caps) = output_re().captures(body) {
                    if caps.get(2).is_none() {
                        used.insert(caps[1].to_string());
                    }
                }
            }
            "statement" => {
                if let Some(caps) = for_re().captures(body) {
                    for target in caps[1].split(',') {
                        loop_vars.insert(target.trim().to_string());
                    }
                    used.insert(caps[2].to_string());
                } else if let Some(caps) = condition_re().captures(body) {
                    used.insert(caps[1].to_string());
                }
            }
            _ => {}
        }
    }

    used.retain(|v| !loop_vars.contains(v) && !JINJA_KEYWORDS.contains(&v.as_str()));
    used
}
