//! Tool implementations over a graph store

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use graphwright_core::limits::MAX_RESULTS_DEFAULT;
use graphwright_core::{NodeKey, QueryGuardrail, Scalar};
use graphwright_storage::{GraphStore, NodeFilter, QueryRunner, StoredEdge, StoredNode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ToolError;

/// Tool call request
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Tool call response
#[derive(Debug, Serialize)]
pub struct ToolCallResponse {
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "isError")]
    pub is_error: Option<bool>,
}

/// Content block for responses
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolCallResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: content.into() }],
            is_error: None,
        }
    }

    pub fn json<T: Serialize>(data: &T) -> Self {
        match serde_json::to_string_pretty(data) {
            Ok(json) => Self::text(json),
            Err(e) => Self::error(format!("dependency: JSON serialization error: {}", e)),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: message.into() }],
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Concatenated text of all content blocks
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<ToolError> for ToolCallResponse {
    fn from(e: ToolError) -> Self {
        Self::error(e.to_string())
    }
}

const DEPENDENCY_RELS: &[&str] = &[
    "INCLUDES",
    "IMPORTS",
    "FROM_IMPORTS",
    "LOADS_VARS",
    "USES_TEMPLATE",
    "USES_ROLE",
    "DEPENDS_ON",
];
const DEFINITION_RELS: &[&str] = &["DEFINES_VAR", "DEFINES_CLASS", "DEFINES_FUNCTION"];
const USAGE_RELS: &[&str] = &[
    "USES_VAR",
    "INHERITS",
    "HAS_METHOD",
    "USES_ROLE",
    "USES_TEMPLATE",
    "NOTIFIES",
    "IMPORTS",
    "FROM_IMPORTS",
    "DEPENDS_ON",
    "INCLUDES",
];
const TOP_LEVEL_TYPES: &[&str] = &[
    "Playbook", "Play", "Module", "Class", "Function", "Template", "VarsFile", "Inventory", "Handler",
];

/// Executes tools against the store. Arguments arrive already parsed and
/// sanitized; the caller owns rate limiting and path checks.
pub struct ToolHandler {
    store: Arc<dyn GraphStore>,
    guardrail: QueryGuardrail,
}

impl ToolHandler {
    pub fn new(store: Arc<dyn GraphStore>, guardrail: QueryGuardrail) -> Self {
        Self { store, guardrail }
    }

    pub fn guardrail(&self) -> &QueryGuardrail {
        &self.guardrail
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tools
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn find_dependencies(&self, path: &str, repo: Option<&str>) -> Result<Value, ToolError> {
        let files = self.files(path, repo).await?;
        let mut dependencies = BTreeMap::new();
        let mut dependents = BTreeMap::new();

        for file in &files {
            let members = self.members(file).await?;
            let member_keys: BTreeSet<String> = members.iter().map(NodeKey::id).collect();

            for key in &members {
                for (edge, _) in self.store.outgoing(key, DEPENDENCY_RELS).await? {
                    if in_scope(&edge, repo) && !member_keys.contains(&edge.to.id()) {
                        dependencies.insert(edge_id(&edge), edge_json(&edge));
                    }
                }
                for (edge, _) in self.store.incoming(key, DEPENDENCY_RELS).await? {
                    if in_scope(&edge, repo) && !member_keys.contains(&edge.from.id()) {
                        dependents.insert(edge_id(&edge), edge_json(&edge));
                    }
                }
            }
        }

        Ok(json!({
            "path": path,
            "found": !files.is_empty(),
            "repositories": repositories(&files),
            "dependencies": dependencies.into_values().collect::<Vec<_>>(),
            "dependents": dependents.into_values().collect::<Vec<_>>(),
        }))
    }

    pub async fn trace_entity(
        &self,
        name: &str,
        node_type: Option<&str>,
        repo: Option<&str>,
    ) -> Result<Value, ToolError> {
        let mut filter = NodeFilter::default()
            .with_property("name", Scalar::from(name))
            .limit(MAX_RESULTS_DEFAULT);
        filter.node_type = node_type.map(str::to_string);
        if let Some(repo) = repo {
            filter = filter.in_repository(repo).with_shared();
        }

        let mut entities = Vec::new();
        for node in self.store.find_nodes(&filter).await? {
            let mut definitions = Vec::new();
            for (edge, source) in self.store.incoming(&node.key, DEFINITION_RELS).await? {
                if in_scope(&edge, repo) {
                    definitions.push(reference_json(&edge, &source));
                }
            }
            let mut usages = Vec::new();
            for (edge, source) in self.store.incoming(&node.key, USAGE_RELS).await? {
                if in_scope(&edge, repo) {
                    usages.push(reference_json(&edge, &source));
                }
            }
            entities.push(json!({
                "entity": node_json(&node),
                "definitions": definitions,
                "usages": usages,
            }));
        }

        Ok(json!({ "name": name, "entities": entities }))
    }

    pub async fn get_component_usage(&self, name: &str, repo: Option<&str>) -> Result<Value, ToolError> {
        let filter = NodeFilter::of_type("Role").with_property("name", Scalar::from(name));
        let Some(role) = self.store.find_nodes(&filter).await?.into_iter().next() else {
            return Ok(json!({ "name": name, "found": false, "usages": [], "dependencies": [], "dependents": [] }));
        };

        let mut usages = Vec::new();
        let mut repos = BTreeSet::new();
        for (edge, user) in self.store.incoming(&role.key, &["USES_ROLE"]).await? {
            if !in_scope(&edge, repo) {
                continue;
            }
            repos.insert(edge.repository.clone());
            usages.push(json!({
                "type": user.node_type(),
                "repository": edge.repository,
                "name": user.get_str("name"),
                "playbook_path": user.get_str("playbook_path").or_else(|| user.get_str("file_path")),
                "order": user.get("order").and_then(Scalar::as_i64),
            }));
        }
        usages.sort_by_key(|u| {
            (
                u["repository"].as_str().unwrap_or_default().to_string(),
                u["playbook_path"].as_str().unwrap_or_default().to_string(),
                u["order"].as_i64().unwrap_or_default(),
            )
        });

        let mut dependencies = Vec::new();
        for (edge, dep) in self.store.outgoing(&role.key, &["DEPENDS_ON"]).await? {
            if in_scope(&edge, repo) {
                dependencies.push(dep.get_str("name").unwrap_or_default().to_string());
            }
        }
        let mut dependents = Vec::new();
        for (edge, dep) in self.store.incoming(&role.key, &["DEPENDS_ON"]).await? {
            if in_scope(&edge, repo) {
                dependents.push(dep.get_str("name").unwrap_or_default().to_string());
            }
        }
        dependencies.sort();
        dependencies.dedup();
        dependents.sort();
        dependents.dedup();

        Ok(json!({
            "name": name,
            "found": true,
            "role": node_json(&role),
            "repositories": repos,
            "usages": usages,
            "dependencies": dependencies,
            "dependents": dependents,
        }))
    }

    pub async fn analyze_file(&self, path: &str, repo: Option<&str>) -> Result<Value, ToolError> {
        let mut out = Vec::new();
        for file in self.files(path, repo).await? {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            let mut items = Vec::new();
            for (_, node) in self.store.incoming(&file.key, &["IN_FILE"]).await? {
                *counts.entry(node.node_type().to_string()).or_default() += 1;
                if is_top_level(&node) {
                    items.push(node);
                }
            }
            items.sort_by_key(position);

            out.push(json!({
                "path": path,
                "repository": file.key.repository,
                "file": node_json(&file),
                "counts": counts,
                "items": items.iter().map(item_json).collect::<Vec<_>>(),
            }));
        }
        Ok(json!({ "path": path, "found": !out.is_empty(), "files": out }))
    }

    pub async fn find_module_usage(&self, module: &str, repo: Option<&str>) -> Result<Value, ToolError> {
        let mut tasks_filter = NodeFilter::of_type("Task");
        if let Some(repo) = repo {
            tasks_filter = tasks_filter.in_repository(repo);
        }
        let suffix = format!(".{}", module);
        let mut tasks: Vec<_> = self
            .store
            .find_nodes(&tasks_filter)
            .await?
            .into_iter()
            .filter(|task| {
                task.get_str("module")
                    .is_some_and(|m| m == module || m.ends_with(&suffix))
            })
            .collect();
        tasks.sort_by(|a, b| {
            (&a.key.repository, a.get_str("file_path"), position(a))
                .cmp(&(&b.key.repository, b.get_str("file_path"), position(b)))
        });
        let truncated = tasks.len() > MAX_RESULTS_DEFAULT;
        tasks.truncate(MAX_RESULTS_DEFAULT);

        let mut modules_filter = NodeFilter::of_type("Module").with_property("name", Scalar::from(module));
        if let Some(repo) = repo {
            modules_filter = modules_filter.in_repository(repo);
        }
        let mut importers = BTreeMap::new();
        for target in self.store.find_nodes(&modules_filter).await? {
            for (edge, importer) in self.store.incoming(&target.key, &["IMPORTS", "FROM_IMPORTS"]).await? {
                let name = importer.get_str("name").unwrap_or_default().to_string();
                importers.insert(
                    (edge.repository.clone(), name.clone(), edge.rel_type.clone()),
                    json!({
                        "repository": edge.repository,
                        "module": name,
                        "path": importer.get_str("path"),
                        "rel_type": edge.rel_type,
                    }),
                );
            }
        }

        Ok(json!({
            "module": module,
            "tasks": tasks.iter().map(|t| json!({
                "repository": t.key.repository,
                "file_path": t.get_str("file_path"),
                "order": t.get("order").and_then(Scalar::as_i64),
                "name": t.get_str("name"),
                "module": t.get_str("module"),
            })).collect::<Vec<_>>(),
            "importers": importers.into_values().collect::<Vec<_>>(),
            "truncated": truncated,
        }))
    }

    pub async fn get_hierarchy(&self, path: &str, repo: Option<&str>) -> Result<Value, ToolError> {
        let mut out = Vec::new();
        for file in self.files(path, repo).await? {
            let mut members: Vec<StoredNode> = self
                .store
                .incoming(&file.key, &["IN_FILE"])
                .await?
                .into_iter()
                .map(|(_, node)| node)
                .collect();
            members.sort_by_key(position);

            let mut tree = Vec::new();
            for playbook in members.iter().filter(|n| n.node_type() == "Playbook") {
                tree.push(self.playbook_tree(playbook).await?);
            }
            for module in members.iter().filter(|n| n.node_type() == "Module") {
                tree.push(self.module_tree(module).await?);
            }
            if tree.is_empty() {
                // Task and handler files have no container node
                for node in members
                    .iter()
                    .filter(|n| matches!(n.node_type(), "Task" | "Handler"))
                {
                    tree.push(item_json(node));
                }
            }

            out.push(json!({
                "path": path,
                "repository": file.key.repository,
                "hierarchy": tree,
            }));
        }
        Ok(json!({ "path": path, "found": !out.is_empty(), "files": out }))
    }

    pub async fn find_template_usage(&self, path: &str, repo: Option<&str>) -> Result<Value, ToolError> {
        let mut filter = NodeFilter::of_type("Template").with_property("path", Scalar::from(path));
        if let Some(repo) = repo {
            filter = filter.in_repository(repo);
        }

        let mut out = Vec::new();
        for template in self.store.find_nodes(&filter).await? {
            let mut tasks = Vec::new();
            for (edge, task) in self.store.incoming(&template.key, &["USES_TEMPLATE"]).await? {
                if in_scope(&edge, repo) {
                    tasks.push(item_json(&task));
                }
            }

            let mut names: BTreeSet<String> = template
                .get("variables_used")
                .and_then(Scalar::as_list)
                .map(|l| l.iter().cloned().collect())
                .unwrap_or_default();
            for (_, var) in self.store.outgoing(&template.key, &["USES_VAR"]).await? {
                if let Some(name) = var.get_str("name") {
                    names.insert(name.to_string());
                }
            }

            let mut variables = Vec::new();
            for name in &names {
                let mut defs = NodeFilter::of_type("Variable").with_property("name", Scalar::from(name.as_str()));
                if let Some(repo) = &template.key.repository {
                    defs = defs.in_repository(repo.as_str());
                }
                let defined_in: Vec<_> = self
                    .store
                    .find_nodes(&defs)
                    .await?
                    .iter()
                    .filter(|v| v.get_str("scope") != Some("template"))
                    .map(|v| json!({ "scope": v.get_str("scope"), "file_path": v.get_str("file_path") }))
                    .collect();
                variables.push(json!({ "name": name, "defined_in": defined_in }));
            }

            out.push(json!({
                "repository": template.key.repository,
                "tasks": tasks,
                "variables": variables,
            }));
        }
        Ok(json!({ "path": path, "found": !out.is_empty(), "templates": out }))
    }

    pub async fn run_query(&self, query: &str, limit: usize, repo: Option<&str>) -> Result<Value, ToolError> {
        let result = QueryRunner::new(self.store.as_ref(), &self.guardrail)
            .in_repository(repo.map(str::to_string))
            .run(query, Some(limit))
            .await?;
        serde_json::to_value(result).map_err(|e| ToolError::Dependency(e.to_string()))
    }

    pub async fn list_repositories(&self) -> Result<Value, ToolError> {
        let repos = self.store.list_repositories().await?;
        Ok(json!({ "repositories": repos }))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    async fn files(&self, path: &str, repo: Option<&str>) -> Result<Vec<StoredNode>, ToolError> {
        let mut filter = NodeFilter::of_type("File").with_property("path", Scalar::from(path));
        if let Some(repo) = repo {
            filter = filter.in_repository(repo);
        }
        Ok(self.store.find_nodes(&filter).await?)
    }

    /// The file itself plus every node IN_FILE of it
    async fn members(&self, file: &StoredNode) -> Result<Vec<NodeKey>, ToolError> {
        let mut keys = vec![file.key.clone()];
        for (_, node) in self.store.incoming(&file.key, &["IN_FILE"]).await? {
            keys.push(node.key);
        }
        Ok(keys)
    }

    async fn ordered_children(&self, key: &NodeKey, rel_type: &str) -> Result<Vec<StoredNode>, ToolError> {
        let mut children: Vec<StoredNode> = self
            .store
            .outgoing(key, &[rel_type])
            .await?
            .into_iter()
            .map(|(_, node)| node)
            .collect();
        children.sort_by_key(position);
        Ok(children)
    }

    async fn playbook_tree(&self, playbook: &StoredNode) -> Result<Value, ToolError> {
        let mut plays = Vec::new();
        for play in self.ordered_children(&playbook.key, "HAS_PLAY").await? {
            let tasks = self.ordered_children(&play.key, "HAS_TASK").await?;
            let handlers = self.ordered_children(&play.key, "HAS_HANDLER").await?;
            let roles = self.ordered_children(&play.key, "USES_ROLE").await?;
            plays.push(json!({
                "name": play.get_str("name"),
                "order": play.get("order").and_then(Scalar::as_i64),
                "hosts": play.get_str("hosts"),
                "roles": roles.iter().filter_map(|r| r.get_str("name")).collect::<Vec<_>>(),
                "tasks": tasks.iter().map(item_json).collect::<Vec<_>>(),
                "handlers": handlers.iter().map(item_json).collect::<Vec<_>>(),
            }));
        }
        let handlers = self.ordered_children(&playbook.key, "HAS_HANDLER").await?;
        Ok(json!({
            "type": "Playbook",
            "path": playbook.get_str("path"),
            "plays": plays,
            "handlers": handlers.iter().map(item_json).collect::<Vec<_>>(),
        }))
    }

    async fn module_tree(&self, module: &StoredNode) -> Result<Value, ToolError> {
        let mut classes = Vec::new();
        for class in self.ordered_children(&module.key, "DEFINES_CLASS").await? {
            let methods = self.ordered_children(&class.key, "HAS_METHOD").await?;
            classes.push(json!({
                "name": class.get_str("name"),
                "line": class.get("line").and_then(Scalar::as_i64),
                "bases": class.get("bases").map(Scalar::to_json),
                "methods": methods.iter().map(item_json).collect::<Vec<_>>(),
            }));
        }
        let functions = self.ordered_children(&module.key, "DEFINES_FUNCTION").await?;
        Ok(json!({
            "type": "Module",
            "name": module.get_str("name"),
            "classes": classes,
            "functions": functions
                .iter()
                .filter(|f| f.get("is_method").and_then(Scalar::as_bool) != Some(true))
                .map(item_json)
                .collect::<Vec<_>>(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering helpers
// ─────────────────────────────────────────────────────────────────────────────

fn in_scope(edge: &StoredEdge, repo: Option<&str>) -> bool {
    repo.map_or(true, |r| edge.repository == r)
}

fn is_top_level(node: &StoredNode) -> bool {
    if !TOP_LEVEL_TYPES.contains(&node.node_type()) {
        return false;
    }
    match node.node_type() {
        "Function" => node.get("is_method").and_then(Scalar::as_bool) != Some(true),
        "Class" => node.get_str("name").is_some_and(|n| !n.contains('.')),
        _ => true,
    }
}

/// Source position used for ordering: `order`, then `line`
fn position(node: &StoredNode) -> i64 {
    node.get("order")
        .or_else(|| node.get("line"))
        .and_then(Scalar::as_i64)
        .unwrap_or(i64::MAX)
}

fn repositories(nodes: &[StoredNode]) -> Vec<String> {
    let set: BTreeSet<String> = nodes.iter().filter_map(|n| n.key.repository.clone()).collect();
    set.into_iter().collect()
}

fn edge_id(edge: &StoredEdge) -> String {
    format!("{}|{}|{}|{}", edge.repository, edge.from.id(), edge.rel_type, edge.to.id())
}

fn key_json(key: &NodeKey) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("type".into(), Value::String(key.node_type.clone()));
    if let Some(repo) = &key.repository {
        obj.insert("repository".into(), Value::String(repo.clone()));
    }
    for (name, value) in &key.values {
        obj.insert(name.clone(), Value::String(value.clone()));
    }
    Value::Object(obj)
}

fn node_json(node: &StoredNode) -> Value {
    let properties: serde_json::Map<String, Value> = node
        .properties
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    json!({
        "type": node.node_type(),
        "repository": node.key.repository,
        "properties": properties,
    })
}

fn edge_json(edge: &StoredEdge) -> Value {
    json!({
        "rel_type": edge.rel_type,
        "repository": edge.repository,
        "from": key_json(&edge.from),
        "to": key_json(&edge.to),
    })
}

fn reference_json(edge: &StoredEdge, source: &StoredNode) -> Value {
    json!({
        "rel_type": edge.rel_type,
        "repository": edge.repository,
        "source": key_json(&source.key),
        "name": source.get_str("name"),
    })
}

/// Compact view of a structural node
fn item_json(node: &StoredNode) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("type".into(), Value::String(node.node_type().to_string()));
    for field in ["name", "path", "order", "line", "module", "file_path", "hosts", "scope", "kind"] {
        if let Some(value) = node.get(field) {
            obj.insert(field.to_string(), value.to_json());
        }
    }
    Value::Object(obj)
}
