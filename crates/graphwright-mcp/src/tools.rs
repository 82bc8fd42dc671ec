//! Tool catalog and typed tool arguments

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ToolError;

/// Tool definition as advertised by `tools/list`
#[derive(Debug, Serialize)]
pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn repo_id_schema() -> serde_json::Value {
    json!({"type": "string", "description": "Restrict to one repository (default: all repositories)"})
}

/// Get all available tools
pub fn get_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "find_dependencies",
            description: "List what a file depends on (includes, imports, loaded vars, templates, roles) and what depends on it.",
            input_schema: json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": {"type": "string", "description": "File path relative to the repository root"},
                    "repo_id": repo_id_schema()
                }
            }),
        },
        Tool {
            name: "trace_entity",
            description: "Find where a named entity (variable, class, function, role, handler, module) is defined and used.",
            input_schema: json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": {"type": "string", "description": "Entity name"},
                    "type": {"type": "string", "description": "Node type filter, e.g. Variable or Class"},
                    "repo_id": repo_id_schema()
                }
            }),
        },
        Tool {
            name: "get_component_usage",
            description: "Show the plays and tasks that use a shared role, with playbook paths, and the role's dependencies.",
            input_schema: json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": {"type": "string", "description": "Role name"},
                    "repo_id": repo_id_schema()
                }
            }),
        },
        Tool {
            name: "analyze_file",
            description: "Structural summary of a file: node counts by type and its top-level items.",
            input_schema: json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": {"type": "string", "description": "File path relative to the repository root"},
                    "repo_id": repo_id_schema()
                }
            }),
        },
        Tool {
            name: "find_module_usage",
            description: "Find tasks that invoke an Ansible module, or Python modules that import a module.",
            input_schema: json!({
                "type": "object",
                "required": ["module"],
                "properties": {
                    "module": {"type": "string", "description": "Module name, e.g. template or ansible.builtin.copy or pkg.util"},
                    "repo_id": repo_id_schema()
                }
            }),
        },
        Tool {
            name: "get_hierarchy",
            description: "Ordered structure of a file: playbook, plays, tasks and handlers, or module, classes and methods.",
            input_schema: json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": {"type": "string", "description": "File path relative to the repository root"},
                    "repo_id": repo_id_schema()
                }
            }),
        },
        Tool {
            name: "find_template_usage",
            description: "Tasks that render a template, the variables the template uses and where those variables are defined.",
            input_schema: json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": {"type": "string", "description": "Template path relative to the repository root"},
                    "repo_id": repo_id_schema()
                }
            }),
        },
        Tool {
            name: "run_query",
            description: "Run a read-only pattern query: MATCH (a:Type {prop: \"v\"})-[:REL]->(b:Type) [WHERE a.prop = \"v\"] RETURN a.prop, b.prop [LIMIT n].",
            input_schema: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string", "description": "Pattern query"},
                    "limit": {"type": "number", "description": "Maximum rows (default: 100, max: 1000)"},
                    "repo_id": repo_id_schema()
                }
            }),
        },
        Tool {
            name: "list_repositories",
            description: "List built repositories with node and edge counts by type.",
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathArgs {
    pub path: String,
    #[serde(default)]
    pub repo_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceArgs {
    pub name: String,
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub repo_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentArgs {
    pub name: String,
    #[serde(default)]
    pub repo_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleArgs {
    pub module: String,
    #[serde(default)]
    pub repo_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryArgs {
    pub query: String,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub repo_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

/// A tool call with its arguments parsed
#[derive(Debug, Clone)]
pub enum ToolCall {
    FindDependencies(PathArgs),
    TraceEntity(TraceArgs),
    GetComponentUsage(ComponentArgs),
    AnalyzeFile(PathArgs),
    FindModuleUsage(ModuleArgs),
    GetHierarchy(PathArgs),
    FindTemplateUsage(PathArgs),
    RunQuery(QueryArgs),
    ListRepositories,
}

impl ToolCall {
    /// Parse `arguments` for the tool called `name`
    pub fn parse(name: &str, arguments: serde_json::Value) -> Result<Self, ToolError> {
        Ok(match name {
            "find_dependencies" => Self::FindDependencies(args(arguments)?),
            "trace_entity" => Self::TraceEntity(args(arguments)?),
            "get_component_usage" => Self::GetComponentUsage(args(arguments)?),
            "analyze_file" => Self::AnalyzeFile(args(arguments)?),
            "find_module_usage" => Self::FindModuleUsage(args(arguments)?),
            "get_hierarchy" => Self::GetHierarchy(args(arguments)?),
            "find_template_usage" => Self::FindTemplateUsage(args(arguments)?),
            "run_query" => Self::RunQuery(args(arguments)?),
            "list_repositories" => {
                let NoArgs {} = args(arguments)?;
                Self::ListRepositories
            }
            _ => return Err(ToolError::InvalidArguments(format!("unknown tool '{}'", name))),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FindDependencies(_) => "find_dependencies",
            Self::TraceEntity(_) => "trace_entity",
            Self::GetComponentUsage(_) => "get_component_usage",
            Self::AnalyzeFile(_) => "analyze_file",
            Self::FindModuleUsage(_) => "find_module_usage",
            Self::GetHierarchy(_) => "get_hierarchy",
            Self::FindTemplateUsage(_) => "find_template_usage",
            Self::RunQuery(_) => "run_query",
            Self::ListRepositories => "list_repositories",
        }
    }

    /// Repository the call is scoped to, if any
    pub fn repo_id(&self) -> Option<&str> {
        match self {
            Self::FindDependencies(a) | Self::AnalyzeFile(a) | Self::GetHierarchy(a) | Self::FindTemplateUsage(a) => {
                a.repo_id.as_deref()
            }
            Self::TraceEntity(a) => a.repo_id.as_deref(),
            Self::GetComponentUsage(a) => a.repo_id.as_deref(),
            Self::FindModuleUsage(a) => a.repo_id.as_deref(),
            Self::RunQuery(a) => a.repo_id.as_deref(),
            Self::ListRepositories => None,
        }
    }
}

/// Missing or null arguments are treated as an empty object
fn args<T: DeserializeOwned>(arguments: serde_json::Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_are_unique_and_parseable() {
        let tools = get_tools();
        assert_eq!(tools.len(), 9);
        let mut names: Vec<_> = tools.iter().map(|t| t.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 9);

        for tool in &tools {
            let required = tool.input_schema["required"].as_array().cloned().unwrap_or_default();
            let mut arguments = serde_json::Map::new();
            for field in required {
                arguments.insert(field.as_str().unwrap().to_string(), json!("x"));
            }
            let call = ToolCall::parse(tool.name, serde_json::Value::Object(arguments)).unwrap();
            assert_eq!(call.name(), tool.name);
        }
    }

    #[test]
    fn test_parse_reads_optional_fields() {
        let call = ToolCall::parse("trace_entity", json!({"name": "http_port", "type": "Variable", "repo_id": "web"})).unwrap();
        let ToolCall::TraceEntity(args) = &call else {
            panic!("expected trace_entity");
        };
        assert_eq!(args.node_type.as_deref(), Some("Variable"));
        assert_eq!(call.repo_id(), Some("web"));
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        let err = ToolCall::parse("analyze_file", json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = ToolCall::parse("analyze_file", json!({"path": "a.yml", "extra": 1})).unwrap_err();
        assert!(err.to_string().starts_with("invalid_arguments"));

        let err = ToolCall::parse("run_query", json!({"query": 5})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_parse_unknown_tool() {
        let err = ToolCall::parse("drop_everything", json!({})).unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[test]
    fn test_list_repositories_accepts_missing_arguments() {
        assert!(matches!(
            ToolCall::parse("list_repositories", serde_json::Value::Null),
            Ok(ToolCall::ListRepositories)
        ));
    }
}
