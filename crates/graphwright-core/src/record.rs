//! Entity and relationship records emitted by extractors

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Property map attached to nodes and edges
pub type Properties = BTreeMap<String, Scalar>;

/// A property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

/// Kind of a scalar, as declared in schema profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Bool,
    List,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::List => "list",
        };
        f.write_str(s)
    }
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Bool(_) => ScalarKind::Bool,
            Self::Int(_) => ScalarKind::Int,
            Self::Float(_) => ScalarKind::Float,
            Self::String(_) => ScalarKind::String,
            Self::List(_) => ScalarKind::List,
        }
    }

    /// Whether a value of this scalar satisfies a declared kind.
    /// Integers are accepted where floats are declared.
    pub fn conforms_to(&self, kind: ScalarKind) -> bool {
        self.kind() == kind || (kind == ScalarKind::Float && self.kind() == ScalarKind::Int)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// True for values that cannot serve as part of an identity
    pub fn is_blank(&self) -> bool {
        match self {
            Self::String(s) => s.trim().is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Canonical text used when building node keys
    pub fn key_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::List(l) => l.join(","),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(l) => serde_json::Value::from(l.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_text())
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Scalar {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<usize> for Scalar {
    fn from(i: usize) -> Self {
        Self::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<u64> for Scalar {
    fn from(i: u64) -> Self {
        Self::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<String>> for Scalar {
    fn from(l: Vec<String>) -> Self {
        Self::List(l)
    }
}

/// Reference to a node by its unique key, used as a relationship endpoint.
///
/// The repository tag is not part of the reference: the builder adds it
/// for every type that is not shared across repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    pub node_type: String,
    pub key: Vec<(String, Scalar)>,
}

impl NodeRef {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            key: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.key.push((name.into(), value.into()));
        self
    }

    pub fn key_names(&self) -> Vec<String> {
        self.key.iter().map(|(k, _)| k.clone()).collect()
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.node_type)?;
        for (i, (k, v)) in self.key.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", k, v.key_text())?;
        }
        f.write_str(")")
    }
}

/// A typed, keyed fact extracted from a source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub node_type: String,
    pub properties: Properties,
    /// Ordered property names forming the write identity
    pub unique_key: Vec<String>,
}

impl EntityRecord {
    /// Create a record whose identity is the given key properties
    pub fn keyed<I, K, V>(node_type: impl Into<String>, key: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Scalar>,
    {
        let mut properties = Properties::new();
        let mut unique_key = Vec::new();
        for (k, v) in key {
            let k = k.into();
            unique_key.push(k.clone());
            properties.insert(k, v.into());
        }
        Self {
            node_type: node_type.into(),
            properties,
            unique_key,
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_opt<V: Into<Scalar>>(mut self, name: impl Into<String>, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.properties.insert(name.into(), v.into());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.properties.get(name)
    }

    /// Reference to this record, for use as a relationship endpoint
    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            node_type: self.node_type.clone(),
            key: self
                .unique_key
                .iter()
                .filter_map(|k| self.properties.get(k).map(|v| (k.clone(), v.clone())))
                .collect(),
        }
    }
}

/// A typed, directed link between two unique keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub from: NodeRef,
    pub to: NodeRef,
    pub rel_type: String,
    #[serde(default)]
    pub properties: Properties,
}

impl RelationshipRecord {
    pub fn new(from: NodeRef, rel_type: impl Into<String>, to: NodeRef) -> Self {
        Self {
            from,
            to,
            rel_type: rel_type.into(),
            properties: Properties::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Canonical node identity in the store: type, repository tag and key values
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub node_type: String,
    /// `None` for shared types
    pub repository: Option<String>,
    pub values: Vec<(String, String)>,
}

impl NodeKey {
    pub fn new(
        node_type: impl Into<String>,
        repository: Option<String>,
        values: Vec<(String, String)>,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            repository,
            values,
        }
    }

    /// Stable string identity, used as primary key by persistent stores
    pub fn id(&self) -> String {
        self.to_string()
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_shared(&self) -> bool {
        self.repository.is_none()
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node_type)?;
        if let Some(repo) = &self.repository {
            write!(f, "[{}]", repo)?;
        }
        f.write_str("(")?;
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={:?}", k, v)?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_record_sets_identity() {
        let record = EntityRecord::keyed("Task", [("file_path", Scalar::from("site.yml")), ("order", Scalar::from(2i64))])
            .with("name", "install nginx");

        assert_eq!(record.unique_key, vec!["file_path", "order"]);
        assert_eq!(record.get("order"), Some(&Scalar::Int(2)));

        let r = record.node_ref();
        assert_eq!(r.node_type, "Task");
        assert_eq!(r.key_names(), vec!["file_path", "order"]);
    }

    #[test]
    fn test_node_key_display_is_unambiguous() {
        let a = NodeKey::new("File", Some("web".into()), vec![("path".into(), "a,b".into())]);
        let b = NodeKey::new("File", Some("web".into()), vec![("path".into(), "a".into())]);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), "File[web](path=\"a,b\")");

        let role = NodeKey::new("Role", None, vec![("name".into(), "nginx".into())]);
        assert!(role.is_shared());
        assert_eq!(role.id(), "Role(name=\"nginx\")");
    }

    #[test]
    fn test_scalar_untagged_serde() {
        let json = r#"{"a": true, "b": 3, "c": 1.5, "d": "x", "e": ["p", "q"]}"#;
        let props: Properties = serde_json::from_str(json).unwrap();
        assert_eq!(props["a"], Scalar::Bool(true));
        assert_eq!(props["b"], Scalar::Int(3));
        assert_eq!(props["c"], Scalar::Float(1.5));
        assert_eq!(props["d"], Scalar::String("x".into()));
        assert_eq!(props["e"], Scalar::List(vec!["p".into(), "q".into()]));
    }

    #[test]
    fn test_int_conforms_to_float() {
        assert!(Scalar::Int(1).conforms_to(ScalarKind::Float));
        assert!(!Scalar::Float(1.0).conforms_to(ScalarKind::Int));
        assert!(Scalar::String(" ".into()).is_blank());
    }
}
