//! Declarative graph schema and record validation
//!
//! A schema is loaded from one or more YAML profiles, one per repository
//! flavor, and merged into a single read-only registry. The same registry
//! validates records at write time and type names at query time.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::context::RepoType;
use crate::error::SchemaError;
use crate::record::{EntityRecord, NodeKey, NodeRef, RelationshipRecord, Scalar, ScalarKind};
use crate::{Error, Result};

const ANSIBLE_PROFILE: &str = include_str!("profiles/ansible.yaml");
const PYTHON_PROFILE: &str = include_str!("profiles/python.yaml");
const GENERIC_PROFILE: &str = include_str!("profiles/generic.yaml");

/// Endpoint wildcard in relationship pairs
pub const ANY_TYPE: &str = "*";

/// Declared property of a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub kind: ScalarKind,
    #[serde(default)]
    pub required: bool,
}

/// What happens to a shared node when a repository referencing it is cleared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Never removed by a repository clear
    #[default]
    Always,
    /// Removed once no relationship references it
    WhileReferenced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub unique_key: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertySchema>,
    /// Shared types carry no repository tag and merge across repositories
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub retention: Retention,
}

impl NodeSchema {
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Allowed endpoint pairs of one relationship type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelationshipSchema {
    pub pairs: Vec<(String, String)>,
}

impl RelationshipSchema {
    pub fn allows(&self, from: &str, to: &str) -> bool {
        self.pairs.iter().any(|(f, t)| {
            (f == ANY_TYPE || f == from) && (t == ANY_TYPE || t == to)
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EndpointDoc {
    One(String),
    Many(Vec<String>),
}

impl EndpointDoc {
    fn names(&self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s.clone()],
            Self::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PairDoc {
    from: EndpointDoc,
    to: EndpointDoc,
}

#[derive(Debug, Deserialize)]
struct RelationshipDoc {
    #[serde(default)]
    pairs: Vec<PairDoc>,
}

#[derive(Debug, Deserialize)]
struct ProfileDoc {
    name: String,
    #[serde(default)]
    nodes: BTreeMap<String, NodeSchema>,
    #[serde(default)]
    relationships: BTreeMap<String, RelationshipDoc>,
}

/// Read-only registry of node and relationship types
#[derive(Debug, Clone, Default)]
pub struct GraphSchema {
    profiles: Vec<String>,
    nodes: BTreeMap<String, NodeSchema>,
    relationships: BTreeMap<String, RelationshipSchema>,
}

impl GraphSchema {
    /// Parse a single profile document
    pub fn from_yaml(doc: &str) -> Result<Self> {
        let profile: ProfileDoc = serde_yaml::from_str(doc)
            .map_err(|e| Error::Profile(format!("invalid schema profile: {}", e)))?;

        for (name, node) in &profile.nodes {
            if node.unique_key.is_empty() {
                return Err(Error::Profile(format!("{} declares an empty unique key", name)));
            }
        }

        let relationships = profile
            .relationships
            .into_iter()
            .map(|(name, doc)| {
                let mut pairs = Vec::new();
                for pair in doc.pairs {
                    for from in pair.from.names() {
                        for to in pair.to.names() {
                            pairs.push((from.clone(), to));
                        }
                    }
                }
                (name, RelationshipSchema { pairs })
            })
            .collect();

        Ok(Self {
            profiles: vec![profile.name],
            nodes: profile.nodes,
            relationships,
        })
    }

    /// Built-in profile for one repository flavor
    pub fn builtin(repo_type: RepoType) -> Result<Self> {
        let doc = match repo_type {
            RepoType::Ansible => ANSIBLE_PROFILE,
            RepoType::Python => PYTHON_PROFILE,
            RepoType::Generic => GENERIC_PROFILE,
        };
        Self::from_yaml(doc)
    }

    /// All built-in profiles merged into one schema
    pub fn combined() -> Result<Self> {
        let mut schema = Self::default();
        for repo_type in RepoType::ALL {
            schema.merge(Self::builtin(repo_type)?)?;
        }
        Ok(schema)
    }

    /// Merge another profile into this one.
    ///
    /// A node type declared twice must agree on its key and sharing; its
    /// property lists are unioned.
    pub fn merge(&mut self, other: GraphSchema) -> Result<()> {
        for (name, node) in other.nodes {
            match self.nodes.get_mut(&name) {
                Some(existing) => {
                    if existing.unique_key != node.unique_key || existing.shared != node.shared {
                        return Err(Error::Profile(format!(
                            "conflicting definitions of node type {}",
                            name
                        )));
                    }
                    for prop in node.properties {
                        if existing.property(&prop.name).is_none() {
                            existing.properties.push(prop);
                        }
                    }
                }
                None => {
                    self.nodes.insert(name, node);
                }
            }
        }

        for (name, rel) in other.relationships {
            let entry = self.relationships.entry(name).or_default();
            for pair in rel.pairs {
                if !entry.pairs.contains(&pair) {
                    entry.pairs.push(pair);
                }
            }
        }

        self.profiles.extend(other.profiles);
        Ok(())
    }

    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    pub fn node(&self, node_type: &str) -> Option<&NodeSchema> {
        self.nodes.get(node_type)
    }

    pub fn relationship(&self, rel_type: &str) -> Option<&RelationshipSchema> {
        self.relationships.get(rel_type)
    }

    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.nodes.contains_key(node_type)
    }

    pub fn has_relationship_type(&self, rel_type: &str) -> bool {
        self.relationships.contains_key(rel_type)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn relationship_types(&self) -> impl Iterator<Item = &str> {
        self.relationships.keys().map(String::as_str)
    }

    pub fn is_shared(&self, node_type: &str) -> bool {
        self.nodes.get(node_type).map(|n| n.shared).unwrap_or(false)
    }

    /// Shared node types with the given retention policy
    pub fn shared_types(&self, retention: Retention) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.shared && n.retention == retention)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Validate an entity record
    pub fn validate_entity(&self, record: &EntityRecord) -> std::result::Result<(), SchemaError> {
        let node = self.lookup(&record.node_type)?;

        if record.unique_key != node.unique_key {
            return Err(SchemaError::KeyMismatch {
                node_type: record.node_type.clone(),
                expected: node.unique_key.clone(),
                found: record.unique_key.clone(),
            });
        }

        for prop in &node.properties {
            match record.properties.get(&prop.name) {
                Some(value) if !value.conforms_to(prop.kind) => {
                    return Err(SchemaError::WrongKind {
                        node_type: record.node_type.clone(),
                        property: prop.name.clone(),
                        expected: prop.kind,
                        found: value.kind(),
                    });
                }
                None if prop.required => {
                    return Err(SchemaError::MissingProperty {
                        node_type: record.node_type.clone(),
                        property: prop.name.clone(),
                    });
                }
                _ => {}
            }
        }

        for key in &node.unique_key {
            match record.properties.get(key) {
                None => {
                    return Err(SchemaError::MissingProperty {
                        node_type: record.node_type.clone(),
                        property: key.clone(),
                    })
                }
                Some(v) if v.is_blank() => {
                    return Err(SchemaError::EmptyKey {
                        node_type: record.node_type.clone(),
                        property: key.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Validate a relationship record, including both endpoint references
    pub fn validate_relationship(
        &self,
        record: &RelationshipRecord,
    ) -> std::result::Result<(), SchemaError> {
        let rel = self
            .relationships
            .get(&record.rel_type)
            .ok_or_else(|| SchemaError::UnknownRelationshipType(record.rel_type.clone()))?;

        self.validate_ref(&record.from)?;
        self.validate_ref(&record.to)?;

        if !rel.allows(&record.from.node_type, &record.to.node_type) {
            return Err(SchemaError::PairNotAllowed {
                rel_type: record.rel_type.clone(),
                from: record.from.node_type.clone(),
                to: record.to.node_type.clone(),
            });
        }
        Ok(())
    }

    fn validate_ref(&self, node_ref: &NodeRef) -> std::result::Result<(), SchemaError> {
        let node = self.lookup(&node_ref.node_type)?;
        let names = node_ref.key_names();
        if names != node.unique_key {
            return Err(SchemaError::KeyMismatch {
                node_type: node_ref.node_type.clone(),
                expected: node.unique_key.clone(),
                found: names,
            });
        }
        if let Some((name, _)) = node_ref.key.iter().find(|(_, v)| v.is_blank()) {
            return Err(SchemaError::EmptyKey {
                node_type: node_ref.node_type.clone(),
                property: name.clone(),
            });
        }
        Ok(())
    }

    /// Canonical store key for a validated entity
    pub fn entity_key(&self, record: &EntityRecord, repo_id: &str) -> NodeKey {
        let values = record
            .unique_key
            .iter()
            .map(|k| {
                let v = record.properties.get(k).map(Scalar::key_text).unwrap_or_default();
                (k.clone(), v)
            })
            .collect();
        NodeKey::new(
            record.node_type.clone(),
            self.repository_tag(&record.node_type, repo_id),
            values,
        )
    }

    /// Canonical store key for a validated endpoint reference
    pub fn ref_key(&self, node_ref: &NodeRef, repo_id: &str) -> NodeKey {
        let values = node_ref
            .key
            .iter()
            .map(|(k, v)| (k.clone(), v.key_text()))
            .collect();
        NodeKey::new(
            node_ref.node_type.clone(),
            self.repository_tag(&node_ref.node_type, repo_id),
            values,
        )
    }

    fn repository_tag(&self, node_type: &str, repo_id: &str) -> Option<String> {
        if self.is_shared(node_type) {
            None
        } else {
            Some(repo_id.to_string())
        }
    }

    fn lookup(&self, node_type: &str) -> std::result::Result<&NodeSchema, SchemaError> {
        self.nodes
            .get(node_type)
            .ok_or_else(|| SchemaError::UnknownNodeType(node_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> GraphSchema {
        GraphSchema::combined().unwrap()
    }

    #[test]
    fn test_builtin_profiles_load() {
        for repo_type in RepoType::ALL {
            let s = GraphSchema::builtin(repo_type).unwrap();
            assert!(s.has_node_type("File"));
        }
        let combined = schema();
        assert_eq!(combined.profiles().len(), 3);
        assert!(combined.has_node_type("Playbook"));
        assert!(combined.has_node_type("Class"));
        assert!(combined.has_node_type("Directory"));
        assert!(combined.is_shared("Role"));
        assert!(!combined.is_shared("File"));
    }

    #[test]
    fn test_validate_entity_ok() {
        let record = EntityRecord::keyed("File", [("path", "site.yml")]).with("size", 10i64);
        assert!(schema().validate_entity(&record).is_ok());
    }

    #[test]
    fn test_validate_entity_unknown_type() {
        let record = EntityRecord::keyed("Widget", [("path", "x")]);
        assert_eq!(
            schema().validate_entity(&record),
            Err(SchemaError::UnknownNodeType("Widget".into()))
        );
    }

    #[test]
    fn test_validate_entity_missing_required() {
        let record = EntityRecord::keyed("Play", [
            ("playbook_path", Scalar::from("site.yml")),
            ("order", Scalar::from(0i64)),
        ]);
        assert!(matches!(
            schema().validate_entity(&record),
            Err(SchemaError::MissingProperty { property, .. }) if property == "name"
        ));
    }

    #[test]
    fn test_validate_entity_wrong_kind() {
        let record = EntityRecord::keyed("File", [("path", "a.py")]).with("size", "big");
        assert!(matches!(
            schema().validate_entity(&record),
            Err(SchemaError::WrongKind { expected: ScalarKind::Int, found: ScalarKind::String, .. })
        ));
    }

    #[test]
    fn test_validate_entity_empty_key() {
        let record = EntityRecord::keyed("File", [("path", "")]);
        assert!(matches!(
            schema().validate_entity(&record),
            Err(SchemaError::EmptyKey { .. })
        ));
    }

    #[test]
    fn test_validate_entity_key_mismatch() {
        let record = EntityRecord::keyed("Role", [("name", "nginx"), ("source", "galaxy")]);
        assert!(matches!(
            schema().validate_entity(&record),
            Err(SchemaError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_relationship_pairs() {
        let s = schema();
        let ok = RelationshipRecord::new(
            NodeRef::new("Play").with("playbook_path", "site.yml").with("order", 0i64),
            "USES_ROLE",
            NodeRef::new("Role").with("name", "nginx"),
        );
        assert!(s.validate_relationship(&ok).is_ok());

        let wildcard = RelationshipRecord::new(
            NodeRef::new("Playbook").with("path", "site.yml"),
            "IN_FILE",
            NodeRef::new("File").with("path", "site.yml"),
        );
        assert!(s.validate_relationship(&wildcard).is_ok());

        let bad = RelationshipRecord::new(
            NodeRef::new("File").with("path", "a"),
            "USES_ROLE",
            NodeRef::new("Role").with("name", "nginx"),
        );
        assert!(matches!(
            s.validate_relationship(&bad),
            Err(SchemaError::PairNotAllowed { .. })
        ));

        let unknown = RelationshipRecord::new(
            NodeRef::new("File").with("path", "a"),
            "OWNS",
            NodeRef::new("File").with("path", "b"),
        );
        assert_eq!(
            s.validate_relationship(&unknown),
            Err(SchemaError::UnknownRelationshipType("OWNS".into()))
        );
    }

    #[test]
    fn test_shared_keys_have_no_repository() {
        let s = schema();
        let role = EntityRecord::keyed("Role", [("name", "nginx")]);
        let file = EntityRecord::keyed("File", [("path", "a.yml")]);
        assert_eq!(s.entity_key(&role, "web").repository, None);
        assert_eq!(s.entity_key(&file, "web").repository.as_deref(), Some("web"));
        assert_eq!(s.entity_key(&file, "web"), s.ref_key(&file.node_ref(), "web"));
    }

    #[test]
    fn test_merge_rejects_conflicting_keys() {
        let mut base = GraphSchema::from_yaml("name: a\nnodes:\n  X:\n    unique_key: [id]\n").unwrap();
        let other = GraphSchema::from_yaml("name: b\nnodes:\n  X:\n    unique_key: [name]\n").unwrap();
        assert!(base.merge(other).is_err());
    }

    #[test]
    fn test_retention_default_always() {
        let s = GraphSchema::from_yaml(
            "name: t\nnodes:\n  R:\n    unique_key: [name]\n    shared: true\n  Q:\n    unique_key: [name]\n    shared: true\n    retention: while_referenced\n",
        )
        .unwrap();
        assert_eq!(s.node("R").unwrap().retention, Retention::Always);
        assert!(s.shared_types(Retention::WhileReferenced).contains("Q"));
    }
}
