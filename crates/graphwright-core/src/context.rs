//! Repository context: the tenant tag attached to every build

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::limits::{validate_repo_id, MAX_REPO_ID_LEN};
use crate::{Error, Result};

/// Supported repository flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Ansible,
    Python,
    Generic,
}

impl RepoType {
    pub const ALL: [RepoType; 3] = [RepoType::Ansible, RepoType::Python, RepoType::Generic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ansible => "ansible",
            Self::Python => "python",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ansible" => Ok(Self::Ansible),
            "python" => Ok(Self::Python),
            "generic" => Ok(Self::Generic),
            other => Err(Error::Profile(format!("unknown repository type '{}'", other))),
        }
    }
}

/// Tenant tag for one indexed codebase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryContext {
    pub repo_id: String,
    pub repo_type: RepoType,
}

impl RepositoryContext {
    pub fn new(repo_id: impl Into<String>, repo_type: RepoType) -> Result<Self> {
        let repo_id = repo_id.into();
        validate_repo_id(&repo_id)?;
        Ok(Self { repo_id, repo_type })
    }

    /// Derive a valid repository id from a directory name.
    ///
    /// Characters outside `[A-Za-z0-9_-]` become `-`.
    pub fn derive_repo_id(path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut id: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .take(MAX_REPO_ID_LEN)
            .collect();
        if id.trim_matches('-').is_empty() {
            id = "default".to_string();
        }
        id
    }
}
