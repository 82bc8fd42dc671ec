//! Repository flavor detection from a directory listing

use std::path::Path;

use graphwright_core::RepoType;
use serde::Serialize;
use walkdir::WalkDir;

use crate::walk::is_excluded_dir;

/// Scores below this fall back to the generic flavor
pub const MIN_CONFIDENCE: f64 = 0.3;

/// Depth of the listing `detect` inspects
const DETECT_MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub repo_type: RepoType,
    /// In `[0, 1]`
    pub confidence: f64,
    pub indicators: Vec<String>,
}

/// Detect the flavor of the repository at `root`
pub fn detect(root: &Path) -> Detection {
    let listing: Vec<String> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(DETECT_MAX_DEPTH)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_excluded_dir(e.file_name())))
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).ok()?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            Some(if e.file_type().is_dir() { format!("{}/", rel) } else { rel })
        })
        .collect();

    detect_from_listing(&listing)
}

/// Detect from relative paths; directories carry a trailing `/`
pub fn detect_from_listing(listing: &[String]) -> Detection {
    let ansible = ansible_indicators(listing);
    let python = python_indicators(listing);

    let ansible_score = (ansible.len() as f64 / 3.0).min(1.0);
    let python_score = (python.len() as f64 / 2.0).min(1.0);

    let (repo_type, confidence, indicators) = if ansible_score >= python_score {
        (RepoType::Ansible, ansible_score, ansible)
    } else {
        (RepoType::Python, python_score, python)
    };

    if confidence < MIN_CONFIDENCE {
        return Detection {
            repo_type: RepoType::Generic,
            confidence: 0.5,
            indicators: vec!["fallback".to_string()],
        };
    }

    Detection {
        repo_type,
        confidence,
        indicators,
    }
}

fn ansible_indicators(listing: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    let mut hit = |name: &str, matched: bool| {
        if matched {
            found.push(name.to_string());
        }
    };

    let top = |p: &&String| !p.trim_end_matches('/').contains('/');
    let top_level: Vec<&String> = listing.iter().filter(top).collect();
    let has_top = |name: &str| top_level.iter().any(|p| p.as_str() == name);

    hit("ansible.cfg", has_top("ansible.cfg"));
    hit("playbooks/", has_top("playbooks/"));
    hit("roles/", has_top("roles/"));
    hit(
        "inventory",
        top_level.iter().any(|p| p.starts_with("inventory")),
    );
    hit("group_vars/", listing.iter().any(|p| p.ends_with("group_vars/")));
    hit("host_vars/", listing.iter().any(|p| p.ends_with("host_vars/")));
    hit("site.yml", has_top("site.yml"));
    hit(
        "playbook*.yml",
        top_level
            .iter()
            .any(|p| p.starts_with("playbook") && (p.ends_with(".yml") || p.ends_with(".yaml"))),
    );
    hit("requirements.yml", listing.iter().any(|p| p.ends_with("requirements.yml")));
    hit("*/tasks/main.yml", listing.iter().any(|p| p.ends_with("/tasks/main.yml")));
    found
}

fn python_indicators(listing: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for name in ["pyproject.toml", "setup.py", "setup.cfg", "requirements.txt", "Pipfile"] {
        if listing.iter().any(|p| p == name) {
            found.push(name.to_string());
        }
    }
    if listing.iter().any(|p| p == "__init__.py" || p.ends_with("/__init__.py")) {
        found.push("**/__init__.py".to_string());
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn listing(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_ansible_repository() {
        let d = detect_from_listing(&listing(&[
            "ansible.cfg",
            "site.yml",
            "roles/",
            "roles/web/",
            "roles/web/tasks/",
            "roles/web/tasks/main.yml",
        ]));
        assert_eq!(d.repo_type, RepoType::Ansible);
        assert_eq!(d.confidence, 1.0);
        assert!(d.indicators.contains(&"*/tasks/main.yml".to_string()));
    }

    #[test]
    fn test_python_repository() {
        let d = detect_from_listing(&listing(&["pyproject.toml", "pkg/", "pkg/__init__.py"]));
        assert_eq!(d.repo_type, RepoType::Python);
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.indicators, vec!["pyproject.toml", "**/__init__.py"]);
    }

    #[test]
    fn test_tie_prefers_ansible() {
        // one indicator each scores 1/3 against 1/2
        let d = detect_from_listing(&listing(&["site.yml", "setup.py"]));
        assert_eq!(d.repo_type, RepoType::Python);

        let d = detect_from_listing(&listing(&[
            "site.yml",
            "roles/",
            "ansible.cfg",
            "setup.py",
            "requirements.txt",
        ]));
        assert_eq!(d.repo_type, RepoType::Ansible);
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn test_fallback_to_generic() {
        let d = detect_from_listing(&listing(&["README.md", "docs/", "docs/index.md"]));
        assert_eq!(d.repo_type, RepoType::Generic);
        assert_eq!(d.confidence, 0.5);
        assert_eq!(d.indicators, vec!["fallback"]);
    }

    #[test]
    fn test_nested_files_do_not_count_as_top_level() {
        let d = detect_from_listing(&listing(&["vendor/", "vendor/site.yml"]));
        assert_eq!(d.repo_type, RepoType::Generic);
    }

    #[test]
    fn test_detect_directory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("group_vars")).unwrap();
        fs::create_dir_all(dir.path().join("roles/db/tasks")).unwrap();
        fs::write(dir.path().join("roles/db/tasks/main.yml"), "- ping:\n").unwrap();
        fs::write(dir.path().join("site.yml"), "- hosts: all\n").unwrap();

        let d = detect(dir.path());
        assert_eq!(d.repo_type, RepoType::Ansible);
        assert!(d.indicators.contains(&"group_vars/".to_string()));
        assert!(d.indicators.contains(&"roles/".to_string()));
    }
}
