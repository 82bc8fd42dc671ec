//! End-to-end tests for the graphwright binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn ansible_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "ansible.cfg", "[defaults]\n");
    write(
        root,
        "site.yml",
        "- name: Web\n  hosts: web\n  roles:\n    - web\n  tasks:\n    - name: ping\n      ping:\n",
    );
    write(
        root,
        "roles/web/tasks/main.yml",
        "- name: render\n  template:\n    src: site.conf.j2\n    dest: /etc/site.conf\n",
    );
    write(root, "roles/web/templates/site.conf.j2", "server {{ server_name }};\n");
    dir
}

fn graphwright(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("graphwright").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("GRAPHWRIGHT_TOKEN")
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn build(data_dir: &Path, repo: &Path) {
    graphwright(data_dir)
        .args(["build", "--repo-id", "site", "--type", "ansible"])
        .arg(repo)
        .assert()
        .success()
        .stdout(predicate::str::contains("Built 'site' (ansible)"));
}

#[test]
fn test_help() {
    Command::cargo_bin("graphwright")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_config_set_get_path() {
    let data = TempDir::new().unwrap();

    graphwright(data.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    graphwright(data.path())
        .args(["config", "set", "workers", "2"])
        .assert()
        .success();

    graphwright(data.path())
        .args(["config", "get", "workers"])
        .assert()
        .success()
        .stdout("2\n");

    graphwright(data.path())
        .args(["config", "set", "workers", "0"])
        .assert()
        .failure();

    graphwright(data.path())
        .args(["config", "get", "colour"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown config key"));
}

#[test]
fn test_config_init_refuses_overwrite() {
    let data = TempDir::new().unwrap();
    graphwright(data.path()).args(["config", "init"]).assert().success();
    graphwright(data.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    graphwright(data.path())
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_detect_ansible() {
    let data = TempDir::new().unwrap();
    let repo = ansible_repo();
    graphwright(data.path())
        .args(["--format", "json", "detect"])
        .arg(repo.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"repo_type\": \"ansible\""));
}

#[test]
fn test_detect_requires_directory() {
    let data = TempDir::new().unwrap();
    graphwright(data.path())
        .args(["detect"])
        .arg(data.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not a directory"));
}

#[test]
fn test_build_list_stats_query_clear() {
    let data = TempDir::new().unwrap();
    let repo = ansible_repo();
    build(data.path(), repo.path());

    graphwright(data.path())
        .arg("repos")
        .assert()
        .success()
        .stdout(predicate::str::contains("REPOSITORY"))
        .stdout(predicate::str::contains("site"));

    graphwright(data.path())
        .args(["stats", "site"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Playbook: 1"));

    graphwright(data.path())
        .args(["query", "MATCH (p:Play)-[:USES_ROLE]->(r:Role) RETURN p.name, r.name", "--repo-id", "site"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Web"))
        .stdout(predicate::str::contains("1 row(s)"));

    // without --force nothing is deleted
    graphwright(data.path())
        .args(["clear", "site"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"));
    graphwright(data.path())
        .args(["--format", "json", "repos"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"repo_id\": \"site\""));

    graphwright(data.path())
        .args(["clear", "site", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 'site'"));
    graphwright(data.path())
        .arg("repos")
        .assert()
        .success()
        .stdout(predicate::str::contains("No repositories found"));
}

#[test]
fn test_build_json_report() {
    let data = TempDir::new().unwrap();
    let repo = ansible_repo();
    graphwright(data.path())
        .args(["--format", "json", "build", "--repo-id", "site"])
        .arg(repo.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"repo_id\": \"site\""))
        .stdout(predicate::str::contains("\"cancelled\": false"));
}

#[test]
fn test_write_query_is_refused() {
    let data = TempDir::new().unwrap();
    let repo = ansible_repo();
    build(data.path(), repo.path());

    graphwright(data.path())
        .args(["query", "MATCH (n:Play) DETACH DELETE n"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DELETE"));

    graphwright(data.path())
        .args(["stats", "site"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Play: 1"));
}

#[test]
fn test_serve_rejects_malformed_repo_root() {
    let data = TempDir::new().unwrap();
    graphwright(data.path())
        .args(["serve", "--repo-root", "site"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("REPO=PATH"));
}
