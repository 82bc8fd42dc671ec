//! Build entry points: `build`, `clear`, `list_repositories`, `detect`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use graphwright_core::limits::validate_repo_id;
use graphwright_core::{BuildReport, GraphSchema, PathSanitizer, RepoType, RepositoryContext};
use graphwright_storage::{ClearOutcome, GraphStats, GraphStore, RepositorySummary};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::builder::GraphBuilder;
use crate::config::IngestConfig;
use crate::coordinator::Coordinator;
use crate::detect::{self, Detection};
use crate::error::{IngestError, Result};
use crate::extract::ExtractorRegistry;
use crate::parse::ParserSet;
use crate::walk::list_files;

/// One build invocation
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub path: PathBuf,
    /// Derived from the directory name when absent
    pub repo_id: Option<String>,
    /// Detected when absent
    pub repo_type: Option<RepoType>,
    /// Clear the repository's graph before building
    pub clear: bool,
    /// Overrides the configured worker count
    pub workers: Option<usize>,
}

impl BuildRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            repo_id: None,
            repo_type: None,
            clear: false,
            workers: None,
        }
    }

    pub fn repo_id(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    pub fn repo_type(mut self, repo_type: RepoType) -> Self {
        self.repo_type = Some(repo_type);
        self
    }

    pub fn clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }
}

/// Extraction-to-graph pipeline over one graph store
pub struct Pipeline {
    store: Arc<dyn GraphStore>,
    /// All profiles merged; used for retention on clear
    schema: Arc<GraphSchema>,
    registry: ExtractorRegistry,
    parsers: Arc<ParserSet>,
    config: IngestConfig,
}

impl Pipeline {
    pub fn new(store: Arc<dyn GraphStore>, config: IngestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            schema: Arc::new(GraphSchema::combined()?),
            registry: ExtractorRegistry::with_builtins(),
            parsers: Arc::new(ParserSet::new()),
            config,
        })
    }

    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn schema(&self) -> &Arc<GraphSchema> {
        &self.schema
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub async fn build(&self, request: BuildRequest) -> Result<BuildReport> {
        self.build_with_cancel(request, CancellationToken::new()).await
    }

    /// Run a build that stops dispatching files once `cancel` fires.
    ///
    /// Only store unavailability and invalid input are errors; everything
    /// that goes wrong per file or per record ends up in the report.
    pub async fn build_with_cancel(&self, request: BuildRequest, cancel: CancellationToken) -> Result<BuildReport> {
        let workers = request.workers.unwrap_or(self.config.workers);
        graphwright_core::limits::validate_workers(workers)?;

        let root_buf = sanitize_root(&request.path)?;
        let root = root_buf.as_path();
        if !root.is_dir() {
            return Err(IngestError::NotADirectory(root.to_path_buf()));
        }
        self.ensure_available().await?;

        let repo_type = match request.repo_type {
            Some(repo_type) => repo_type,
            None => {
                let detection = detect::detect(root);
                tracing::info!(
                    "Detected {} repository (confidence {:.2}, {})",
                    detection.repo_type,
                    detection.confidence,
                    detection.indicators.join(", ")
                );
                detection.repo_type
            }
        };
        let repo_id = request
            .repo_id
            .unwrap_or_else(|| RepositoryContext::derive_repo_id(root));
        let ctx = RepositoryContext::new(repo_id, repo_type)?;

        if request.clear {
            let cleared = self.store.clear_repository(&ctx.repo_id, &self.schema).await?;
            tracing::info!(
                "Cleared '{}': {} nodes, {} edges",
                ctx.repo_id,
                cleared.nodes_deleted,
                cleared.edges_deleted
            );
        }

        let extractor = self.registry.create(repo_type.as_str())?;
        let listing = list_files(root, extractor.as_ref(), self.config.max_file_size)?;
        tracing::info!(
            "Building '{}' from {} files with {} workers",
            ctx.repo_id,
            listing.files.len(),
            workers
        );

        let schema = Arc::new(GraphSchema::builtin(repo_type)?);
        let mut builder = GraphBuilder::new(Arc::clone(&self.store), schema, &ctx, self.config.batch_size);
        for rel_path in &listing.oversized {
            builder.record_skipped(rel_path);
        }
        for (rel_path, error) in &listing.errors {
            builder.record_file_error(rel_path, error);
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let coordinator = Coordinator::new(Arc::clone(&self.parsers), extractor, ctx.clone(), workers);

        let producer = coordinator.run(listing.files, tx, cancel.clone());
        let consumer = builder.consume(rx, self.config.flush_interval(), cancel);
        let ((), mut report) = tokio::join!(producer, consumer);

        report.finish();
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Remove one repository's graph; shared nodes follow their retention
    pub async fn clear(&self, repo_id: &str) -> Result<ClearOutcome> {
        validate_repo_id(repo_id)?;
        self.ensure_available().await?;
        let outcome = self.store.clear_repository(repo_id, &self.schema).await?;
        tracing::info!(
            "Cleared '{}': {} nodes, {} edges, {} shared retained",
            repo_id,
            outcome.nodes_deleted,
            outcome.edges_deleted,
            outcome.shared_retained
        );
        Ok(outcome)
    }

    pub async fn list_repositories(&self) -> Result<Vec<RepositorySummary>> {
        Ok(self.store.list_repositories().await?)
    }

    pub async fn stats(&self, repo_id: Option<&str>) -> Result<GraphStats> {
        if let Some(repo_id) = repo_id {
            validate_repo_id(repo_id)?;
        }
        Ok(self.store.stats(repo_id).await?)
    }

    pub fn detect(&self, path: &Path) -> Result<Detection> {
        if !path.is_dir() {
            return Err(IngestError::NotADirectory(path.to_path_buf()));
        }
        Ok(detect::detect(path))
    }

    async fn ensure_available(&self) -> Result<()> {
        match self.store.health_check().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(IngestError::StoreUnavailable("health check failed".into())),
            Err(e) => Err(IngestError::StoreUnavailable(e.to_string())),
        }
    }
}

/// Pass the build root through the path sanitizer. Relative roots resolve
/// against the working directory; `..` segments are refused.
fn sanitize_root(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let anchor = absolute.ancestors().last().unwrap_or(&absolute);
    let sanitizer = PathSanitizer::new(anchor)?.allow_absolute(true);
    Ok(sanitizer.sanitize(&absolute.to_string_lossy())?.into_absolute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphwright_core::{NodeKey, SecurityError};
    use graphwright_storage::{EdgeFilter, MemoryStore, NodeFilter};
    use std::fs;
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
            "- name: Web\n  hosts: web\n  roles:\n    - web\n  tasks:\n    - name: ping\n      ping:\n      notify: restart\n  handlers:\n    - name: restart\n      service: name=nginx state=restarted\n",
        );
        write(
            root,
            "roles/web/tasks/main.yml",
            "- name: render\n  template:\n    src: site.conf.j2\n    dest: /etc/site.conf\n",
        );
        write(root, "roles/web/templates/site.conf.j2", "server {{ server_name }};\n");
        write(root, "group_vars/all.yml", "server_name: example.org\n");
        dir
    }

    fn pipeline(store: Arc<MemoryStore>) -> Pipeline {
        Pipeline::new(store, IngestConfig::default().with_batch_size(3)).unwrap()
    }

    #[tokio::test]
    async fn test_build_ansible_repository() {
        let repo = ansible_repo();
        let store = Arc::new(MemoryStore::new());
        let report = pipeline(store.clone())
            .build(BuildRequest::new(repo.path()).repo_id("infra"))
            .await
            .unwrap();

        assert_eq!(report.repo_type, RepoType::Ansible);
        assert_eq!(report.files_processed, 4);
        assert_eq!(report.rejected_count, 0, "{:?}", report.rejected);
        assert_eq!(report.unresolved_count, 0, "{:?}", report.unresolved);
        assert!(report.finished_at.is_some());

        let task = store
            .find_nodes(&NodeFilter::of_type("Task").in_repository("infra").with_property("file_path", "site.yml"))
            .await
            .unwrap();
        assert_eq!(task.len(), 1);
        let notifies = store
            .edges(&EdgeFilter::outgoing(task[0].key.clone()).rel_type("NOTIFIES"))
            .await
            .unwrap();
        assert_eq!(notifies.len(), 1);

        let template = NodeKey::new(
            "Template",
            Some("infra".into()),
            vec![("path".into(), "roles/web/templates/site.conf.j2".into())],
        );
        let users = store.incoming(&template, &["USES_TEMPLATE"]).await.unwrap();
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let repo = ansible_repo();
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());

        let first = p.build(BuildRequest::new(repo.path()).repo_id("infra")).await.unwrap();
        let before = store.stats(Some("infra")).await.unwrap();
        let second = p.build(BuildRequest::new(repo.path()).repo_id("infra")).await.unwrap();
        let after = store.stats(Some("infra")).await.unwrap();

        assert_eq!(before, after);
        assert!(first.nodes_created > 0);
        assert_eq!(second.nodes_created, 0);
        assert_eq!(second.relationships_created, 0);
        assert_eq!(second.relationships_existing, first.relationships_created);
    }

    #[tokio::test]
    async fn test_clear_isolates_repositories_and_keeps_shared_roles() {
        let repo = ansible_repo();
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());
        p.build(BuildRequest::new(repo.path()).repo_id("web")).await.unwrap();
        p.build(BuildRequest::new(repo.path()).repo_id("db")).await.unwrap();

        let repos: Vec<_> = p.list_repositories().await.unwrap().into_iter().map(|r| r.repo_id).collect();
        assert_eq!(repos, vec!["db", "web"]);

        let outcome = p.clear("web").await.unwrap();
        assert!(outcome.nodes_deleted > 0);
        assert_eq!(store.stats(Some("web")).await.unwrap().node_count, 0);
        assert!(store.stats(Some("db")).await.unwrap().node_count > 0);

        let roles = store.find_nodes(&NodeFilter::of_type("Role")).await.unwrap();
        assert_eq!(roles.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_keeps_role_dependencies_declared_by_other_repositories() {
        let repo = |dir: &TempDir| {
            write(dir.path(), "ansible.cfg", "[defaults]\n");
            write(dir.path(), "roles/common/meta/main.yml", "dependencies:\n  - role: base\n");
        };
        let (a, b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        repo(&a);
        repo(&b);

        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());
        p.build(BuildRequest::new(a.path()).repo_id("a")).await.unwrap();
        p.build(BuildRequest::new(b.path()).repo_id("b")).await.unwrap();

        let common = NodeKey::new("Role", None, vec![("name".into(), "common".into())]);
        let depends_on = EdgeFilter::outgoing(common).rel_type("DEPENDS_ON");
        assert_eq!(store.edges(&depends_on).await.unwrap().len(), 1);

        p.clear("a").await.unwrap();
        let left = store.edges(&depends_on).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].repository, "b");

        p.clear("b").await.unwrap();
        assert!(store.edges(&depends_on).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_with_clear_drops_stale_nodes() {
        let repo = ansible_repo();
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());
        p.build(BuildRequest::new(repo.path()).repo_id("infra")).await.unwrap();

        fs::remove_file(repo.path().join("group_vars/all.yml")).unwrap();
        p.build(BuildRequest::new(repo.path()).repo_id("infra").clear(true))
            .await
            .unwrap();

        let vars_files = store
            .find_nodes(&NodeFilter::of_type("VarsFile").in_repository("infra"))
            .await
            .unwrap();
        assert!(vars_files.is_empty());
    }

    #[tokio::test]
    async fn test_python_repository_with_external_import() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "setup.py", "from setuptools import setup\n");
        write(dir.path(), "pkg/__init__.py", "");
        write(dir.path(), "pkg/core.py", "import os\nfrom pkg import util\n\nclass Base:\n    pass\n");
        write(dir.path(), "pkg/util.py", "def helper():\n    return 1\n");

        let store = Arc::new(MemoryStore::new());
        let report = pipeline(store.clone())
            .build(BuildRequest::new(dir.path()).repo_id("app"))
            .await
            .unwrap();

        assert_eq!(report.repo_type, RepoType::Python);
        assert!(report.unresolved.iter().any(|u| u.to.contains("os")));
        let classes = store.find_nodes(&NodeFilter::of_type("Class")).await.unwrap();
        assert_eq!(classes.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_build_commits_nothing_new() {
        let repo = ansible_repo();
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pipeline(store.clone())
            .build_with_cancel(BuildRequest::new(repo.path()).repo_id("infra"), cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(store.stats(None).await.unwrap().node_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store);
        let dir = TempDir::new().unwrap();

        let missing = p.build(BuildRequest::new(dir.path().join("nope"))).await;
        assert!(matches!(missing, Err(IngestError::NotADirectory(_))));

        let name = dir.path().file_name().unwrap();
        let traversal = p.build(BuildRequest::new(dir.path().join("..").join(name))).await;
        assert!(matches!(traversal, Err(IngestError::Security(SecurityError::Traversal))));

        let nul = p.build(BuildRequest::new(dir.path().join("repo\0"))).await;
        assert!(matches!(nul, Err(IngestError::Security(SecurityError::NullByte))));

        let bad_id = p.build(BuildRequest::new(dir.path()).repo_id("a b")).await;
        assert!(bad_id.is_err());

        let zero_workers = p.build(BuildRequest::new(dir.path()).workers(0)).await;
        assert!(matches!(zero_workers, Err(IngestError::Validation(_))));

        assert!(p.clear("../etc").await.is_err());
    }

    #[tokio::test]
    async fn test_generic_fallback() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "docs/guide/intro.md", "# intro\n");
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone());

        assert_eq!(p.detect(dir.path()).unwrap().repo_type, RepoType::Generic);
        let report = p.build(BuildRequest::new(dir.path()).repo_id("docs")).await.unwrap();
        assert_eq!(report.repo_type, RepoType::Generic);
        assert_eq!(report.unresolved_count, 0);
        assert_eq!(store.stats(Some("docs")).await.unwrap().edge_count, 2);
    }
}
