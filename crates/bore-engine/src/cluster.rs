//! Cluster lifecycle: the `.bore/` layout, init/open, and the handle that
//! owns every component for one managed repository.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bore_agents::prompt::{DefaultPrompts, PromptSource};
use bore_core::cancel::CancelToken;
use bore_core::config::{Config, ConfigError};
use bore_core::state::{SessionState, StateError};
use bore_core::types::{Cluster, Execution, Task};
use bore_git::{execution_branch, worktree_dir_name, GitError, Repo};
use bore_process::runner::AgentRunner;
use bore_process::scheduler::WorkerScheduler;

use crate::artifacts::RunArtifacts;
use crate::engine::{EventSink, ExecutionEngine, NoopSink};
use crate::gitignore::{ensure_gitignore, GitignoreError};
use crate::logging::{init_logging, LoggingError};
use crate::recovery::recover_interrupted;
use crate::store::{SqliteStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster: repo path {path} is not accessible: {source}")]
    RepoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cluster: not a git repository: {path}")]
    NotAGitRepo { path: PathBuf },
    #[error("cluster: .bore directory not found at {path}")]
    NotInitialized { path: PathBuf },
    #[error("cluster: failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cluster: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },
    #[error("cluster: {source}")]
    State {
        #[from]
        source: StateError,
    },
    #[error("cluster: {source}")]
    Store {
        #[from]
        source: StoreError,
    },
    #[error("cluster: {source}")]
    Git {
        #[from]
        source: GitError,
    },
    #[error("cluster: {source}")]
    Gitignore {
        #[from]
        source: GitignoreError,
    },
    #[error("cluster: {source}")]
    Logging {
        #[from]
        source: LoggingError,
    },
}

/// On-disk layout under `<repo>/.bore/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPaths {
    pub repo_root: PathBuf,
    pub bore_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub logs_dir: PathBuf,
    pub worker_logs_dir: PathBuf,
    pub system_log_path: PathBuf,
    pub runs_dir: PathBuf,
    pub worktrees_dir: PathBuf,
}

impl ClusterPaths {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let bore_dir = repo_root.join(".bore");
        let logs_dir = bore_dir.join("logs");
        Self {
            db_path: bore_dir.join("bore.db"),
            config_path: bore_dir.join("config.json"),
            state_path: bore_dir.join("state.json"),
            worker_logs_dir: logs_dir.join("workers"),
            system_log_path: logs_dir.join("system.log"),
            runs_dir: bore_dir.join("runs"),
            worktrees_dir: bore_dir.join("worktrees"),
            logs_dir,
            bore_dir,
            repo_root,
        }
    }

    fn create_layout(&self) -> Result<(), ClusterError> {
        for dir in [
            &self.bore_dir,
            &self.logs_dir,
            &self.worker_logs_dir,
            &self.runs_dir,
            &self.worktrees_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| ClusterError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Open cluster: owns the store, config, repo handle, runner, and scheduler
/// for one managed repository. Dropping the handle releases the store.
#[derive(Debug)]
pub struct ClusterHandle {
    pub cluster: Cluster,
    pub paths: ClusterPaths,
    pub config: Config,
    pub state: SessionState,
    pub store: Arc<SqliteStore>,
    pub repo: Repo,
    pub runner: AgentRunner,
    pub scheduler: Arc<WorkerScheduler>,
}

impl ClusterHandle {
    /// Creates the `.bore/` layout in an existing git repository, registers
    /// the cluster, appends `.bore/` to the repo's `.gitignore`, and opens
    /// the cluster.
    pub fn init(token: &CancelToken, repo_path: &Path) -> Result<Self, ClusterError> {
        let root = canonical_root(repo_path)?;
        if !Repo::is_git_repo(token, &root) {
            return Err(ClusterError::NotAGitRepo { path: root });
        }

        let paths = ClusterPaths::new(&root);
        paths.create_layout()?;

        {
            // Init-scoped store: open() reopens its own handle below.
            let store = SqliteStore::open(&paths.db_path)?;

            Config::default().save(&paths.config_path)?;
            SessionState::default().save(&paths.state_path)?;

            let name = root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "repo".to_string());
            let repo = Repo::open(&root)?;
            let remote_url = repo.remote_url(token);

            if store.get_cluster_by_path(&root.to_string_lossy()).is_err() {
                store.create_cluster(&name, &root.to_string_lossy(), remote_url.as_deref())?;
            }
        }

        ensure_gitignore(&root)?;

        Self::open(token, &root)
    }

    /// Opens an existing cluster: config (an invalid config fails the open
    /// with no partial state), store, repo, logging, runner, and scheduler,
    /// then runs the crash-recovery sweep.
    pub fn open(token: &CancelToken, repo_path: &Path) -> Result<Self, ClusterError> {
        let root = canonical_root(repo_path)?;
        let paths = ClusterPaths::new(&root);
        if !paths.bore_dir.is_dir() {
            return Err(ClusterError::NotInitialized {
                path: paths.bore_dir.clone(),
            });
        }

        let config = Config::load(&paths.config_path)?;
        let state = SessionState::load(&paths.state_path)?;

        init_logging(&paths.system_log_path, &config.logging.level)?;

        let store = Arc::new(SqliteStore::open(&paths.db_path)?);
        let repo = Repo::open(&root)?;
        let runner = AgentRunner::new(
            config.agents.claude_cli_path.clone(),
            config.agents.default_model.clone(),
        );
        let scheduler = Arc::new(WorkerScheduler::new(
            config.agents.max_total_workers.max(1) as usize,
        ));

        let cluster = store.get_cluster_by_path(&root.to_string_lossy())?;

        // Never fatal: an interrupted sweep must not block opening.
        if let Err(err) = recover_interrupted(&store, cluster.id) {
            tracing::warn!(cluster_id = cluster.id, %err, "crash recovery failed");
        }

        tracing::info!(cluster = %cluster.name, cluster_id = cluster.id, "cluster opened");

        Ok(Self {
            cluster,
            paths,
            config,
            state,
            store,
            repo,
            runner,
            scheduler,
        })
    }

    /// Builds an execution engine wired to this cluster's components.
    pub fn engine(&self) -> ExecutionEngine {
        self.engine_with(Arc::new(DefaultPrompts), Arc::new(NoopSink))
    }

    pub fn engine_with(
        &self,
        prompts: Arc<dyn PromptSource>,
        sink: Arc<dyn EventSink>,
    ) -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::clone(&self.store),
            self.repo.clone(),
            self.runner.clone(),
            Arc::clone(&self.scheduler),
            prompts,
            RunArtifacts::new(&self.paths.runs_dir),
            sink,
        )
    }

    /// Creates the execution row plus its isolated worktree and branch.
    ///
    /// Branch and worktree names are derived deterministically from the
    /// thread slug, task id, and title slug. A failed worktree creation
    /// leaves the row pending; re-attempting requires cleaning up the
    /// previous execution's branch first.
    pub fn prepare_execution(
        &self,
        token: &CancelToken,
        task: &Task,
        crew_id: Option<i64>,
        base_branch: &str,
    ) -> Result<Execution, ClusterError> {
        let thread = self.store.get_thread(task.thread_id)?;

        let branch = execution_branch(&thread.name, task.id, &task.title);
        let worktree_path = self
            .paths
            .worktrees_dir
            .join(worktree_dir_name(&thread.name, task.id, &task.title));

        let execution = self.store.create_execution(
            task.id,
            self.cluster.id,
            crew_id,
            base_branch,
            &branch,
            &worktree_path.to_string_lossy(),
        )?;

        self.repo
            .create_worktree_new_branch(token, &worktree_path, &branch, base_branch)?;

        Ok(execution)
    }
}

fn canonical_root(repo_path: &Path) -> Result<PathBuf, ClusterError> {
    std::fs::canonicalize(repo_path).map_err(|source| ClusterError::RepoPath {
        path: repo_path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::process::Command;

    use bore_core::cancel::CancelToken;

    use super::{ClusterError, ClusterHandle, ClusterPaths};

    fn init_git_repo(root: &Path) {
        let run = |args: &[&str]| {
            let output = Command::new("git")
                .args(args)
                .current_dir(root)
                .output()
                .expect("spawn git");
            assert!(
                output.status.success(),
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            );
        };
        run(&["init", "-b", "main"]);
        std::fs::write(root.join("README.md"), "init\n").expect("write");
        run(&["add", "README.md"]);
        run(&[
            "-c",
            "user.name=Test User",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-m",
            "init",
        ]);
    }

    #[test]
    fn paths_describe_the_bore_layout() {
        let paths = ClusterPaths::new("/repo");
        assert_eq!(paths.db_path, Path::new("/repo/.bore/bore.db"));
        assert_eq!(paths.config_path, Path::new("/repo/.bore/config.json"));
        assert_eq!(paths.system_log_path, Path::new("/repo/.bore/logs/system.log"));
        assert_eq!(paths.worker_logs_dir, Path::new("/repo/.bore/logs/workers"));
        assert_eq!(paths.runs_dir, Path::new("/repo/.bore/runs"));
        assert_eq!(paths.worktrees_dir, Path::new("/repo/.bore/worktrees"));
    }

    #[test]
    fn init_rejects_non_git_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ClusterHandle::init(&CancelToken::new(), dir.path())
            .expect_err("plain dir must be rejected");
        assert!(matches!(err, ClusterError::NotAGitRepo { .. }));
    }

    #[test]
    fn open_requires_initialized_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_git_repo(dir.path());

        let err = ClusterHandle::open(&CancelToken::new(), dir.path())
            .expect_err("unopened cluster must be rejected");
        assert!(matches!(err, ClusterError::NotInitialized { .. }));
    }

    #[test]
    fn init_creates_layout_registers_cluster_and_updates_gitignore() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_git_repo(dir.path());
        let token = CancelToken::new();

        let handle = ClusterHandle::init(&token, dir.path()).expect("init");

        assert!(handle.paths.db_path.exists());
        assert!(handle.paths.config_path.exists());
        assert!(handle.paths.state_path.exists());
        assert!(handle.paths.worktrees_dir.is_dir());
        assert!(handle.paths.worker_logs_dir.is_dir());

        let gitignore =
            std::fs::read_to_string(dir.path().join(".gitignore")).expect("gitignore");
        assert!(gitignore.lines().any(|line| line.trim() == ".bore/"));

        // Re-opening finds the same cluster row.
        let reopened = ClusterHandle::open(&token, dir.path()).expect("open");
        assert_eq!(reopened.cluster.id, handle.cluster.id);
    }

    #[test]
    fn open_fails_on_invalid_config_without_partial_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_git_repo(dir.path());
        let token = CancelToken::new();

        ClusterHandle::init(&token, dir.path()).expect("init");
        let config_path = dir.path().join(".bore").join("config.json");
        std::fs::write(&config_path, r#"{"git": {"worktree_strategy": "clone"}}"#)
            .expect("write config");

        let err = ClusterHandle::open(&token, dir.path()).expect_err("invalid config");
        assert!(matches!(err, ClusterError::Config { .. }));
    }

    #[test]
    fn prepare_execution_creates_row_branch_and_worktree() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_git_repo(dir.path());
        let token = CancelToken::new();

        let handle = ClusterHandle::init(&token, dir.path()).expect("init");
        let thread = handle
            .store
            .create_thread(handle.cluster.id, "core", "")
            .expect("thread");
        let task = handle
            .store
            .create_task(
                handle.cluster.id,
                thread.id,
                "Add health endpoint",
                "Add a /health endpoint",
                bore_core::types::Complexity::Basic,
                bore_core::types::TaskMode::JustGetItDone,
            )
            .expect("task");

        let execution = handle
            .prepare_execution(&token, &task, None, "main")
            .expect("prepare");

        assert_eq!(execution.exec_branch, "bore/core-1-add-health-endpoint");
        assert!(Path::new(&execution.worktree_path).is_dir());
        assert!(handle
            .repo
            .branch_exists(&token, &execution.exec_branch)
            .expect("branch"));
        assert_eq!(
            handle.repo.current_branch(&token).expect("current"),
            "main"
        );
    }
}
