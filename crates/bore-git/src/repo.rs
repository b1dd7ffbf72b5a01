use std::path::{Path, PathBuf};

use bore_core::cancel::CancelToken;

use crate::command::GitCli;
use crate::error::GitError;

/// Handle on the main repository checkout.
///
/// Operations on the main checkout run in `root`; worktree-scoped operations
/// take an explicit directory. The main HEAD is never checked out or moved
/// except by `merge_into`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub root: PathBuf,
    git: GitCli,
}

impl Repo {
    /// Opens a repo handle on `path`. The path must exist; whether it is a
    /// git work tree is checked separately via [`Repo::is_git_repo`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GitError> {
        Self::open_with(path, GitCli::default())
    }

    pub fn open_with(path: impl Into<PathBuf>, git: GitCli) -> Result<Self, GitError> {
        let root = path.into();
        std::fs::metadata(&root).map_err(|source| GitError::Io {
            command: format!("stat {}", root.display()),
            source,
        })?;
        Ok(Self { root, git })
    }

    /// Clones `url` into `dest`. Standalone: does not require an existing repo.
    pub fn clone_remote(token: &CancelToken, url: &str, dest: &Path) -> Result<(), GitError> {
        let git = GitCli::default();
        let dest = dest.display().to_string();
        git.run(token, Path::new("."), ["clone", url, dest.as_str()])?;
        Ok(())
    }

    /// Reports whether `path` is inside a git work tree. Checks for a `.git`
    /// entry first and falls back to asking git.
    pub fn is_git_repo(token: &CancelToken, path: &Path) -> bool {
        if let Ok(meta) = std::fs::metadata(path.join(".git")) {
            return meta.is_dir() || meta.is_file();
        }

        GitCli::default()
            .run(token, path, ["rev-parse", "--is-inside-work-tree"])
            .is_ok()
    }

    /// URL of the `origin` remote, when one is configured.
    pub fn remote_url(&self, token: &CancelToken) -> Option<String> {
        self.run(token, ["remote", "get-url", "origin"]).ok()
    }

    /// Names of all local branches, unadorned.
    pub fn list_branches(&self, token: &CancelToken) -> Result<Vec<String>, GitError> {
        let out = self.run(token, ["branch", "--list"])?;

        let branches = out
            .lines()
            .map(|line| line.trim_start_matches('*').trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(branches)
    }

    /// Name of the currently checked-out branch; "HEAD" when detached.
    pub fn current_branch(&self, token: &CancelToken) -> Result<String, GitError> {
        self.run(token, ["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn branch_exists(&self, token: &CancelToken, name: &str) -> Result<bool, GitError> {
        let refname = format!("refs/heads/{name}");
        match self.run(token, ["rev-parse", "--verify", refname.as_str()]) {
            Ok(_) => Ok(true),
            Err(GitError::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Creates `name` at the tip of `base_branch` without checking it out.
    pub fn create_branch(
        &self,
        token: &CancelToken,
        name: &str,
        base_branch: &str,
    ) -> Result<(), GitError> {
        self.run(token, ["branch", name, base_branch])?;
        Ok(())
    }

    /// Force-deletes the named branch.
    pub fn delete_branch(&self, token: &CancelToken, name: &str) -> Result<(), GitError> {
        self.run(token, ["branch", "-D", name])?;
        Ok(())
    }

    /// Runs git in the repo root, returning trimmed stdout.
    pub(crate) fn run<I, S>(&self, token: &CancelToken, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.run_in(token, &self.root, args)
    }

    /// Runs git in an arbitrary directory (worktree operations), returning
    /// trimmed stdout.
    pub(crate) fn run_in<I, S>(
        &self,
        token: &CancelToken,
        dir: &Path,
        args: I,
    ) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let out = self.git.run(token, dir, args)?;
        Ok(out.stdout.trim().to_string())
    }
}
