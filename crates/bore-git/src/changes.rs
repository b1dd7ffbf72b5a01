//! Working-tree change capture and the commit/merge/revert operations used
//! by the diff action executor.

use std::path::Path;

use bore_core::cancel::CancelToken;

use crate::error::GitError;
use crate::repo::Repo;

impl Repo {
    /// Short-format status of the working tree at `dir`.
    pub fn status(&self, token: &CancelToken, dir: &Path) -> Result<String, GitError> {
        self.run_in(token, dir, ["status", "--short"])
    }

    /// Unstaged diff for the working tree at `dir`.
    pub fn diff(&self, token: &CancelToken, dir: &Path) -> Result<String, GitError> {
        self.run_in(token, dir, ["diff"])
    }

    /// Staged (index) diff for the working tree at `dir`.
    pub fn diff_staged(&self, token: &CancelToken, dir: &Path) -> Result<String, GitError> {
        self.run_in(token, dir, ["diff", "--staged"])
    }

    /// Combined unstaged and staged diff, blank-line-separated when both are
    /// non-empty.
    pub fn diff_all(&self, token: &CancelToken, dir: &Path) -> Result<String, GitError> {
        let unstaged = self.diff(token, dir)?;
        let staged = self.diff_staged(token, dir)?;

        Ok(match (unstaged.is_empty(), staged.is_empty()) {
            (false, false) => format!("{unstaged}\n\n{staged}"),
            (false, true) => unstaged,
            _ => staged,
        })
    }

    /// Whether the working tree at `dir` has any uncommitted modifications,
    /// staged or unstaged, including untracked files.
    pub fn has_changes(&self, token: &CancelToken, dir: &Path) -> Result<bool, GitError> {
        Ok(!self.status(token, dir)?.is_empty())
    }

    /// Stages all changes (new, modified, deleted) at `dir`.
    pub fn add_all(&self, token: &CancelToken, dir: &Path) -> Result<(), GitError> {
        self.run_in(token, dir, ["add", "-A"])?;
        Ok(())
    }

    pub fn commit(&self, token: &CancelToken, dir: &Path, message: &str) -> Result<(), GitError> {
        self.run_in(token, dir, ["commit", "-m", message])?;
        Ok(())
    }

    /// Discards all changes (tracked and untracked) at `dir`, restoring the
    /// last commit. When `force` is false and the tree is dirty the call is
    /// refused instead of silently discarding work.
    pub fn revert(&self, token: &CancelToken, dir: &Path, force: bool) -> Result<(), GitError> {
        if !force && self.has_changes(token, dir)? {
            return Err(GitError::DirtyTree {
                dir: dir.to_path_buf(),
            });
        }

        self.run_in(token, dir, ["checkout", "--", "."])?;
        self.run_in(token, dir, ["clean", "-fd"])?;
        Ok(())
    }

    /// Checks out `target` in the main repo and merges `source` into it with
    /// no fast-forward and a deterministic message. This is the only
    /// operation that moves the main checkout's HEAD.
    pub fn merge_into(
        &self,
        token: &CancelToken,
        target: &str,
        source: &str,
    ) -> Result<(), GitError> {
        self.run(token, ["checkout", target])?;
        let message = format!("bore: merge {source} into {target}");
        self.run(token, ["merge", "--no-ff", source, "-m", message.as_str()])?;
        Ok(())
    }

    /// Most recent commits at `dir`, one per line.
    pub fn commit_log(
        &self,
        token: &CancelToken,
        dir: &Path,
        count: usize,
    ) -> Result<String, GitError> {
        let count = count.to_string();
        self.run_in(token, dir, ["log", "--oneline", "-n", count.as_str()])
    }
}
