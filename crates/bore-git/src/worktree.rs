use std::path::{Path, PathBuf};

use bore_core::cancel::CancelToken;

use crate::error::GitError;
use crate::repo::Repo;

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    pub branch: Option<String>,
    pub bare: bool,
}

impl Repo {
    /// Adds a worktree at `path` and simultaneously creates `new_branch`
    /// starting at `base_branch`.
    ///
    /// Runs `git worktree add -b <new> <path> <base>`. This never touches the
    /// main checkout's HEAD. Fails when the path exists, the branch exists,
    /// or the base branch is unknown; git's stderr is carried in the error.
    pub fn create_worktree_new_branch(
        &self,
        token: &CancelToken,
        path: &Path,
        new_branch: &str,
        base_branch: &str,
    ) -> Result<(), GitError> {
        let path = path.display().to_string();
        self.run(
            token,
            [
                "worktree",
                "add",
                "-b",
                new_branch,
                path.as_str(),
                base_branch,
            ],
        )?;
        Ok(())
    }

    /// Force-removes the worktree directory and its registration.
    pub fn remove_worktree(&self, token: &CancelToken, path: &Path) -> Result<(), GitError> {
        let path = path.display().to_string();
        self.run(token, ["worktree", "remove", path.as_str(), "--force"])?;
        Ok(())
    }

    pub fn list_worktrees(&self, token: &CancelToken) -> Result<Vec<WorktreeEntry>, GitError> {
        let out = self.run(token, ["worktree", "list", "--porcelain"])?;
        parse_worktree_list(&out)
    }

    /// Removes stale administrative data for externally deleted worktree
    /// directories. Called after every removal.
    pub fn prune_worktrees(&self, token: &CancelToken) -> Result<(), GitError> {
        self.run(token, ["worktree", "prune"])?;
        Ok(())
    }
}

fn parse_worktree_list(raw: &str) -> Result<Vec<WorktreeEntry>, GitError> {
    let mut entries = Vec::new();

    let mut path: Option<PathBuf> = None;
    let mut head: Option<String> = None;
    let mut branch: Option<String> = None;
    let mut bare = false;

    for line in raw.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(path) = path.take() {
                entries.push(WorktreeEntry {
                    path,
                    head: head.take(),
                    branch: branch.take(),
                    bare: std::mem::take(&mut bare),
                });
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest.trim()));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.trim().trim_start_matches("refs/heads/").to_string());
        } else if line == "bare" {
            bare = true;
        }
        // "detached" and unknown attribute lines are skipped.
    }

    if entries.is_empty() && !raw.trim().is_empty() {
        return Err(GitError::Parse {
            context: "unable to parse git worktree list output".to_string(),
        });
    }

    Ok(entries)
}
