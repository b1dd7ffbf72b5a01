//! Applies the user's post-execution choice from the diff review checkpoint.

use std::path::Path;

use bore_core::cancel::CancelToken;
use bore_core::types::{EventLevel, Status};
use bore_git::{GitError, Repo};

use crate::store::{SqliteStore, StoreError};

/// The user's decision for a reviewed execution.
///
/// `Merge`, `Revert`, and `Delete` are destructive; callers must confirm
/// with the user before invoking them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffAction {
    /// Stage, commit, merge into the base branch, and clean up the worktree
    /// and branch.
    Merge,
    /// Stage and commit on the execution branch, leaving the worktree for a
    /// manual merge.
    CommitOnly,
    /// Leave everything as-is.
    Keep,
    /// Discard all changes in the worktree.
    Revert,
    /// Remove the worktree and delete the execution branch.
    Delete,
}

#[derive(Debug, thiserror::Error)]
pub enum DiffActionError {
    #[error("diff action: {source}")]
    Store {
        #[from]
        source: StoreError,
    },
    #[error("diff action: {source}")]
    Git {
        #[from]
        source: GitError,
    },
}

/// Executes `action` against the execution's worktree and branch.
///
/// Merge atomicity: any step failing before the worktree removal leaves the
/// execution status unchanged and surfaces the error; partial remnants (a
/// commit without merge) are recoverable by re-invoking.
pub fn apply_diff_action(
    token: &CancelToken,
    store: &SqliteStore,
    repo: &Repo,
    execution_id: i64,
    action: DiffAction,
) -> Result<(), DiffActionError> {
    let execution = store.get_execution(execution_id)?;
    let worktree = Path::new(&execution.worktree_path);

    match action {
        DiffAction::Keep => Ok(()),

        DiffAction::CommitOnly => {
            repo.add_all(token, worktree)?;
            let message = format!(
                "bore: execution #{} on branch {}",
                execution.id, execution.exec_branch
            );
            repo.commit(token, worktree, &message)?;

            store.update_execution_status(execution.id, Status::Completed)?;
            store.update_task_status(execution.task_id, Status::Completed)?;
            Ok(())
        }

        DiffAction::Merge => {
            repo.add_all(token, worktree)?;
            repo.commit(token, worktree, &format!("bore: execution #{}", execution.id))?;

            let base_branch = if execution.base_branch.is_empty() {
                "main"
            } else {
                execution.base_branch.as_str()
            };
            repo.merge_into(token, base_branch, &execution.exec_branch)?;

            repo.remove_worktree(token, worktree)?;
            if let Err(err) = repo.delete_branch(token, &execution.exec_branch) {
                // Non-fatal: the merge landed and the worktree is gone.
                let _ = store.create_event(
                    execution.id,
                    EventLevel::Warn,
                    "branch_delete_error",
                    &format!("Failed to delete branch {}: {err}", execution.exec_branch),
                );
            }
            if let Err(err) = repo.prune_worktrees(token) {
                tracing::warn!(execution_id = execution.id, %err, "worktree prune failed");
            }

            store.update_execution_status(execution.id, Status::Completed)?;
            store.update_task_status(execution.task_id, Status::Completed)?;
            Ok(())
        }

        DiffAction::Revert => {
            repo.revert(token, worktree, true)?;

            store.update_execution_status(execution.id, Status::Interrupted)?;
            store.update_task_status(execution.task_id, Status::Interrupted)?;
            Ok(())
        }

        DiffAction::Delete => {
            repo.remove_worktree(token, worktree)?;
            if let Err(err) = repo.delete_branch(token, &execution.exec_branch) {
                let _ = store.create_event(
                    execution.id,
                    EventLevel::Warn,
                    "branch_delete_error",
                    &format!("Failed to delete branch {}: {err}", execution.exec_branch),
                );
            }
            if let Err(err) = repo.prune_worktrees(token) {
                tracing::warn!(execution_id = execution.id, %err, "worktree prune failed");
            }

            store.update_execution_status(execution.id, Status::Interrupted)?;
            store.update_task_status(execution.task_id, Status::Interrupted)?;
            Ok(())
        }
    }
}
