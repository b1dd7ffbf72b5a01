use std::path::PathBuf;
use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("git command cancelled ({command})")]
    Cancelled { command: String },
    #[error("git command output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8Output {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("path is not inside a git repository: {path}")]
    NotARepository { path: PathBuf },
    #[error("working tree at {dir} has changes; pass force to discard them")]
    DirtyTree { dir: PathBuf },
    #[error("invalid git output: {context}")]
    Parse { context: String },
}

#[cfg(test)]
mod tests {
    use super::GitError;
    use std::error::Error;
    use std::path::PathBuf;

    #[test]
    fn io_variant_includes_command_and_io_message() {
        let err = GitError::Io {
            command: "git status".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing binary"),
        };

        let rendered = err.to_string();
        assert!(rendered.contains("git command failed to start (git status)"));
        assert!(rendered.contains("missing binary"));
        assert!(err.source().is_some());
    }

    #[test]
    fn command_failed_variant_carries_stderr_verbatim() {
        let err = GitError::CommandFailed {
            command: "git merge topic".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "CONFLICT (content): Merge conflict in a.rs".to_string(),
        };

        let rendered = err.to_string();
        assert!(rendered.contains("git merge topic"));
        assert!(rendered.contains("CONFLICT (content): Merge conflict in a.rs"));
    }

    #[test]
    fn dirty_tree_and_cancelled_variants_name_their_subject() {
        let dirty = GitError::DirtyTree {
            dir: PathBuf::from("/repo/.bore/worktrees/x"),
        };
        assert!(dirty.to_string().contains("/repo/.bore/worktrees/x"));

        let cancelled = GitError::Cancelled {
            command: "git worktree add".to_string(),
        };
        assert!(cancelled.to_string().contains("git worktree add"));
    }
}
