//! Keeps `.bore/` out of the managed repository's history.

use std::fs;
use std::path::{Path, PathBuf};

pub const IGNORE_LINE: &str = ".bore/";

#[derive(Debug, thiserror::Error)]
pub enum GitignoreError {
    #[error("failed to read .gitignore at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write .gitignore at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Appends `.bore/` to the repo's `.gitignore` unless an equal (trimmed)
/// line is already present, preserving the file's line-ending style.
pub fn ensure_gitignore(repo_path: &Path) -> Result<(), GitignoreError> {
    let path = repo_path.join(".gitignore");

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(GitignoreError::Read {
                path,
                source,
            })
        }
    };

    let uses_crlf = content.contains("\r\n");
    let normalized = content.replace("\r\n", "\n");

    if normalized.lines().any(|line| line.trim() == IGNORE_LINE) {
        return Ok(());
    }

    let mut updated = if normalized.is_empty() {
        format!("{IGNORE_LINE}\n")
    } else if normalized.ends_with('\n') {
        format!("{normalized}{IGNORE_LINE}\n")
    } else {
        format!("{normalized}\n{IGNORE_LINE}\n")
    };

    if uses_crlf {
        updated = updated.replace('\n', "\r\n");
    }

    fs::write(&path, updated).map_err(|source| GitignoreError::Write { path, source })
}

#[cfg(test)]
mod tests {
    use super::ensure_gitignore;

    #[test]
    fn creates_gitignore_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        ensure_gitignore(dir.path()).expect("ensure");

        let body = std::fs::read_to_string(dir.path().join(".gitignore")).expect("read");
        assert_eq!(body, ".bore/\n");
    }

    #[test]
    fn appends_to_existing_file_with_trailing_newline() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".gitignore"), "target/\n").expect("write");

        ensure_gitignore(dir.path()).expect("ensure");
        let body = std::fs::read_to_string(dir.path().join(".gitignore")).expect("read");
        assert_eq!(body, "target/\n.bore/\n");
    }

    #[test]
    fn appends_newline_first_when_file_lacks_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".gitignore"), "target/").expect("write");

        ensure_gitignore(dir.path()).expect("ensure");
        let body = std::fs::read_to_string(dir.path().join(".gitignore")).expect("read");
        assert_eq!(body, "target/\n.bore/\n");
    }

    #[test]
    fn is_idempotent_and_matches_trimmed_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".gitignore"), "  .bore/  \n").expect("write");

        ensure_gitignore(dir.path()).expect("ensure");
        let body = std::fs::read_to_string(dir.path().join(".gitignore")).expect("read");
        assert_eq!(body, "  .bore/  \n");
    }

    #[test]
    fn preserves_crlf_line_endings() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".gitignore"), "target/\r\n").expect("write");

        ensure_gitignore(dir.path()).expect("ensure");
        let body = std::fs::read_to_string(dir.path().join(".gitignore")).expect("read");
        assert_eq!(body, "target/\r\n.bore/\r\n");
    }
}
