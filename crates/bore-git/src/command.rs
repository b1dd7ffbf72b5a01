use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use bore_core::cancel::CancelToken;

use crate::error::GitError;

/// How often the driver checks for child exit and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    pub binary: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Runs a git command in `cwd`, honouring cancellation.
    ///
    /// Output pipes are drained on dedicated threads while the parent polls
    /// for exit, so a large diff can never fill a pipe buffer and deadlock
    /// the child. On cancellation the child is killed and
    /// `GitError::Cancelled` is returned. A non-zero exit becomes
    /// `GitError::CommandFailed` with stderr carried verbatim.
    pub fn run<I, S>(&self, token: &CancelToken, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let rendered = render_command(&self.binary, &owned_args);

        let mut child = Command::new(&self.binary)
            .args(&owned_args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| GitError::Io {
                command: rendered.clone(),
                source,
            })?;

        let stdout_handle = child.stdout.take().map(spawn_drain);
        let stderr_handle = child.stderr.take().map(spawn_drain);

        let status = loop {
            if token.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                join_drain(stdout_handle);
                join_drain(stderr_handle);
                return Err(GitError::Cancelled { command: rendered });
            }

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    join_drain(stdout_handle);
                    join_drain(stderr_handle);
                    return Err(GitError::Io {
                        command: rendered,
                        source,
                    });
                }
            }
        };

        let stdout_bytes = join_drain(stdout_handle);
        let stderr_bytes = join_drain(stderr_handle);

        let stdout =
            String::from_utf8(stdout_bytes).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stdout",
                source,
            })?;
        let stderr =
            String::from_utf8(stderr_bytes).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stderr",
                source,
            })?;

        if !status.success() {
            return Err(GitError::CommandFailed {
                command: rendered,
                status: status.code(),
                stdout,
                stderr,
            });
        }

        Ok(GitOutput { stdout, stderr })
    }
}

fn spawn_drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use bore_core::cancel::CancelToken;

    use super::GitCli;
    use crate::error::GitError;

    #[test]
    fn run_returns_stdout_for_successful_command() {
        let git = GitCli::default();
        let cwd = tempfile::tempdir().expect("tempdir");

        let output = git
            .run(&CancelToken::new(), cwd.path(), ["--version"])
            .expect("git --version should succeed");

        assert!(output.stdout.to_ascii_lowercase().contains("git version"));
    }

    #[test]
    fn run_classifies_non_zero_exit_as_command_failed() {
        let git = GitCli::default();
        let cwd = tempfile::tempdir().expect("tempdir");

        let err = git
            .run(
                &CancelToken::new(),
                cwd.path(),
                ["definitely-not-a-real-git-subcommand"],
            )
            .expect_err("unknown git subcommand should fail");
        match err {
            GitError::CommandFailed {
                command,
                status,
                stdout: _,
                stderr,
            } => {
                assert!(command.contains("definitely-not-a-real-git-subcommand"));
                assert!(status.is_some());
                assert!(!stderr.trim().is_empty());
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn run_classifies_missing_binary_as_io_error() {
        let git = GitCli::new("/definitely/missing/git-binary");
        let cwd = tempfile::tempdir().expect("tempdir");

        let err = git
            .run(&CancelToken::new(), cwd.path(), ["status"])
            .expect_err("missing binary should fail");
        match err {
            GitError::Io { command, source } => {
                assert!(command.contains("/definitely/missing/git-binary"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn run_observes_pre_cancelled_token() {
        let git = GitCli::default();
        let cwd = tempfile::tempdir().expect("tempdir");
        let token = CancelToken::new();
        token.cancel();

        let err = git
            .run(&token, cwd.path(), ["--version"])
            .expect_err("cancelled run should fail");
        assert!(matches!(err, GitError::Cancelled { .. }));
    }
}
