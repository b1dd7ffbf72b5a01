//! Invocation of the external agent CLI with streamed output.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use bore_core::cancel::CancelToken;

use crate::json::extract_last_json;

/// Maximum length of a single output line. Longer lines end the reader with
/// a synthetic scanner-error line in the buffer.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("agent process failed to start ({command}): {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent process pipe setup failed ({command}): missing {stream}")]
    Pipe {
        command: String,
        stream: &'static str,
    },
    #[error("failed waiting for agent process ({command}): {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent process cancelled ({command})")]
    Cancelled { command: String },
}

/// Outcome of one CLI invocation.
///
/// A non-zero exit is not an error: callers inspect `json_block` to decide
/// whether the reply is usable. `exit_code` is `None` when the child was
/// killed by a signal rather than exiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub json_block: Option<String>,
}

/// Callback invoked synchronously for each complete output line.
pub type LineSink<'a> = Option<&'a (dyn Fn(&str) + Sync)>;

/// Executes the configured agent CLI as an external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRunner {
    cli_path: String,
    model: Option<String>,
}

impl AgentRunner {
    /// `cli_path` defaults to "claude" when empty; `model`, when non-empty,
    /// is passed via `--model`.
    pub fn new(cli_path: impl Into<String>, model: impl Into<String>) -> Self {
        let mut cli_path = cli_path.into();
        if cli_path.is_empty() {
            cli_path = "claude".to_string();
        }
        let model = model.into();
        Self {
            cli_path,
            model: (!model.is_empty()).then_some(model),
        }
    }

    /// Runs the agent CLI in `work_dir` with `prompt` delivered on stdin and
    /// `env` appended to the inherited environment.
    ///
    /// Stdout and stderr are read concurrently line-by-line; each line is
    /// appended (with trailing newline) to its stream buffer and delivered to
    /// the matching callback. Ordering is preserved per stream; interleaving
    /// between the streams is unspecified. Both readers drain to end of
    /// stream before the child is reaped, so a full pipe can never deadlock
    /// it. Blocks until the process exits or `token` is cancelled, in which
    /// case the child is killed.
    pub fn run(
        &self,
        token: &CancelToken,
        work_dir: &Path,
        prompt: &str,
        env: &[(String, String)],
        on_stdout: LineSink<'_>,
        on_stderr: LineSink<'_>,
    ) -> Result<RunOutput, RunnerError> {
        let mut args = vec!["-p".to_string()];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        let rendered = format!("{} {}", self.cli_path, args.join(" "));

        let mut child = Command::new(&self.cli_path)
            .args(&args)
            .current_dir(work_dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| RunnerError::Pipe {
            command: rendered.clone(),
            stream: "stdin",
        })?;
        let stdout = child.stdout.take().ok_or_else(|| RunnerError::Pipe {
            command: rendered.clone(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or_else(|| RunnerError::Pipe {
            command: rendered.clone(),
            stream: "stderr",
        })?;

        let (stdout_buf, stderr_buf, cancelled) = thread::scope(|scope| {
            // The prompt is written on its own thread: a child that emits
            // output before consuming stdin would otherwise deadlock against
            // a large prompt.
            scope.spawn(move || {
                let mut stdin = stdin;
                let _ = stdin.write_all(prompt.as_bytes());
            });

            let out_handle = scope.spawn(|| drain_lines(stdout, on_stdout));
            let err_handle = scope.spawn(|| drain_lines(stderr, on_stderr));

            let mut cancelled = false;
            loop {
                if !cancelled && token.is_cancelled() {
                    let _ = child.kill();
                    cancelled = true;
                }
                if out_handle.is_finished() && err_handle.is_finished() {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }

            let stdout_buf = out_handle.join().unwrap_or_default();
            let stderr_buf = err_handle.join().unwrap_or_default();
            (stdout_buf, stderr_buf, cancelled)
        });

        let status = child.wait().map_err(|source| RunnerError::Wait {
            command: rendered.clone(),
            source,
        })?;

        if cancelled {
            return Err(RunnerError::Cancelled { command: rendered });
        }

        let json_block = extract_last_json(&stdout_buf).map(str::to_string);

        Ok(RunOutput {
            stdout: stdout_buf,
            stderr: stderr_buf,
            exit_code: status.code(),
            json_block,
        })
    }
}

enum ReadLine {
    Line,
    Eof,
    TooLong,
}

/// Reads `reader` line-by-line into an accumulating buffer, invoking the
/// callback for each complete line. An oversized line appends a synthetic
/// scanner-error line and the remainder of the stream is discarded so the
/// child is never blocked on a full pipe.
fn drain_lines<R: Read>(reader: R, on_line: LineSink<'_>) -> String {
    let mut reader = BufReader::new(reader);
    let mut acc = String::new();
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();
        match read_line_limited(&mut reader, &mut line) {
            Ok(ReadLine::Eof) => break,
            Ok(ReadLine::Line) => {
                let text = String::from_utf8_lossy(&line);
                acc.push_str(&text);
                acc.push('\n');
                if let Some(callback) = on_line {
                    callback(&text);
                }
            }
            Ok(ReadLine::TooLong) => {
                acc.push_str(&format!(
                    "[scanner error: line exceeds {MAX_LINE_BYTES} bytes]\n"
                ));
                discard_to_eof(&mut reader);
                break;
            }
            Err(_) => break,
        }
    }

    acc
}

fn read_line_limited<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<ReadLine> {
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            if line.is_empty() {
                return Ok(ReadLine::Eof);
            }
            return Ok(ReadLine::Line);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                line.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                if line.len() > MAX_LINE_BYTES {
                    return Ok(ReadLine::TooLong);
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(ReadLine::Line);
            }
            None => {
                let len = available.len();
                line.extend_from_slice(available);
                reader.consume(len);
                if line.len() > MAX_LINE_BYTES {
                    return Ok(ReadLine::TooLong);
                }
            }
        }
    }
}

fn discard_to_eof<R: BufRead>(reader: &mut R) {
    loop {
        match reader.fill_buf() {
            Ok([]) | Err(_) => break,
            Ok(chunk) => {
                let len = chunk.len();
                reader.consume(len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bore_core::cancel::CancelToken;

    use super::{drain_lines, AgentRunner, RunnerError, MAX_LINE_BYTES};

    /// Treats `sh` as the agent CLI: the prompt arrives as a script on
    /// stdin, and `sh` tolerates the runner's `-p` flag.
    fn shell_runner() -> AgentRunner {
        AgentRunner::new("sh", "")
    }

    #[test]
    fn new_defaults_empty_cli_path_to_claude() {
        let runner = AgentRunner::new("", "");
        let debug = format!("{runner:?}");
        assert!(debug.contains("claude"));
    }

    #[test]
    fn run_streams_lines_and_extracts_last_json() {
        // `sh -p` reads the script from stdin (the -p flag is accepted and
        // only disables privilege processing).
        let runner = shell_runner();
        let dir = tempfile::tempdir().expect("tempdir");
        let seen = Mutex::new(Vec::<String>::new());

        let output = runner
            .run(
                &CancelToken::new(),
                dir.path(),
                "echo before\necho '{\"type\":\"worker_result\",\"outcome\":\"success\"}'\n",
                &[],
                Some(&|line: &str| seen.lock().unwrap().push(line.to_string())),
                None,
            )
            .expect("run");

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.contains("before\n"));
        assert_eq!(
            output.json_block.as_deref(),
            Some("{\"type\":\"worker_result\",\"outcome\":\"success\"}")
        );

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen[0], "before");
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn run_captures_stderr_separately() {
        let runner = shell_runner();
        let dir = tempfile::tempdir().expect("tempdir");

        let output = runner
            .run(
                &CancelToken::new(),
                dir.path(),
                "echo out\necho err >&2\n",
                &[],
                None,
                None,
            )
            .expect("run");

        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[test]
    fn non_zero_exit_is_not_an_error() {
        let runner = shell_runner();
        let dir = tempfile::tempdir().expect("tempdir");

        let output = runner
            .run(&CancelToken::new(), dir.path(), "exit 3\n", &[], None, None)
            .expect("run");

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.json_block, None);
    }

    #[test]
    fn extra_env_is_visible_to_the_child() {
        let runner = shell_runner();
        let dir = tempfile::tempdir().expect("tempdir");

        let output = runner
            .run(
                &CancelToken::new(),
                dir.path(),
                "echo \"$BORE_TEST_VAR\"\n",
                &[("BORE_TEST_VAR".to_string(), "visible".to_string())],
                None,
                None,
            )
            .expect("run");

        assert_eq!(output.stdout, "visible\n");
    }

    #[test]
    fn missing_binary_surfaces_spawn_error() {
        let runner = AgentRunner::new("/definitely/missing/agent-cli", "");
        let dir = tempfile::tempdir().expect("tempdir");

        let err = runner
            .run(&CancelToken::new(), dir.path(), "hi", &[], None, None)
            .expect_err("missing binary must fail");
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[test]
    fn cancellation_kills_the_child() {
        let runner = shell_runner();
        let dir = tempfile::tempdir().expect("tempdir");
        let token = CancelToken::new();

        let started = std::time::Instant::now();
        std::thread::scope(|scope| {
            let canceller = {
                let token = token.clone();
                scope.spawn(move || {
                    std::thread::sleep(std::time::Duration::from_millis(150));
                    token.cancel();
                })
            };

            let err = runner
                .run(&token, dir.path(), "sleep 30\n", &[], None, None)
                .expect_err("cancelled run must fail");
            assert!(matches!(err, RunnerError::Cancelled { .. }));
            canceller.join().expect("join canceller");
        });
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn oversized_line_produces_synthetic_scanner_error() {
        let big = vec![b'x'; MAX_LINE_BYTES + 16];
        let buf = drain_lines(std::io::Cursor::new(big), None);
        assert!(buf.contains("[scanner error: line exceeds"));
    }

    #[test]
    fn drain_lines_strips_carriage_returns() {
        let buf = drain_lines(std::io::Cursor::new(b"one\r\ntwo\n".to_vec()), None);
        assert_eq!(buf, "one\ntwo\n");
    }

    #[test]
    fn drain_lines_keeps_final_unterminated_line() {
        let buf = drain_lines(std::io::Cursor::new(b"one\ntail".to_vec()), None);
        assert_eq!(buf, "one\ntail\n");
    }
}
