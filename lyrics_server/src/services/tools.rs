//! External command runner shared by the downloader, separator and ffmpeg
//! helpers.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

/// Stderr kept in errors, in bytes.
const STDERR_LIMIT: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{tool} could not be started: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with code {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },
    #[error("{tool} timed out after {secs}s")]
    TimedOut { tool: String, secs: u64 },
}

/// Captured result of a successful invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
}

impl ToolOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Keep the tail of a long stderr stream, where tools print the actual error.
pub fn truncate_tail(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...truncated...\n{}", &text[start..])
}

/// Run `program args...` to completion, killing it after `timeout`.
pub async fn run<I, S>(
    program: &str,
    args: I,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ToolOutput, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let started = Instant::now();
    let result = tokio::time::timeout(timeout, cmd.output()).await;
    crate::metrics::tool_invoked(program, started.elapsed().as_millis() as u64);

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ToolError::Spawn {
                tool: program.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(ToolError::TimedOut {
                tool: program.to_string(),
                secs: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);
        tracing::warn!(tool = program, code, "Tool failed");
        return Err(ToolError::Failed {
            tool: program.to_string(),
            code,
            stderr: truncate_tail(&stderr, STDERR_LIMIT),
        });
    }

    Ok(ToolOutput {
        stdout: output.stdout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_stderr_is_kept_whole() {
        assert_eq!(truncate_tail("  boom \n", 64), "boom");
    }

    #[test]
    fn long_stderr_keeps_the_tail() {
        let text = format!("{}ERROR: video unavailable", "x".repeat(100));
        let cut = truncate_tail(&text, 24);
        assert!(cut.starts_with("...truncated...\n"));
        assert!(cut.ends_with("ERROR: video unavailable"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = run(
            "definitely-not-a-real-tool-7d1f",
            ["--version"],
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reports_stderr() {
        let err = run(
            "sh",
            ["-c", "echo 'no such format' >&2; exit 3"],
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        match err {
            ToolError::Failed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "no such format");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_tool_times_out() {
        let err = run("sleep", ["5"], None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }
}
