//! Bounded subprocess invocation for external codec tools.
//!
//! The Android paths delegate two jobs to external programs: binary
//! manifest decompilation and bundletool's APK-set build/extract. Both go
//! through [`ExternalTool::run`], which pipes stdout/stderr, enforces a
//! timeout, and kills the child when it fires. The interface is kept
//! narrow (program, args, timeout) so a tool can be swapped for a native
//! decoder without touching the extractors.

use std::ffi::OsStr;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;

use crate::error::ExtractError;

/// Default wall-clock budget per tool invocation.
const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// How much captured stderr to carry into an error.
const STDERR_TAIL: usize = 2048;

/// Captured output of a successful tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
}

/// An external program reached via bounded subprocess calls.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    name: String,
    program: PathBuf,
    timeout: Duration,
}

impl ExternalTool {
    /// Use an explicit program path.
    pub fn new(name: &str, program: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            program,
            timeout: TOOL_TIMEOUT,
        }
    }

    /// Locate the tool: an env-var override wins, otherwise search `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ExternalTool`] when the program cannot be
    /// found either way.
    pub fn resolve(name: &str, env_override: &str) -> Result<Self, ExtractError> {
        let program = std::env::var_os(env_override)
            .map(PathBuf::from)
            .or_else(|| which::which(name).ok())
            .ok_or_else(|| ExtractError::ExternalTool {
                tool: name.to_string(),
                reason: format!("`{name}` not found on PATH (set {env_override} to override)"),
            })?;
        Ok(Self::new(name, program))
    }

    /// Override the invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tool name used in errors and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the tool to completion with the given arguments.
    ///
    /// stdout and stderr are drained on separate threads so a chatty child
    /// cannot deadlock against a full pipe while we wait on it.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ExternalTool`] on spawn failure, non-zero
    /// exit (with a stderr tail for triage), or timeout - in which case
    /// the child is killed and reaped before the error propagates.
    pub fn run<I, S>(&self, args: I) -> Result<ToolOutput, ExtractError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        debug!(tool = %self.name, program = %self.program.display(), ?args, "invoking external tool");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| self.failure(format!("failed to spawn: {err}")))?;

        let stdout_handle = drain(child.stdout.take());
        let stderr_handle = drain(child.stderr.take());

        let status = match child
            .wait_timeout(self.timeout)
            .map_err(ExtractError::Io)?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(self.failure(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();

        if !status.success() {
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(self.failure(format!(
                "exit status {:?}: {}",
                status.code(),
                tail.trim()
            )));
        }

        Ok(ToolOutput { stdout, stderr })
    }

    fn failure(&self, reason: String) -> ExtractError {
        ExtractError::ExternalTool {
            tool: self.name.clone(),
            reason,
        }
    }
}

/// Drain a child pipe on a background thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn script_tool(dir: &std::path::Path, body: &str) -> ExternalTool {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("tool.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        ExternalTool::new("tool", path)
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_run_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script_tool(dir.path(), "echo hello \"$1\"");
        let output = tool.run(["world"]).unwrap();
        assert_eq!(output.stdout.trim(), "hello world");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script_tool(dir.path(), "echo broken >&2; exit 3");
        let err = tool.run::<[&str; 0], _>([]).unwrap_err();
        match err {
            ExtractError::ExternalTool { tool, reason } => {
                assert_eq!(tool, "tool");
                assert!(reason.contains("broken"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let tool =
            script_tool(dir.path(), "sleep 30").with_timeout(Duration::from_millis(200));
        let err = tool.run::<[&str; 0], _>([]).unwrap_err();
        assert!(matches!(err, ExtractError::ExternalTool { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_missing_program_is_tool_failure() {
        let tool = ExternalTool::new("ghost", PathBuf::from("/nonexistent/ghost-tool"));
        let err = tool.run(["--version"]).unwrap_err();
        assert!(matches!(err, ExtractError::ExternalTool { .. }));
    }
}
