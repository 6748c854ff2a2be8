//! External command execution with captured output and a time bound.
//!
//! Every tool call goes through [`Cmd`], so all of them report failures the
//! same way: a non-zero exit becomes [`OverlayError::ToolFailure`] carrying
//! stderr, and running past the timeout kills the child and becomes
//! [`OverlayError::Timeout`].

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::OverlayError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Stderr if non-empty, otherwise stdout; tools differ in where they
    /// print diagnostics.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Builder for one external tool invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            timeout: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return non-zero exits as a result instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn run(self) -> Result<CommandResult> {
        log::debug!("running {} {}", self.program, self.args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        // Drain both pipes on their own threads so a chatty tool cannot
        // block on a full pipe while we wait for it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.wait(&mut child)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(OverlayError::Timeout {
                    tool: self.program.clone(),
                    seconds: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
                }
                .into());
            }
        };

        let result = CommandResult {
            status,
            stdout: join_output(stdout),
            stderr: join_output(stderr),
        };

        if !self.allow_fail && !result.success() {
            return Err(OverlayError::ToolFailure {
                tool: self.program,
                status: format!("exit code {}", result.code()),
                diagnostic: result.diagnostic(),
            }
            .into());
        }
        Ok(result)
    }

    /// `None` when the timeout expired first.
    fn wait(&self, child: &mut Child) -> Result<Option<ExitStatus>> {
        let Some(timeout) = self.timeout else {
            let status = child
                .wait()
                .with_context(|| format!("waiting for '{}'", self.program))?;
            return Ok(Some(status));
        };

        let start = Instant::now();
        loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("waiting for '{}'", self.program))?
            {
                return Ok(Some(status));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let res = Cmd::new("sh").args(["-c", "echo hello"]).run().unwrap();
        assert!(res.success());
        assert_eq!(res.stdout.trim(), "hello");
    }

    #[test]
    fn non_zero_exit_is_tool_failure_with_stderr() {
        let err = Cmd::new("sh")
            .args(["-c", "echo 'syntax error' >&2; exit 3"])
            .run()
            .unwrap_err();
        match err.downcast_ref::<OverlayError>() {
            Some(OverlayError::ToolFailure {
                status, diagnostic, ..
            }) => {
                assert_eq!(status, "exit code 3");
                assert_eq!(diagnostic, "syntax error");
            }
            other => panic!("expected ToolFailure, got {other:?}"),
        }
    }

    #[test]
    fn allow_fail_returns_status() {
        let res = Cmd::new("sh")
            .args(["-c", "exit 1"])
            .allow_fail()
            .run()
            .unwrap();
        assert_eq!(res.code(), 1);
    }

    #[test]
    fn slow_tool_times_out() {
        let start = Instant::now();
        let err = Cmd::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(200))
            .run()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OverlayError>(),
            Some(OverlayError::Timeout { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_reported() {
        let err = Cmd::new("definitely_not_a_real_command_12345")
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("Is it installed?"));
    }
}
