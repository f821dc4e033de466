//! Remote command values: results, execution policy, and command-line helpers.

use std::time::Duration;

use crate::domain::config::DEFAULT_NUM_RETRIES;
use crate::domain::error::ExecError;

/// Outcome of a remote command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    #[must_use]
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turns a non-zero exit into [`ExecError::NonZeroExit`].
    ///
    /// # Errors
    ///
    /// Returns the full stdout, stderr and exit code when the command failed.
    pub fn check(self, command: &str, host: &str) -> Result<Self, ExecError> {
        if self.success() {
            return Ok(self);
        }
        Err(ExecError::NonZeroExit {
            command: command.to_string(),
            host: host.to_string(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// Deadline and retry budget for one remote command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecPolicy {
    /// Per-attempt deadline. `None` waits indefinitely (and so never retries).
    pub timeout: Option<Duration>,
    /// Maximum attempts. Zero is treated as one.
    pub retries: u32,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: DEFAULT_NUM_RETRIES,
        }
    }
}

impl ExecPolicy {
    #[must_use]
    pub fn new(timeout: Option<Duration>, retries: u32) -> Self {
        Self { timeout, retries }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of attempts the executor will make.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

/// Joins an argument vector with single spaces, the way it is sent to the
/// remote shell. Arguments are not quoted, so shell syntax (`|`, `>`) passes
/// through.
#[must_use]
pub fn join_argv(argv: &[&str]) -> String {
    argv.join(" ")
}

/// Single-quotes `s` for POSIX `sh`.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wraps `command` so it keeps running after the channel that launched it closes.
#[must_use]
pub fn detached(command: &str) -> String {
    format!("nohup sh -c {} >/dev/null 2>&1 &", shell_quote(command))
}
