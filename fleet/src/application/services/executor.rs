//! Bounded command execution.
//!
//! Runs one remote command with a per-attempt deadline. A hung attempt is
//! abandoned (its future dropped, which cancels the worker) and the command
//! is retried, up to the policy's attempt budget.

use anyhow::Result;
use tracing::{debug, warn};

use crate::application::ports::{OutputCapture, RemoteSession};
use crate::domain::command::{CommandResult, ExecPolicy};
use crate::domain::error::ExecError;

/// Run `command` on `session` under `policy`.
///
/// The returned [`CommandResult`] may carry a non-zero exit code; callers
/// that need success use [`CommandResult::check`].
///
/// # Errors
///
/// Returns [`ExecError::Timeout`] with the last attempt's partial output when
/// every attempt overruns its deadline. Transport errors from the session are
/// returned immediately without retrying.
pub async fn run_bounded<S: RemoteSession>(
    session: &S,
    host: &str,
    command: &str,
    policy: &ExecPolicy,
) -> Result<CommandResult> {
    let Some(deadline) = policy.timeout else {
        debug!(host, command, "exec");
        let capture = OutputCapture::new();
        return session.exec(command, &capture).await;
    };

    let attempts = policy.attempts();
    let mut last_output = (String::new(), String::new());
    for attempt in 1..=attempts {
        debug!(host, command, attempt, "exec");
        let capture = OutputCapture::new();
        match tokio::time::timeout(deadline, session.exec(command, &capture)).await {
            Ok(result) => return result,
            Err(_) => {
                warn!(
                    host,
                    command,
                    attempt,
                    attempts,
                    timeout_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    "command timed out"
                );
                last_output = capture.snapshot();
            }
        }
    }

    let (stdout, stderr) = last_output;
    Err(ExecError::Timeout {
        command: command.to_string(),
        host: host.to_string(),
        attempts,
        stdout,
        stderr,
    }
    .into())
}
