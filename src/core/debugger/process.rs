use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tracing::debug;

use crate::error::{ExecFlowError, Result};

/// Lifecycle control over the process a debugger session talks to
#[async_trait]
pub trait ProcessControl: Send {
    /// Whether the process has not exited yet
    fn is_running(&mut self) -> bool;

    /// Wait up to `grace` for the process to exit on its own
    async fn wait_for_exit(&mut self, grace: Duration) -> bool;

    /// Forcibly terminate the process
    async fn stop(&mut self) -> Result<()>;
}

/// I/O channels and control handle of a launched debugger
pub struct DebuggerProcess {
    /// Request channel (debugger stdin)
    pub requests: Box<dyn AsyncWrite + Send + Unpin>,
    /// Response channel (debugger stdout)
    pub responses: Box<dyn AsyncRead + Send + Unpin>,
    /// Error channel (debugger stderr)
    pub errors: Box<dyn AsyncRead + Send + Unpin>,
    pub control: Box<dyn ProcessControl>,
}

impl DebuggerProcess {
    /// Wrap a child spawned with all three standard streams piped
    pub fn from_child(mut child: Child) -> Result<Self> {
        let missing = |stream: &str| {
            ExecFlowError::ProcessCrash(format!("debugger {} was not captured", stream))
        };
        let requests = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let responses = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let errors = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        Ok(Self {
            requests: Box::new(requests),
            responses: Box::new(responses),
            errors: Box::new(errors),
            control: Box::new(ChildControl { child }),
        })
    }
}

/// [`ProcessControl`] over a tokio child process.
///
/// `Child::kill` sends SIGKILL on POSIX hosts and calls `TerminateProcess`
/// on Windows.
pub struct ChildControl {
    child: Child,
}

#[async_trait]
impl ProcessControl for ChildControl {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn wait_for_exit(&mut self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Debugger exited with {}", status);
                true
            }
            Ok(Err(_)) | Err(_) => false,
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if self.is_running() {
            self.child.kill().await?;
        }
        Ok(())
    }
}
