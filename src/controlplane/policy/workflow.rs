//! Workflow Runner
//!
//! Runs executors sequentially. Each executor gets up to `max_attempts`
//! tries separated by `interval`; the first executor to exhaust its budget
//! stops the workflow with [`Error::WorkflowFailed`]. An executor that polls
//! on its own reports exhaustion as [`Error::WorkflowFailed`] itself, which
//! is final.

use super::executors::Executor;
use super::RetryPolicy;
use crate::error::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An ordered list of initialized executors
pub struct Workflow {
    label: String,
    retry: RetryPolicy,
    steps: Vec<Box<dyn Executor>>,
}

impl Workflow {
    pub fn new(label: impl Into<String>, retry: RetryPolicy, steps: Vec<Box<dyn Executor>>) -> Self {
        Self {
            label: label.into(),
            retry,
            steps,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Executor names in execution order
    pub fn executor_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every executor to completion
    ///
    /// Cancellation is observed before each attempt and during the pause
    /// between attempts; already issued operations are not rolled back.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let max_attempts = self.retry.max_attempts.max(1);

        for step in &self.steps {
            let name = step.name();
            let mut attempt = 0;
            loop {
                if cancel.is_cancelled() {
                    return Err(Error::cancelled(format!("{} ({})", self.label, name)));
                }
                attempt += 1;
                match step.run().await {
                    Ok(()) => {
                        debug!("{}: {} succeeded on attempt {}", self.label, name, attempt);
                        break;
                    }
                    Err(e @ Error::Cancelled { .. }) | Err(e @ Error::WorkflowFailed { .. }) => {
                        return Err(e);
                    }
                    Err(e) if attempt >= max_attempts => {
                        return Err(Error::WorkflowFailed {
                            executor: name.to_string(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => {
                        warn!(
                            "{}: {} failed (attempt {}/{}): {}",
                            self.label, name, attempt, max_attempts, e
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                return Err(Error::cancelled(format!("{} ({})", self.label, name)));
                            }
                            _ = tokio::time::sleep(self.retry.interval) => {}
                        }
                    }
                }
            }
        }

        if !self.steps.is_empty() {
            info!("Workflow {} completed ({} step(s))", self.label, self.steps.len());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("label", &self.label)
            .field("retry", &self.retry)
            .field("steps", &self.executor_names())
            .finish()
    }
}
