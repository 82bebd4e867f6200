//! Batched remote queries.
//!
//! A single stack frame needs several independent round trips (line number,
//! source name, type signature). [`BatchDispatcher`] runs such a batch either
//! concurrently, one Tokio task per query, or strictly in order on the caller.
//! The mode is a session-wide policy: some transports do not tolerate
//! overlapping outstanding commands.

use futures::future::BoxFuture;
use nova_jdwp::JdwpError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::AbortHandle;

/// One remote query. Tasks are lazy; nothing is sent until the dispatcher
/// polls them.
pub type Task<T> = BoxFuture<'static, Result<T, JdwpError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DispatchMode {
    #[default]
    Serial,
    Concurrent,
}

/// Some queries of a batch failed. `failures` holds `(input index, error)`
/// in input order.
#[derive(Debug, Error)]
#[error("{} of {total} batched queries failed (first: {})", failures.len(), first_message(failures))]
pub struct PartialFailure {
    pub total: usize,
    pub failures: Vec<(usize, JdwpError)>,
}

fn first_message(failures: &[(usize, JdwpError)]) -> String {
    failures
        .first()
        .map(|(_, err)| err.to_string())
        .unwrap_or_default()
}

impl PartialFailure {
    pub fn is_target_gone(&self) -> bool {
        self.failures.iter().any(|(_, err)| err.is_target_gone())
    }

    pub fn into_first_error(self) -> Option<JdwpError> {
        self.failures.into_iter().next().map(|(_, err)| err)
    }
}

/// Aborts still-running concurrent tasks if the joining future is dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchDispatcher {
    mode: DispatchMode,
}

impl BatchDispatcher {
    pub fn new(mode: DispatchMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn is_concurrent(&self) -> bool {
        self.mode == DispatchMode::Concurrent
    }

    /// Run every task and report each outcome, in input order.
    pub async fn settle<T>(&self, tasks: Vec<Task<T>>) -> Vec<Result<T, JdwpError>>
    where
        T: Send + 'static,
    {
        let mut out = Vec::with_capacity(tasks.len());
        match self.mode {
            DispatchMode::Serial => {
                for task in tasks {
                    out.push(task.await);
                }
            }
            DispatchMode::Concurrent => {
                let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();
                let _guard = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());
                for handle in handles {
                    out.push(match handle.await {
                        Ok(result) => result,
                        Err(err) if err.is_cancelled() => Err(JdwpError::Cancelled),
                        Err(err) => {
                            tracing::error!(target: "nova.dap", error = %err, "batched query panicked");
                            Err(JdwpError::Protocol(format!("batched query panicked: {err}")))
                        }
                    });
                }
            }
        }
        out
    }

    /// Run every task; succeed only if all of them did.
    pub async fn run_all<T>(&self, tasks: Vec<Task<T>>) -> Result<Vec<T>, PartialFailure>
    where
        T: Send + 'static,
    {
        let total = tasks.len();
        let mut values = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (idx, result) in self.settle(tasks).await.into_iter().enumerate() {
            match result {
                Ok(value) => values.push(value),
                Err(err) => failures.push((idx, err)),
            }
        }
        if failures.is_empty() {
            Ok(values)
        } else {
            Err(PartialFailure { total, failures })
        }
    }

    /// Run every task and concatenate their lists in task-input order.
    pub async fn flatten<T>(&self, tasks: Vec<Task<Vec<T>>>) -> Result<Vec<T>, PartialFailure>
    where
        T: Send + 'static,
    {
        Ok(self.run_all(tasks).await?.into_iter().flatten().collect())
    }
}
