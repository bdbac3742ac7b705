//! Cloneable handle to one capability's supervisor.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::capability::Capability;
use crate::worker::supervisor::Command;
use crate::worker::{spawn_supervisor, SupervisorConfig, WorkerError, WorkerResult, WorkerStatus};

/// Submission side of one capability pipeline.
///
/// Cheap to clone; every clone talks to the same supervisor task and
/// therefore the same worker process and queue.
#[derive(Clone)]
pub struct WorkerService {
    capability: Capability,
    commands: tokio::sync::mpsc::UnboundedSender<Command>,
    status: watch::Receiver<WorkerStatus>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WorkerService {
    /// Start the supervisor for `config`. Must be called inside a tokio runtime.
    ///
    /// The worker process is launched in the background; submissions made
    /// before it is ready are queued.
    pub fn start(config: SupervisorConfig) -> Self {
        let capability = config.capability;
        let handle = spawn_supervisor(config);
        Self {
            capability,
            commands: handle.commands,
            status: handle.status,
            task: Arc::new(Mutex::new(Some(handle.task))),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Submit a request and wait for the worker's answer.
    ///
    /// Resolves with the `result` value of the matching response line, or
    /// with the error that rejected the request.
    pub async fn submit<P: Serialize>(&self, payload: &P) -> WorkerResult<Value> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| WorkerError::SerializeFailed(e.to_string()))?;

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Submit { payload, reply })
            .map_err(|_| WorkerError::ShuttingDown)?;

        response.await?
    }

    /// [`submit`](Self::submit), then deserialize the result into `R`.
    pub async fn submit_as<P, R>(&self, payload: &P) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let value = self.submit(payload).await?;
        serde_json::from_value(value).map_err(|e| {
            WorkerError::protocol(format!("unexpected {} result: {}", self.capability, e))
        })
    }

    /// Snapshot of the supervisor's current status.
    pub fn status(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }

    /// Stop the worker and reject everything still pending.
    ///
    /// Idempotent: later calls, from any clone, return immediately.
    pub async fn shutdown(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        let (done, stopped) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = stopped.await;
        }
        if let Err(e) = task.await {
            tracing::warn!(capability = %self.capability, error = %e, "supervisor task failed");
        }
    }
}

impl std::fmt::Debug for WorkerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerService")
            .field("capability", &self.capability)
            .field("status", &*self.status.borrow())
            .finish()
    }
}
