//! Worker supervision for one capability.
//!
//! A supervisor is a single tokio task that owns the capability's worker
//! process and request queue. Submissions, worker output, stderr chunks,
//! process exits and timers are all handled one at a time inside that task,
//! so queue state never needs a lock.
//!
//! ```text
//!   submit ──▶ commands ─┐
//!                        ▼
//!              ┌───────────────────┐   stdin (NDJSON)   ┌────────────┐
//!              │ supervisor task   │ ─────────────────▶ │   worker   │
//!              │  RequestQueue     │ ◀───────────────── │  process   │
//!              │  WorkerState      │  Line / ErrorChunk │            │
//!              └───────────────────┘  / Exited events   └────────────┘
//! ```
//!
//! Lifecycle: `Starting → Ready → Crashed → Restarting → Starting ...`.
//! Every termination rejects everything queued or in flight and schedules a
//! restart according to the [`RestartPolicy`]. Once the policy gives up the
//! supervisor parks in `CircuitOpen` and rejects new work.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::{ErrorKind, WorkerError};
use super::process::{LaunchSpec, TaggedEvent, WorkerEvent, WorkerProcess};
use super::queue::{LineOutcome, QueuePolicy, Reply, RequestQueue};
use crate::capability::Capability;

/// Lifecycle state of a capability's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// A process is being spawned.
    Starting,
    /// A process is running and accepting requests.
    Ready,
    /// The process terminated; outstanding requests have been rejected.
    Crashed,
    /// Waiting for the restart delay to elapse.
    Restarting,
    /// The restart budget is exhausted. New requests are rejected.
    CircuitOpen,
    /// The service was shut down.
    Stopped,
}

/// What to do with text the worker writes to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StderrPolicy {
    /// Reject the oldest in-flight request with the text.
    #[default]
    Reject,
    /// Only log it.
    Log,
}

/// When and how often a crashed worker is restarted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    /// Delay before the first restart after a healthy run.
    pub base_delay: Duration,
    /// Growth factor applied per consecutive failure. `1.0` keeps the delay fixed.
    pub multiplier: f64,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before the circuit opens. `None` never gives up.
    pub max_restarts: Option<u32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            max_restarts: None,
        }
    }
}

impl RestartPolicy {
    /// Delay before restart number `attempt` (1-based) of a failure streak.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let nanos = (self.base_delay.as_nanos() as f64 * factor).round();
        let cap = self.max_delay.max(self.base_delay);
        if !nanos.is_finite() || nanos >= cap.as_nanos() as f64 {
            return cap;
        }
        Duration::from_nanos(nanos as u64)
    }

    /// Whether restart number `attempt` of a failure streak may happen.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_restarts.map_or(true, |max| attempt <= max)
    }
}

/// Everything a supervisor needs to run one capability.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub capability: Capability,
    pub launch: LaunchSpec,
    pub restart: RestartPolicy,
    pub queue: QueuePolicy,
    /// Deadline for the oldest in-flight request. `None` waits forever.
    pub request_timeout: Option<Duration>,
    pub stderr: StderrPolicy,
}

impl SupervisorConfig {
    /// Baseline behaviour: positional correlation, fixed one-second restarts,
    /// no timeout, no queue bound.
    pub fn new(capability: Capability, launch: LaunchSpec) -> Self {
        Self {
            capability,
            launch,
            restart: RestartPolicy::default(),
            queue: QueuePolicy::default(),
            request_timeout: None,
            stderr: StderrPolicy::default(),
        }
    }
}

/// Snapshot of a supervisor, published after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub capability: Capability,
    pub state: WorkerState,
    /// Number of processes launched so far (spawn attempts included).
    pub generation: u64,
    /// Number of launches after the first.
    pub restarts: u64,
    /// Terminations since the worker last produced a response.
    pub consecutive_failures: u32,
    pub queue_depth: usize,
    pub in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<String>,
}

impl WorkerStatus {
    fn new(capability: Capability) -> Self {
        Self {
            capability,
            state: WorkerState::Starting,
            generation: 0,
            restarts: 0,
            consecutive_failures: 0,
            queue_depth: 0,
            in_flight: 0,
            pid: None,
            last_exit: None,
        }
    }
}

/// Messages from service handles to the supervisor task.
#[derive(Debug)]
pub enum Command {
    Submit { payload: Value, reply: Reply },
    Shutdown { done: oneshot::Sender<()> },
}

/// Channels and task handle of a running supervisor.
pub struct SupervisorHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub status: watch::Receiver<WorkerStatus>,
    pub task: JoinHandle<()>,
}

/// Start a supervisor task for `config`. Must be called inside a tokio runtime.
pub fn spawn(config: SupervisorConfig) -> SupervisorHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(WorkerStatus::new(config.capability));

    let supervisor = Supervisor {
        queue: RequestQueue::new(config.capability, config.queue),
        status: WorkerStatus::new(config.capability),
        config,
        process: None,
        restart_at: None,
        status_tx,
        events_tx,
        events_rx,
        commands_rx,
    };

    SupervisorHandle {
        commands: commands_tx,
        status: status_rx,
        task: tokio::spawn(supervisor.run()),
    }
}

struct Supervisor {
    config: SupervisorConfig,
    queue: RequestQueue,
    process: Option<WorkerProcess>,
    status: WorkerStatus,
    restart_at: Option<Instant>,
    status_tx: watch::Sender<WorkerStatus>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
}

impl Supervisor {
    async fn run(mut self) {
        self.start();
        self.pump().await;

        loop {
            let restart_at = self.restart_at;
            let deadline = self.request_deadline();

            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(Command::Submit { payload, reply }) => self.submit(payload, reply).await,
                    Some(Command::Shutdown { done }) => {
                        self.stop();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.stop();
                        break;
                    }
                },
                Some(tagged) = self.events_rx.recv() => self.handle_event(tagged).await,
                _ = sleep_until(restart_at) => {
                    self.restart_at = None;
                    self.start();
                    self.pump().await;
                }
                _ = sleep_until(deadline) => self.expire_in_flight(),
            }
        }

        tracing::debug!(capability = %self.config.capability, "supervisor stopped");
    }

    fn start(&mut self) {
        let capability = self.config.capability;
        self.status.generation += 1;
        if self.status.generation > 1 {
            self.status.restarts += 1;
        }
        self.status.state = WorkerState::Starting;
        self.publish();

        match WorkerProcess::spawn(&self.config.launch, self.status.generation, self.events_tx.clone()) {
            Ok(process) => {
                tracing::info!(
                    %capability,
                    generation = self.status.generation,
                    pid = ?process.pid(),
                    command = %self.config.launch.display(),
                    "worker started"
                );
                self.status.pid = process.pid();
                self.process = Some(process);
                self.status.state = WorkerState::Ready;
                self.publish();
            }
            Err(error) => {
                tracing::error!(%capability, %error, "worker failed to start");
                self.on_terminated(error.to_string());
            }
        }
    }

    async fn submit(&mut self, payload: Value, reply: Reply) {
        match self.status.state {
            WorkerState::CircuitOpen => {
                let _ = reply.send(Err(WorkerError::CircuitOpen));
                return;
            }
            WorkerState::Stopped => {
                let _ = reply.send(Err(WorkerError::ShuttingDown));
                return;
            }
            _ => {}
        }

        if self.queue.enqueue(payload, reply).is_none() {
            tracing::warn!(
                capability = %self.config.capability,
                depth = self.queue.len(),
                "request queue full, rejecting submission"
            );
        }
        self.pump().await;
    }

    /// Write queued requests while the in-flight limit allows.
    async fn pump(&mut self) {
        if self.status.state == WorkerState::Ready {
            while let Some(dispatch) = self.queue.next_dispatch() {
                let Some(process) = self.process.as_mut() else {
                    break;
                };

                if let Err(error) = process.write_line(&dispatch.line).await {
                    tracing::warn!(
                        capability = %self.config.capability,
                        %error,
                        "writing to worker failed, recycling process"
                    );
                    self.queue.reject_in_flight(&dispatch.id, error);
                    self.recycle("killed after write failure");
                    break;
                }

                tracing::trace!(
                    capability = %self.config.capability,
                    request = %dispatch.id,
                    "request dispatched"
                );
            }
        }
        self.publish();
    }

    async fn handle_event(&mut self, tagged: TaggedEvent) {
        let capability = self.config.capability;
        let current = self.process.as_ref().map(WorkerProcess::generation);
        if current != Some(tagged.generation) {
            // Earlier launches and recycled workers were already accounted for
            // when they were retired.
            tracing::debug!(
                %capability,
                generation = tagged.generation,
                "ignoring event from retired worker"
            );
            return;
        }

        match tagged.event {
            WorkerEvent::Line(line) => {
                match self.queue.on_response(&line) {
                    LineOutcome::Blank => {}
                    LineOutcome::Stray => {
                        tracing::warn!(%capability, %line, "discarding worker output with no matching request");
                    }
                    LineOutcome::Resolved { id, elapsed } => {
                        self.status.consecutive_failures = 0;
                        tracing::debug!(
                            %capability,
                            request = %id,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "request resolved"
                        );
                    }
                    LineOutcome::Rejected { id, error, elapsed } => {
                        self.status.consecutive_failures = 0;
                        if error.kind() == ErrorKind::Protocol {
                            tracing::warn!(%capability, request = %id, %error, %line, "unparseable worker response");
                        } else {
                            tracing::debug!(
                                %capability,
                                request = %id,
                                %error,
                                elapsed_ms = elapsed.as_millis() as u64,
                                "request rejected by worker"
                            );
                        }
                    }
                }
                self.pump().await;
            }
            WorkerEvent::ErrorChunk(chunk) => {
                let message = chunk.trim_end();
                tracing::warn!(%capability, stderr = %message, "worker wrote to stderr");
                if self.config.stderr == StderrPolicy::Reject
                    && !message.is_empty()
                    && self.queue.on_worker_error(message)
                {
                    tracing::debug!(%capability, "in-flight request rejected from stderr");
                }
                self.pump().await;
            }
            WorkerEvent::LineTooLong(limit) => {
                let error = WorkerError::protocol(format!("response line exceeds {} bytes", limit));
                if !self.queue.reject_oldest(error) {
                    tracing::warn!(%capability, "discarding oversized worker output with no matching request");
                }
                self.pump().await;
            }
            WorkerEvent::Exited(description) => self.on_terminated(description),
        }
    }

    /// Reject the overdue in-flight request and recycle the worker: a late
    /// reply would otherwise be matched to the next request.
    fn expire_in_flight(&mut self) {
        let timeout = self.config.request_timeout.unwrap_or_default();
        let millis = timeout.as_millis() as u64;
        tracing::warn!(
            capability = %self.config.capability,
            timeout_ms = millis,
            "request timed out, recycling worker"
        );
        self.queue.reject_oldest(WorkerError::Timeout(millis));
        self.recycle("killed after request timeout");
    }

    /// Kill the current process and treat that as its termination. The
    /// killed process's own exit event is ignored once it arrives.
    fn recycle(&mut self, reason: &str) {
        self.process = None;
        self.on_terminated(reason.to_string());
    }

    fn on_terminated(&mut self, description: String) {
        let capability = self.config.capability;
        self.process = None;
        self.status.pid = None;
        self.status.state = WorkerState::Crashed;
        self.status.consecutive_failures = self.status.consecutive_failures.saturating_add(1);

        let error = WorkerError::WorkerUnavailable(format!("worker exited ({})", description));
        let failed = self.queue.fail_all(&error);
        tracing::warn!(
            %capability,
            generation = self.status.generation,
            exit = %description,
            failed_requests = failed,
            "worker terminated"
        );
        self.status.last_exit = Some(description);

        let attempt = self.status.consecutive_failures;
        if !self.config.restart.allows(attempt) {
            tracing::error!(
                %capability,
                failures = attempt,
                "worker keeps failing, giving up on restarts"
            );
            self.status.state = WorkerState::CircuitOpen;
            self.publish();
            return;
        }

        let delay = self.config.restart.delay_for(attempt);
        tracing::info!(
            %capability,
            delay_ms = delay.as_millis() as u64,
            attempt,
            "scheduling worker restart"
        );
        self.status.state = WorkerState::Restarting;
        self.restart_at = Instant::now().checked_add(delay);
        self.publish();
    }

    fn stop(&mut self) {
        let failed = self.queue.fail_all(&WorkerError::ShuttingDown);
        self.process = None;
        self.restart_at = None;
        self.status.pid = None;
        self.status.state = WorkerState::Stopped;
        self.publish();
        tracing::info!(
            capability = %self.config.capability,
            failed_requests = failed,
            "worker service stopped"
        );
    }

    fn request_deadline(&self) -> Option<Instant> {
        if self.status.state != WorkerState::Ready {
            return None;
        }
        let timeout = self.config.request_timeout?;
        let dispatched_at = self.queue.oldest_dispatched_at()?;
        Instant::from_std(dispatched_at).checked_add(timeout)
    }

    fn publish(&mut self) {
        self.status.queue_depth = self.queue.len();
        self.status.in_flight = self.queue.in_flight();
        self.status_tx.send_replace(self.status.clone());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
