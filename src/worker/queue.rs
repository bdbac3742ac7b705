//! Per-capability request queue.
//!
//! The queue is a plain state machine: it never touches process I/O. The
//! supervisor feeds it submissions and worker events and writes whatever
//! [`RequestQueue::next_dispatch`] hands back.
//!
//! Invariants:
//! - dispatched requests always form a prefix of the queue, oldest first;
//! - in positional mode at most one request is dispatched at a time and the
//!   next response line settles the head;
//! - every decoded line settles exactly one request, even when it is garbage.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::error::{WorkerError, WorkerResult};
use super::protocol::{decode_line, encode_line};
use crate::capability::Capability;

/// Channel used to hand a request's outcome back to its submitter.
pub type Reply = oneshot::Sender<WorkerResult<Value>>;

/// How response lines are matched to requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correlation {
    /// The Kth response answers the Kth outstanding request. One in flight.
    #[default]
    Positional,
    /// Requests carry an `"id"` that the worker echoes back.
    Tagged,
}

/// Limits applied by a [`RequestQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub correlation: Correlation,
    /// Upper bound on dispatched requests. Forced to 1 in positional mode.
    pub max_in_flight: usize,
    /// Upper bound on queued plus in-flight requests. `None` is unbounded.
    pub max_depth: Option<usize>,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            correlation: Correlation::Positional,
            max_in_flight: 1,
            max_depth: None,
        }
    }
}

/// A request waiting in the queue or in flight.
#[derive(Debug)]
pub struct PendingRequest {
    /// Identifier sent to the worker in tagged mode; also used in logs.
    pub id: String,
    pub payload: Value,
    pub enqueued_at: Instant,
    /// Set once the request line has been written to the worker.
    pub dispatched_at: Option<Instant>,
    reply: Reply,
}

impl PendingRequest {
    fn settle(self, outcome: WorkerResult<Value>) -> Duration {
        let elapsed = self.enqueued_at.elapsed();
        // The submitter may have stopped waiting; nothing to do then.
        let _ = self.reply.send(outcome);
        elapsed
    }
}

/// A line that must be written to the worker's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub id: String,
    pub line: String,
}

/// What happened when a stdout line was handed to the queue.
#[derive(Debug)]
pub enum LineOutcome {
    /// Blank line, ignored.
    Blank,
    /// Nothing was waiting for this line; it was discarded.
    Stray,
    /// The matched request was resolved.
    Resolved { id: String, elapsed: Duration },
    /// The matched request was rejected with `error`.
    Rejected {
        id: String,
        error: WorkerError,
        elapsed: Duration,
    },
}

/// Ordered pending requests for one capability.
#[derive(Debug)]
pub struct RequestQueue {
    capability: Capability,
    policy: QueuePolicy,
    pending: VecDeque<PendingRequest>,
    in_flight: usize,
}

impl RequestQueue {
    pub fn new(capability: Capability, mut policy: QueuePolicy) -> Self {
        if policy.correlation == Correlation::Positional || policy.max_in_flight == 0 {
            policy.max_in_flight = 1;
        }
        Self {
            capability,
            policy,
            pending: VecDeque::new(),
            in_flight: 0,
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Number of requests queued or in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of requests already written to the worker.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// When the oldest in-flight request was written to the worker.
    pub fn oldest_dispatched_at(&self) -> Option<Instant> {
        if self.in_flight == 0 {
            return None;
        }
        self.pending.front().and_then(|request| request.dispatched_at)
    }

    /// Append a request to the tail.
    ///
    /// Over the depth bound the request is rejected through `reply` with
    /// [`WorkerError::QueueFull`] and never queued.
    pub fn enqueue(&mut self, payload: Value, reply: Reply) -> Option<String> {
        if let Some(limit) = self.policy.max_depth {
            if self.pending.len() >= limit {
                let _ = reply.send(Err(WorkerError::QueueFull(self.pending.len())));
                return None;
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.pending.push_back(PendingRequest {
            id: id.clone(),
            payload,
            enqueued_at: Instant::now(),
            dispatched_at: None,
            reply,
        });
        Some(id)
    }

    /// Take the next request to write, if the in-flight limit allows one.
    ///
    /// Requests whose submitter has gone away are dropped instead of being
    /// sent. A payload that cannot be encoded is rejected and skipped.
    pub fn next_dispatch(&mut self) -> Option<Dispatch> {
        while self.in_flight < self.policy.max_in_flight && self.in_flight < self.pending.len() {
            let index = self.in_flight;

            if self.pending[index].reply.is_closed() {
                self.pending.remove(index);
                continue;
            }

            let request = &mut self.pending[index];
            let id = match self.policy.correlation {
                Correlation::Positional => None,
                Correlation::Tagged => Some(request.id.as_str()),
            };

            match encode_line(&request.payload, id) {
                Ok(line) => {
                    request.dispatched_at = Some(Instant::now());
                    let id = request.id.clone();
                    self.in_flight += 1;
                    return Some(Dispatch { id, line });
                }
                Err(error) => {
                    if let Some(request) = self.pending.remove(index) {
                        request.settle(Err(error));
                    }
                }
            }
        }
        None
    }

    /// Settle the request a stdout line answers.
    pub fn on_response(&mut self, line: &str) -> LineOutcome {
        if line.trim().is_empty() {
            return LineOutcome::Blank;
        }
        if self.in_flight == 0 {
            return LineOutcome::Stray;
        }

        let decoded = decode_line(self.capability, line);
        let index = match (self.policy.correlation, decoded.id.as_deref()) {
            (Correlation::Tagged, Some(id)) => {
                match self.pending.iter().take(self.in_flight).position(|r| r.id == id) {
                    Some(index) => index,
                    None => return LineOutcome::Stray,
                }
            }
            // Untagged lines (including unparseable ones) answer the oldest.
            _ => 0,
        };

        self.settle_at(index, decoded.outcome)
    }

    /// Reject the oldest in-flight request with a message the worker wrote
    /// to stderr. Returns `false` when nothing was in flight.
    pub fn on_worker_error(&mut self, message: &str) -> bool {
        self.reject_oldest(WorkerError::computation(message))
    }

    /// Reject the oldest in-flight request with `error`.
    pub fn reject_oldest(&mut self, error: WorkerError) -> bool {
        if self.in_flight == 0 {
            return false;
        }
        self.settle_at(0, Err(error));
        true
    }

    /// Reject a specific in-flight request, e.g. when writing it failed.
    pub fn reject_in_flight(&mut self, id: &str, error: WorkerError) -> bool {
        match self.pending.iter().take(self.in_flight).position(|r| r.id == id) {
            Some(index) => {
                self.settle_at(index, Err(error));
                true
            }
            None => false,
        }
    }

    /// Reject every queued and in-flight request. Returns how many there were.
    pub fn fail_all(&mut self, error: &WorkerError) -> usize {
        let count = self.pending.len();
        for request in self.pending.drain(..) {
            request.settle(Err(error.clone()));
        }
        self.in_flight = 0;
        count
    }

    fn settle_at(&mut self, index: usize, outcome: WorkerResult<Value>) -> LineOutcome {
        let Some(request) = self.pending.remove(index) else {
            return LineOutcome::Stray;
        };
        self.in_flight -= 1;

        let id = request.id.clone();
        match outcome {
            Ok(value) => {
                let elapsed = request.settle(Ok(value));
                LineOutcome::Resolved { id, elapsed }
            }
            Err(error) => {
                let elapsed = request.settle(Err(error.clone()));
                LineOutcome::Rejected { id, error, elapsed }
            }
        }
    }
}
