//! Worker process pipeline.
//!
//! Each capability is served by one long-running child process that speaks
//! newline-delimited JSON over stdin/stdout. This module owns everything
//! between a submission and that process.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Supervisor task (one per capability)           │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                    RequestQueue                           │  │
//! │  │  - FIFO of pending requests                               │  │
//! │  │  - single request in flight (positional correlation)      │  │
//! │  │  - every response line settles exactly one request        │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │               stdin (NDJSON) │ stdout (NDJSON), stderr chunks   │
//! │                              ▼                                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          Math worker (long-running child, restarted on exit)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use symgate::capability::Capability;
//! use symgate::worker::{spawn_supervisor, LaunchSpec, SupervisorConfig};
//!
//! let launch = LaunchSpec::new("python3", vec!["./scripts/differentiation.py".into()]);
//! let handle = spawn_supervisor(SupervisorConfig::new(Capability::Differentiate, launch));
//! ```

pub mod error;
pub mod process;
pub mod protocol;
pub mod queue;
pub mod supervisor;

pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use process::{LaunchSpec, TaggedEvent, WorkerEvent, WorkerProcess};
pub use queue::{Correlation, QueuePolicy, RequestQueue};
pub use supervisor::{
    spawn as spawn_supervisor, RestartPolicy, StderrPolicy, SupervisorConfig, SupervisorHandle,
    WorkerState, WorkerStatus,
};
