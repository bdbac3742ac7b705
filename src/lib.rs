//! # symgate
//!
//! An HTTP gateway in front of long-running symbolic math workers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 HTTP routes (axum)                      │
//! │   /basic  /derivative  /derivative-steps  /integral ... │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [SymbolicEngine]
//! ┌─────────────────────────────────────────────────────────┐
//! │       MathServices (one WorkerService per capability)   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [submit]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Supervisor + RequestQueue (single-flight, FIFO)     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [NDJSON over stdin/stdout]
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Worker process                         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod capability;
pub mod config;
pub mod logging;
pub mod service;
pub mod web;
pub mod worker;

pub use capability::Capability;
pub use config::Settings;
pub use service::{MathServices, SymbolicEngine, WorkerService};
pub use worker::{WorkerError, WorkerResult};
