//! Public submission API over the worker pipelines.
//!
//! [`WorkerService`] is the per-capability facade: `submit` enqueues a
//! payload and resolves with exactly one result. [`MathServices`] owns the
//! five of them and implements [`SymbolicEngine`], which is what the HTTP
//! layer talks to.

mod engine;
mod handle;
mod math;

pub use engine::SymbolicEngine;
pub use handle::WorkerService;
pub use math::MathServices;
