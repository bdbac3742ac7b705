//! HTTP surface for symgate.
//!
//! Routes translate JSON bodies into worker requests and worker results
//! back into JSON; the computation itself happens behind
//! [`SymbolicEngine`](crate::service::SymbolicEngine).

mod error;
mod server;

pub use error::{ApiError, ApiErrorBody};
pub use server::{router, serve, AppState};
