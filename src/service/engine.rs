//! Abstraction over the symbolic math backend.
//!
//! The HTTP layer only depends on this trait, so routes can be exercised
//! against an in-memory engine without spawning worker processes.

use async_trait::async_trait;
use serde_json::Value;

use crate::worker::protocol::{
    BasicRequest, BasicResult, DifferentiateRequest, IntegrateRequest, MatrixRequest, StepsResult,
};
use crate::worker::{WorkerResult, WorkerStatus};

/// Operations offered by the gateway, one per capability.
///
/// # Example
///
/// ```ignore
/// use symgate::service::SymbolicEngine;
/// use symgate::worker::protocol::DifferentiateRequest;
///
/// async fn example(engine: &dyn SymbolicEngine) -> WorkerResult<()> {
///     let derivative = engine
///         .differentiate(DifferentiateRequest {
///             expression: "x^2".into(),
///             variable: "x".into(),
///             order_of_derivative: "1".into(),
///         })
///         .await?;
///     assert_eq!(derivative, "2*x");
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SymbolicEngine: Send + Sync {
    /// Simplify and numerically evaluate an expression.
    async fn evaluate(&self, request: BasicRequest) -> WorkerResult<BasicResult>;

    /// Derivative as a LaTeX string.
    async fn differentiate(&self, request: DifferentiateRequest) -> WorkerResult<String>;

    /// Derivative with the explanatory steps that produced it.
    async fn differentiate_with_steps(
        &self,
        request: DifferentiateRequest,
    ) -> WorkerResult<StepsResult>;

    /// Indefinite integral, or definite when the request carries bounds.
    async fn integrate(&self, request: IntegrateRequest) -> WorkerResult<String>;

    /// Matrix expression result, passed through as the worker produced it.
    async fn evaluate_matrix(&self, request: MatrixRequest) -> WorkerResult<Value>;

    /// Status of every capability's worker.
    fn status(&self) -> Vec<WorkerStatus>;
}
