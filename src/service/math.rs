//! The five capability pipelines behind one object.

use async_trait::async_trait;
use serde_json::Value;

use super::engine::SymbolicEngine;
use super::handle::WorkerService;
use crate::capability::Capability;
use crate::config::{Settings, SettingsError};
use crate::worker::protocol::{
    BasicRequest, BasicResult, DifferentiateRequest, IntegrateRequest, MatrixRequest, StepsResult,
};
use crate::worker::{SupervisorConfig, WorkerResult, WorkerStatus};

/// One [`WorkerService`] per capability.
///
/// Constructed explicitly at startup and shut down explicitly; the HTTP
/// layer receives it as shared state.
#[derive(Debug, Clone)]
pub struct MathServices {
    basic: WorkerService,
    differentiate: WorkerService,
    differentiate_steps: WorkerService,
    integrate: WorkerService,
    matrix: WorkerService,
}

impl MathServices {
    /// Start all five workers from settings.
    pub fn start(settings: &Settings) -> Result<Self, SettingsError> {
        Self::start_with(|capability| settings.workers.supervisor_config(capability))
    }

    /// Start all five workers, building each supervisor config with `configure`.
    pub fn start_with<F, E>(mut configure: F) -> Result<Self, E>
    where
        F: FnMut(Capability) -> Result<SupervisorConfig, E>,
    {
        // Resolve every config before spawning so a bad entry starts nothing.
        let basic = configure(Capability::BasicEvaluate)?;
        let differentiate = configure(Capability::Differentiate)?;
        let differentiate_steps = configure(Capability::DifferentiateWithSteps)?;
        let integrate = configure(Capability::Integrate)?;
        let matrix = configure(Capability::MatrixEvaluate)?;

        let services = Self {
            basic: WorkerService::start(basic),
            differentiate: WorkerService::start(differentiate),
            differentiate_steps: WorkerService::start(differentiate_steps),
            integrate: WorkerService::start(integrate),
            matrix: WorkerService::start(matrix),
        };
        tracing::info!(capabilities = Capability::ALL.len(), "math services started");
        Ok(services)
    }

    /// The service for `capability`.
    pub fn service(&self, capability: Capability) -> &WorkerService {
        match capability {
            Capability::BasicEvaluate => &self.basic,
            Capability::Differentiate => &self.differentiate,
            Capability::DifferentiateWithSteps => &self.differentiate_steps,
            Capability::Integrate => &self.integrate,
            Capability::MatrixEvaluate => &self.matrix,
        }
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        Capability::ALL
            .iter()
            .map(|&capability| self.service(capability).status())
            .collect()
    }

    /// Stop every worker, rejecting whatever is still queued.
    pub async fn shutdown(&self) {
        futures::future::join_all(
            Capability::ALL
                .iter()
                .map(|&capability| self.service(capability).shutdown()),
        )
        .await;
        tracing::info!("math services stopped");
    }
}

#[async_trait]
impl SymbolicEngine for MathServices {
    async fn evaluate(&self, request: BasicRequest) -> WorkerResult<BasicResult> {
        self.basic.submit_as(&request).await
    }

    async fn differentiate(&self, request: DifferentiateRequest) -> WorkerResult<String> {
        self.differentiate.submit_as(&request).await
    }

    async fn differentiate_with_steps(
        &self,
        request: DifferentiateRequest,
    ) -> WorkerResult<StepsResult> {
        self.differentiate_steps.submit_as(&request).await
    }

    async fn integrate(&self, request: IntegrateRequest) -> WorkerResult<String> {
        self.integrate.submit_as(&request).await
    }

    async fn evaluate_matrix(&self, request: MatrixRequest) -> WorkerResult<Value> {
        self.matrix.submit(&request).await
    }

    fn status(&self) -> Vec<WorkerStatus> {
        self.statuses()
    }
}
