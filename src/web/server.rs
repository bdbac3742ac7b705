//! Axum web server for the symbolic math API.
//!
//! Each capability gets a POST route taking a JSON body. Required fields
//! are checked before anything is submitted; a missing field is a 400 and
//! never reaches a worker.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use super::error::ApiError;
use crate::capability::Capability;
use crate::config::ServerSettings;
use crate::service::SymbolicEngine;
use crate::worker::protocol::{
    BasicRequest, Bound, DifferentiateRequest, IntegrateRequest, MatrixRequest,
};
use crate::worker::{WorkerState, WorkerStatus};

const MISSING_PARAMETERS: &str = "Missing required parameters";

/// Order used by `/derivative` when the body does not name one.
const DEFAULT_ORDER: &str = "1";

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<dyn SymbolicEngine>,
    /// Forward worker error text to clients.
    pub expose_error_details: bool,
}

impl AppState {
    pub fn new(engine: Arc<dyn SymbolicEngine>) -> Self {
        Self {
            engine,
            expose_error_details: true,
        }
    }

    fn reject(&self, capability: Capability, error: crate::worker::WorkerError) -> ApiError {
        tracing::warn!(%capability, %error, "request failed");
        ApiError::from_worker(&error, self.expose_error_details)
    }
}

/// Build the axum router with all routes
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(Capability::BasicEvaluate.route(), post(basic))
        .route(Capability::Differentiate.route(), post(derivative))
        .route(
            Capability::DifferentiateWithSteps.route(),
            post(derivative_steps),
        )
        .route(Capability::Integrate.route(), post(integral))
        .route(Capability::MatrixEvaluate.route(), post(matrix))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn serve(
    settings: &ServerSettings,
    engine: Arc<dyn SymbolicEngine>,
) -> std::io::Result<()> {
    let state = Arc::new(AppState {
        engine,
        expose_error_details: settings.expose_error_details,
    });
    let app = router(state);

    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

// ============================================================================
// Request parsing
// ============================================================================

/// Unwrap the JSON body, turning extractor failures into a 400 `{error}`.
fn body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// A present, non-empty field. Numbers are accepted and kept as text.
fn text_field(body: &Value, name: &str) -> Option<String> {
    match body.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required(body: &Value, name: &str, message: &str) -> Result<String, ApiError> {
    text_field(body, name).ok_or_else(|| ApiError::bad_request(message))
}

/// `bound` is optional; both ends empty means indefinite.
fn bound_field(body: &Value) -> Result<Option<Bound>, ApiError> {
    let Some(bound) = body.get("bound").filter(|b| !b.is_null()) else {
        return Ok(None);
    };
    if !bound.is_object() {
        return Err(ApiError::bad_request("bound must be an object"));
    }

    match (
        text_field(bound, "upperBound"),
        text_field(bound, "lowerBound"),
    ) {
        (None, None) => Ok(None),
        (Some(upper_bound), Some(lower_bound)) => Ok(Some(Bound {
            upper_bound,
            lower_bound,
        })),
        _ => Err(ApiError::bad_request(
            "bound requires both upperBound and lowerBound",
        )),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// POST /basic - Simplify and evaluate an expression
async fn basic(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = body(payload)?;
    let request = BasicRequest {
        expression: required(&body, "expression", MISSING_PARAMETERS)?,
    };

    let result = state
        .engine
        .evaluate(request)
        .await
        .map_err(|e| state.reject(Capability::BasicEvaluate, e))?;
    Ok(Json(json!({ "result": result })))
}

/// POST /derivative - Differentiate an expression
async fn derivative(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = body(payload)?;
    let request = DifferentiateRequest {
        expression: required(&body, "expression", MISSING_PARAMETERS)?,
        variable: required(&body, "variable", MISSING_PARAMETERS)?,
        order_of_derivative: text_field(&body, "orderOfDerivative")
            .unwrap_or_else(|| DEFAULT_ORDER.to_string()),
    };

    let result = state
        .engine
        .differentiate(request)
        .await
        .map_err(|e| state.reject(Capability::Differentiate, e))?;
    Ok(Json(json!({ "result": result })))
}

/// POST /derivative-steps - Differentiate and explain each step
async fn derivative_steps(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body(payload)?;
    let request = DifferentiateRequest {
        expression: required(&body, "expression", MISSING_PARAMETERS)?,
        variable: required(&body, "variable", MISSING_PARAMETERS)?,
        order_of_derivative: required(&body, "orderOfDerivative", MISSING_PARAMETERS)?,
    };

    let result = state
        .engine
        .differentiate_with_steps(request)
        .await
        .map_err(|e| state.reject(Capability::DifferentiateWithSteps, e))?;
    Ok(Json(result))
}

/// POST /integral - Integrate, definitely when bounds are given
async fn integral(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = body(payload)?;
    let request = IntegrateRequest {
        expression: required(&body, "expression", MISSING_PARAMETERS)?,
        variable: required(&body, "variable", MISSING_PARAMETERS)?,
        bound: bound_field(&body)?,
    };

    let result = state
        .engine
        .integrate(request)
        .await
        .map_err(|e| state.reject(Capability::Integrate, e))?;
    Ok(Json(json!({ "result": result })))
}

/// POST /matrix - Evaluate a matrix expression
async fn matrix(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = body(payload)?;
    let request = MatrixRequest {
        expression: required(
            &body,
            "expression",
            "Missing required parameter: expression",
        )?,
    };

    let result = state
        .engine
        .evaluate_matrix(request)
        .await
        .map_err(|e| state.reject(Capability::MatrixEvaluate, e))?;
    Ok(Json(json!({ "result": result })))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    workers: Vec<WorkerStatus>,
}

/// GET /health - Worker status per capability
///
/// 200 when every worker is ready, 503 otherwise.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let workers = state.engine.status();
    let ready = workers.iter().all(|w| w.state == WorkerState::Ready);

    let (code, status) = if ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (code, Json(HealthResponse { status, workers }))
}
