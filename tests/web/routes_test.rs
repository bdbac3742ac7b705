//! HTTP routes against an in-memory engine.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use symgate::capability::Capability;
use symgate::service::SymbolicEngine;
use symgate::web::{router, AppState};
use symgate::worker::protocol::{
    BasicRequest, BasicResult, DifferentiateRequest, IntegrateRequest, MatrixRequest, Step,
    StepsResult,
};
use symgate::worker::{WorkerError, WorkerResult, WorkerState, WorkerStatus};

/// Records every request it receives and answers with canned results.
#[derive(Default)]
struct StubEngine {
    calls: Mutex<Vec<Value>>,
    failure: Option<WorkerError>,
    state: Option<WorkerState>,
}

impl StubEngine {
    fn failing(error: WorkerError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    fn record(&self, request: Value) -> WorkerResult<()> {
        self.calls.lock().unwrap().push(request);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SymbolicEngine for StubEngine {
    async fn evaluate(&self, request: BasicRequest) -> WorkerResult<BasicResult> {
        self.record(serde_json::to_value(&request).unwrap())?;
        Ok(BasicResult {
            exact: "4".to_string(),
            decimal: 4.0,
        })
    }

    async fn differentiate(&self, request: DifferentiateRequest) -> WorkerResult<String> {
        self.record(serde_json::to_value(&request).unwrap())?;
        Ok("2 x".to_string())
    }

    async fn differentiate_with_steps(
        &self,
        request: DifferentiateRequest,
    ) -> WorkerResult<StepsResult> {
        self.record(serde_json::to_value(&request).unwrap())?;
        Ok(StepsResult {
            simplified: Some("x^{2}".to_string()),
            steps: vec![Step {
                number: 1,
                text: "Apply the power rule".to_string(),
                math: "2 x".to_string(),
            }],
            result: "2 x".to_string(),
        })
    }

    async fn integrate(&self, request: IntegrateRequest) -> WorkerResult<String> {
        self.record(serde_json::to_value(&request).unwrap())?;
        Ok("\\frac{x^{2}}{2}".to_string())
    }

    async fn evaluate_matrix(&self, request: MatrixRequest) -> WorkerResult<Value> {
        self.record(serde_json::to_value(&request).unwrap())?;
        Ok(json!("\\left[\\begin{matrix}1\\end{matrix}\\right]"))
    }

    fn status(&self) -> Vec<WorkerStatus> {
        Capability::ALL
            .iter()
            .map(|&capability| WorkerStatus {
                capability,
                state: self.state.unwrap_or(WorkerState::Ready),
                generation: 1,
                restarts: 0,
                consecutive_failures: 0,
                queue_depth: 0,
                in_flight: 0,
                pid: Some(42),
                last_exit: None,
            })
            .collect()
    }
}

fn app(engine: Arc<StubEngine>) -> Router {
    router(Arc::new(AppState::new(engine)))
}

async fn post(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_basic_wraps_result() {
    let engine = Arc::new(StubEngine::default());
    let (status, body) = post(app(engine.clone()), "/basic", r#"{"expression":"2+2"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": { "exact": "4", "decimal": 4.0 } }));
    assert_eq!(engine.calls(), vec![json!({ "expression": "2+2" })]);
}

#[tokio::test]
async fn test_derivative_defaults_order() {
    let engine = Arc::new(StubEngine::default());
    let (status, body) = post(
        app(engine.clone()),
        "/derivative",
        r#"{"expression":"x^2","variable":"x"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": "2 x" }));
    assert_eq!(engine.calls()[0]["orderOfDerivative"], "1");
}

#[tokio::test]
async fn test_missing_field_is_rejected_before_the_engine() {
    let engine = Arc::new(StubEngine::default());
    let (status, body) = post(app(engine.clone()), "/derivative", r#"{"expression":"x^2"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Missing required parameters" }));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_empty_string_counts_as_missing() {
    let engine = Arc::new(StubEngine::default());
    let (status, _) = post(app(engine.clone()), "/basic", r#"{"expression":""}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_derivative_steps_requires_order_and_returns_object() {
    let engine = Arc::new(StubEngine::default());

    let (status, _) = post(
        app(engine.clone()),
        "/derivative-steps",
        r#"{"expression":"x^2","variable":"x"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(
        app(engine.clone()),
        "/derivative-steps",
        r#"{"expression":"x^2","variable":"x","orderOfDerivative":2}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["simplified"], "x^{2}");
    assert_eq!(body["steps"][0]["number"], 1);
    assert_eq!(body["result"], "2 x");
    assert!(body.get("error").is_none());

    assert_eq!(engine.calls().len(), 1);
    assert_eq!(engine.calls()[0]["orderOfDerivative"], "2");
}

#[tokio::test]
async fn test_integral_passes_bounds() {
    let engine = Arc::new(StubEngine::default());
    let (status, body) = post(
        app(engine.clone()),
        "/integral",
        r#"{"expression":"x","variable":"x","bound":{"upperBound":"1","lowerBound":"0"}}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": "\\frac{x^{2}}{2}" }));
    assert_eq!(
        engine.calls()[0]["bound"],
        json!({ "upperBound": "1", "lowerBound": "0" })
    );
}

#[tokio::test]
async fn test_integral_without_bounds_omits_them() {
    let engine = Arc::new(StubEngine::default());
    let (status, _) = post(
        app(engine.clone()),
        "/integral",
        r#"{"expression":"x","variable":"x","bound":{"upperBound":"","lowerBound":""}}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(engine.calls()[0].get("bound").is_none());
}

#[tokio::test]
async fn test_integral_half_bound_is_rejected() {
    let engine = Arc::new(StubEngine::default());
    let (status, body) = post(
        app(engine.clone()),
        "/integral",
        r#"{"expression":"x","variable":"x","bound":{"upperBound":"1"}}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_matrix_missing_expression_message() {
    let engine = Arc::new(StubEngine::default());
    let (status, body) = post(app(engine), "/matrix", "{}").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({ "error": "Missing required parameter: expression" })
    );
}

#[tokio::test]
async fn test_worker_error_becomes_500() {
    let engine = Arc::new(StubEngine::failing(WorkerError::computation(
        "Error parsing LaTeX",
    )));
    let (status, body) = post(app(engine), "/matrix", r#"{"expression":"\\oops"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Error parsing LaTeX" }));
}

#[tokio::test]
async fn test_error_details_can_be_hidden() {
    let engine = Arc::new(StubEngine::failing(WorkerError::WorkerUnavailable(
        "worker exited (exit code 1)".to_string(),
    )));
    let state = AppState {
        engine,
        expose_error_details: false,
    };
    let (status, body) = post(
        router(Arc::new(state)),
        "/basic",
        r#"{"expression":"1"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal server error" }));
}

#[tokio::test]
async fn test_malformed_json_is_400_with_error_body() {
    let engine = Arc::new(StubEngine::default());
    let (status, body) = post(app(engine.clone()), "/basic", "{not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_health_reports_every_capability() {
    let response = app(Arc::new(StubEngine::default()))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["workers"].as_array().unwrap().len(), 5);
    assert_eq!(body["workers"][2]["capability"], "differentiate_with_steps");
}

#[tokio::test]
async fn test_health_degraded_when_circuit_open() {
    let engine = StubEngine {
        state: Some(WorkerState::CircuitOpen),
        ..StubEngine::default()
    };
    let response = app(Arc::new(engine))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let response = app(Arc::new(StubEngine::default()))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/basic")
                .header(header::ORIGIN, "http://localhost:3000")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"expression":"1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
}
