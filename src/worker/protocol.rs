//! Line protocol spoken with the math workers.
//!
//! One JSON object per line in each direction. A request is the
//! capability-specific payload; a response is either `{"error": ...}` or
//! `{"result": ...}`, except for stepwise differentiation which replies with
//! `{"simplified", "steps", "result"}`.
//!
//! In tagged correlation mode the request object additionally carries an
//! `"id"` field which the worker is expected to echo back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{WorkerError, WorkerResult};
use crate::capability::Capability;

// ============================================================================
// Request Payloads
// ============================================================================

/// Payload for basic evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicRequest {
    pub expression: String,
}

/// Payload for differentiation, with or without steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentiateRequest {
    pub expression: String,
    pub variable: String,
    #[serde(rename = "orderOfDerivative")]
    pub order_of_derivative: String,
}

/// Definite integration bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    #[serde(rename = "upperBound")]
    pub upper_bound: String,
    #[serde(rename = "lowerBound")]
    pub lower_bound: String,
}

/// Payload for integration. `bound` is omitted for indefinite integrals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrateRequest {
    pub expression: String,
    pub variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<Bound>,
}

/// Payload for matrix evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRequest {
    pub expression: String,
}

// ============================================================================
// Result Payloads
// ============================================================================

/// Result of basic evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicResult {
    /// LaTeX rendering of the simplified expression.
    pub exact: String,
    /// Numeric approximation.
    pub decimal: f64,
}

/// One explanatory step of a stepwise derivative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub number: u32,
    pub text: String,
    pub math: String,
}

/// Result of stepwise differentiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simplified: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub result: String,
}

// ============================================================================
// Codec
// ============================================================================

/// Field carrying the correlation identifier in tagged mode.
pub const ID_FIELD: &str = "id";

/// Encode a request payload as one newline-terminated line.
///
/// When `id` is given the payload must be a JSON object and the identifier is
/// added as an `"id"` field.
pub fn encode_line(payload: &Value, id: Option<&str>) -> WorkerResult<String> {
    let mut line = match id {
        None => serde_json::to_string(payload),
        Some(id) => {
            let mut object = payload.as_object().cloned().ok_or_else(|| {
                WorkerError::InvalidRequest("tagged payload must be a JSON object".to_string())
            })?;
            object.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            serde_json::to_string(&object)
        }
    }
    .map_err(|e| WorkerError::SerializeFailed(e.to_string()))?;

    // serde_json never emits raw newlines, so the line stays a single line.
    line.push('\n');
    Ok(line)
}

/// A response line after decoding.
#[derive(Debug, Clone)]
pub struct DecodedLine {
    /// Correlation identifier echoed by the worker, if any.
    pub id: Option<String>,
    /// What the line means for the request it answers.
    pub outcome: WorkerResult<Value>,
}

/// Decode one line received from a worker.
///
/// Never fails: a malformed line decodes to a protocol error outcome so that
/// the request it answers is still settled.
pub fn decode_line(capability: Capability, line: &str) -> DecodedLine {
    let value: Value = match serde_json::from_str(line.trim()) {
        Ok(value) => value,
        Err(e) => {
            return DecodedLine {
                id: None,
                outcome: Err(e.into()),
            }
        }
    };

    let Value::Object(object) = value else {
        return DecodedLine {
            id: None,
            outcome: Err(WorkerError::protocol("expected a JSON object")),
        };
    };

    let id = object
        .get(ID_FIELD)
        .and_then(|id| id.as_str())
        .map(str::to_string);

    DecodedLine {
        id,
        outcome: decode_object(capability, object),
    }
}

fn decode_object(capability: Capability, mut object: Map<String, Value>) -> WorkerResult<Value> {
    match object.remove("error") {
        Some(Value::Null) | None => {}
        Some(Value::String(message)) => return Err(WorkerError::computation(message)),
        Some(other) => return Err(WorkerError::computation(other.to_string())),
    }

    let result = object
        .remove("result")
        .ok_or_else(|| WorkerError::protocol("response has neither `result` nor `error`"))?;

    if capability != Capability::DifferentiateWithSteps {
        return Ok(result);
    }

    let mut combined = Map::new();
    if let Some(simplified) = object.remove("simplified") {
        combined.insert("simplified".to_string(), simplified);
    }
    combined.insert(
        "steps".to_string(),
        object
            .remove("steps")
            .unwrap_or_else(|| Value::Array(Vec::new())),
    );
    combined.insert("result".to_string(), result);
    Ok(Value::Object(combined))
}
