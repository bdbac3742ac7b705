//! The math operations exposed by the gateway.
//!
//! Every capability owns exactly one worker process and one request queue;
//! nothing is shared between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One distinct math operation, bound to its own worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Evaluate an expression to an exact and a decimal form.
    BasicEvaluate,
    /// Differentiate an expression.
    Differentiate,
    /// Differentiate an expression and report the intermediate steps.
    DifferentiateWithSteps,
    /// Integrate an expression, optionally between bounds.
    Integrate,
    /// Evaluate a matrix expression.
    MatrixEvaluate,
}

impl Capability {
    /// All capabilities, in a stable order.
    pub const ALL: [Capability; 5] = [
        Capability::BasicEvaluate,
        Capability::Differentiate,
        Capability::DifferentiateWithSteps,
        Capability::Integrate,
        Capability::MatrixEvaluate,
    ];

    /// Stable identifier used in config files, logs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::BasicEvaluate => "basic_evaluate",
            Capability::Differentiate => "differentiate",
            Capability::DifferentiateWithSteps => "differentiate_with_steps",
            Capability::Integrate => "integrate",
            Capability::MatrixEvaluate => "matrix_evaluate",
        }
    }

    /// Worker script launched for this capability unless overridden.
    pub fn default_script(&self) -> &'static str {
        match self {
            Capability::BasicEvaluate => "basic.py",
            Capability::Differentiate => "differentiation.py",
            Capability::DifferentiateWithSteps => "differentiation_steps.py",
            Capability::Integrate => "integration.py",
            Capability::MatrixEvaluate => "matrix.py",
        }
    }

    /// HTTP route serving this capability.
    pub fn route(&self) -> &'static str {
        match self {
            Capability::BasicEvaluate => "/basic",
            Capability::Differentiate => "/derivative",
            Capability::DifferentiateWithSteps => "/derivative-steps",
            Capability::Integrate => "/integral",
            Capability::MatrixEvaluate => "/matrix",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "basic_evaluate" | "basic" => Ok(Capability::BasicEvaluate),
            "differentiate" | "derivative" => Ok(Capability::Differentiate),
            "differentiate_with_steps" | "derivative_steps" => {
                Ok(Capability::DifferentiateWithSteps)
            }
            "integrate" | "integral" => Ok(Capability::Integrate),
            "matrix_evaluate" | "matrix" => Ok(Capability::MatrixEvaluate),
            _ => Err(format!(
                "Unknown capability: '{}'. Valid options: basic, derivative, derivative-steps, integral, matrix",
                s
            )),
        }
    }
}
