//! symgate CLI - Symbolic math over HTTP
//!
//! Usage:
//!   symgate serve [--config <file>] [--host <host>] [--port <port>]
//!   symgate call <capability> --expression <expr> [--variable <var>] ...
//!   symgate config
//!
//! Examples:
//!   symgate serve --port 3001
//!   symgate call derivative --expression "x^2" --variable x
//!   symgate call integral --expression "x" --variable x --upper 1 --lower 0

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use symgate::config::{Settings, SettingsError};
use symgate::logging::{self, LogConfig, LogFormat};
use symgate::worker::protocol::{
    BasicRequest, Bound, DifferentiateRequest, IntegrateRequest, MatrixRequest,
};
use symgate::{Capability, MathServices, WorkerService};

#[derive(Parser)]
#[command(name = "symgate")]
#[command(about = "symgate - HTTP gateway for symbolic math workers")]
#[command(version)]
struct Cli {
    /// Path to the config file (default: $SYMGATE_CONFIG, ./symgate.toml, user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "symgate=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: pretty, compact, json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one request through a worker and print the result
    Call {
        /// Capability: basic, derivative, derivative-steps, integral, matrix
        capability: Capability,

        /// Expression to operate on
        #[arg(short, long)]
        expression: String,

        /// Variable for differentiation and integration
        #[arg(short, long)]
        variable: Option<String>,

        /// Order of the derivative
        #[arg(short, long, default_value = "1")]
        order: String,

        /// Upper integration bound
        #[arg(long, requires = "lower")]
        upper: Option<String>,

        /// Lower integration bound
        #[arg(long, requires = "upper")]
        lower: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_ref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut log_config = LogConfig::from_settings(&settings.logging);
    if let Some(filter) = cli.log_level {
        log_config = log_config.with_filter(filter);
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    logging::init(log_config.with_env_overrides());

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(settings, host, port).await,
        Commands::Call {
            capability,
            expression,
            variable,
            order,
            upper,
            lower,
        } => {
            let payload = match build_payload(capability, expression, variable, order, upper, lower)
            {
                Ok(p) => p,
                Err(message) => {
                    eprintln!("Error: {}", message);
                    return ExitCode::FAILURE;
                }
            };
            cmd_call(&settings, capability, payload).await
        }
        Commands::Config => cmd_config(&settings),
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, SettingsError> {
    match path {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
}

async fn cmd_serve(mut settings: Settings, host: Option<String>, port: Option<u16>) -> ExitCode {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }

    let services = match MathServices::start(&settings) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error configuring workers: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = symgate::web::serve(&settings.server, Arc::new(services.clone())).await;
    services.shutdown().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Build the worker payload for `capability` from command line arguments.
fn build_payload(
    capability: Capability,
    expression: String,
    variable: Option<String>,
    order: String,
    upper: Option<String>,
    lower: Option<String>,
) -> Result<Value, String> {
    let variable = || {
        variable
            .clone()
            .ok_or_else(|| format!("--variable is required for {}", capability))
    };

    let payload = match capability {
        Capability::BasicEvaluate => serde_json::to_value(BasicRequest { expression }),
        Capability::MatrixEvaluate => serde_json::to_value(MatrixRequest { expression }),
        Capability::Differentiate | Capability::DifferentiateWithSteps => {
            serde_json::to_value(DifferentiateRequest {
                expression,
                variable: variable()?,
                order_of_derivative: order,
            })
        }
        Capability::Integrate => {
            let bound = match (upper, lower) {
                (Some(upper_bound), Some(lower_bound)) => Some(Bound {
                    upper_bound,
                    lower_bound,
                }),
                _ => None,
            };
            serde_json::to_value(IntegrateRequest {
                expression,
                variable: variable()?,
                bound,
            })
        }
    };
    payload.map_err(|e| e.to_string())
}

async fn cmd_call(settings: &Settings, capability: Capability, payload: Value) -> ExitCode {
    let config = match settings.workers.supervisor_config(capability) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error configuring worker: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let service = WorkerService::start(config);
    let result = service.submit(&payload).await;
    service.shutdown().await;

    match result {
        Ok(value) => {
            match serde_json::to_string_pretty(&value) {
                Ok(text) => println!("{}", text),
                Err(_) => println!("{}", value),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_config(settings: &Settings) -> ExitCode {
    match toml::to_string_pretty(settings) {
        Ok(text) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error rendering configuration: {}", e);
            ExitCode::FAILURE
        }
    }
}
