//! TOML-based configuration for symgate.
//!
//! Supports a config file (symgate.toml) with environment variable expansion
//! in command and path values.
//!
//! Example configuration:
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3001
//!
//! [workers]
//! interpreter = "python3"
//! script_dir = "${SYMGATE_HOME}/scripts"
//! restart_delay = "1s"
//! backoff_multiplier = 2.0
//! max_restart_delay = "30s"
//! max_restarts = 10
//! request_timeout = "20s"
//! max_queue_depth = 256
//!
//! [workers.capabilities.integrate]
//! script = "integration.py"
//!
//! [workers.capabilities.matrix]
//! command = ["python3", "-u", "./scripts/matrix.py"]
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::Capability;
use crate::worker::{
    Correlation, LaunchSpec, QueuePolicy, RestartPolicy, StderrPolicy, SupervisorConfig,
};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid duration format: {0}")]
    InvalidDuration(String),

    #[error("Unknown capability in config: {0}")]
    UnknownCapability(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// HTTP listener configuration.
    pub server: ServerSettings,

    /// Worker process configuration.
    pub workers: WorkerSettings,

    /// Log output configuration.
    pub logging: LoggingSettings,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Return worker error text in 500 responses instead of a generic message.
    pub expose_error_details: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            expose_error_details: true,
        }
    }
}

impl ServerSettings {
    /// `host:port` string suitable for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Worker process configuration shared by all capabilities.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Program used to run worker scripts.
    pub interpreter: String,

    /// Directory holding the worker scripts (supports ${ENV_VAR} expansion).
    pub script_dir: String,

    /// Working directory for worker processes. Inherited when unset.
    pub working_dir: Option<String>,

    /// Delay before restarting a terminated worker (e.g., "1s", "500ms").
    pub restart_delay: String,

    /// Restart delay growth per consecutive failure. 1.0 keeps it fixed.
    pub backoff_multiplier: f64,

    /// Upper bound on the restart delay.
    pub max_restart_delay: String,

    /// Consecutive failures tolerated before giving up. 0 retries forever.
    pub max_restarts: u32,

    /// Deadline for an in-flight request. Empty waits forever.
    pub request_timeout: String,

    /// Upper bound on pending requests per capability. 0 is unbounded.
    pub max_queue_depth: usize,

    /// How responses are matched to requests.
    pub correlation: Correlation,

    /// Requests in flight per worker; only honoured with tagged correlation.
    pub max_in_flight: usize,

    /// What stderr output means.
    pub stderr: StderrPolicy,

    /// Per-capability overrides, keyed by capability name.
    pub capabilities: BTreeMap<String, CapabilitySettings>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script_dir: "./scripts".to_string(),
            working_dir: None,
            restart_delay: "1s".to_string(),
            backoff_multiplier: 1.0,
            max_restart_delay: "30s".to_string(),
            max_restarts: 0,
            request_timeout: String::new(),
            max_queue_depth: 0,
            correlation: Correlation::Positional,
            max_in_flight: 1,
            stderr: StderrPolicy::Reject,
            capabilities: BTreeMap::new(),
        }
    }
}

/// Overrides for a single capability.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CapabilitySettings {
    /// Script file name, resolved against `script_dir`.
    pub script: Option<String>,

    /// Full command line, replacing interpreter and script entirely.
    pub command: Option<Vec<String>>,
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when neither SYMGATE_LOG nor RUST_LOG is set.
    pub level: String,
    /// Output format: pretty, compact, json.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SYMGATE_CONFIG`
    /// 2. `./symgate.toml`
    /// 3. `~/.config/symgate/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SYMGATE_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("symgate.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("symgate").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Check values that cannot be expressed in the types alone.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let workers = &self.workers;
        for key in workers.capabilities.keys() {
            key.parse::<Capability>()
                .map_err(|_| SettingsError::UnknownCapability(key.clone()))?;
        }
        if !workers.backoff_multiplier.is_finite() || workers.backoff_multiplier < 1.0 {
            return Err(SettingsError::InvalidConfig(format!(
                "workers.backoff_multiplier must be >= 1.0, got {}",
                workers.backoff_multiplier
            )));
        }
        if workers.max_in_flight == 0 {
            return Err(SettingsError::InvalidConfig(
                "workers.max_in_flight must be at least 1".to_string(),
            ));
        }
        if workers.max_in_flight > 1 && workers.correlation == Correlation::Positional {
            return Err(SettingsError::InvalidConfig(
                "workers.max_in_flight > 1 requires correlation = \"tagged\"".to_string(),
            ));
        }
        for (key, overrides) in &workers.capabilities {
            if matches!(&overrides.command, Some(command) if command.is_empty()) {
                return Err(SettingsError::InvalidConfig(format!(
                    "workers.capabilities.{}.command must not be empty",
                    key
                )));
            }
        }
        workers.restart_policy()?;
        workers.request_timeout()?;
        Ok(())
    }
}

impl WorkerSettings {
    /// Overrides for `capability`, accepting any of its names as key.
    pub fn overrides(&self, capability: Capability) -> Option<&CapabilitySettings> {
        self.capabilities
            .iter()
            .find(|(key, _)| key.parse::<Capability>().ok() == Some(capability))
            .map(|(_, overrides)| overrides)
    }

    /// Command line used to launch the worker for `capability`.
    pub fn launch_spec(&self, capability: Capability) -> Result<LaunchSpec, SettingsError> {
        let overrides = self.overrides(capability);

        let mut spec = match overrides.and_then(|o| o.command.as_ref()) {
            Some(command) => {
                let mut parts = command
                    .iter()
                    .map(|part| expand_env_vars(part))
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter();
                let program = parts.next().ok_or_else(|| {
                    SettingsError::InvalidConfig(format!("empty command for {}", capability))
                })?;
                LaunchSpec::new(program, parts.collect())
            }
            None => {
                let script = overrides
                    .and_then(|o| o.script.as_deref())
                    .unwrap_or_else(|| capability.default_script());
                let script_path = Path::new(&expand_env_vars(&self.script_dir)?).join(script);
                LaunchSpec::new(
                    expand_env_vars(&self.interpreter)?,
                    vec![script_path.to_string_lossy().into_owned()],
                )
            }
        };

        if let Some(dir) = &self.working_dir {
            spec.working_dir = Some(PathBuf::from(expand_env_vars(dir)?));
        }
        Ok(spec)
    }

    /// Restart policy described by the restart settings.
    pub fn restart_policy(&self) -> Result<RestartPolicy, SettingsError> {
        Ok(RestartPolicy {
            base_delay: parse_duration(&self.restart_delay)?,
            multiplier: self.backoff_multiplier,
            max_delay: parse_duration(&self.max_restart_delay)?,
            max_restarts: (self.max_restarts > 0).then_some(self.max_restarts),
        })
    }

    /// Request timeout, or `None` when unset.
    pub fn request_timeout(&self) -> Result<Option<Duration>, SettingsError> {
        let value = self.request_timeout.trim();
        if value.is_empty() || value == "0" {
            return Ok(None);
        }
        parse_duration(value).map(Some)
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            correlation: self.correlation,
            max_in_flight: self.max_in_flight,
            max_depth: (self.max_queue_depth > 0).then_some(self.max_queue_depth),
        }
    }

    /// Full supervisor configuration for `capability`.
    pub fn supervisor_config(
        &self,
        capability: Capability,
    ) -> Result<SupervisorConfig, SettingsError> {
        Ok(SupervisorConfig {
            capability,
            launch: self.launch_spec(capability)?,
            restart: self.restart_policy()?,
            queue: self.queue_policy(),
            request_timeout: self.request_timeout()?,
            stderr: self.stderr,
        })
    }
}

/// Parse a duration such as `"250ms"`, `"1s"`, `"5m"` or `"1h"`.
///
/// A bare number is taken as milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration, SettingsError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let invalid = || SettingsError::InvalidDuration(s.to_string());
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let duration = match unit.trim() {
        "" | "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(invalid)?),
        "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };
    Ok(duration)
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
