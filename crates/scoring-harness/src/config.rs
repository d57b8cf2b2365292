//! Harness configuration.
//!
//! Defaults reproduce the classic scoring-server layout: a launcher script at
//! `bin/scoring-server.sh` taking `-D<key>=<value>` flags. Every field can be
//! overridden from `SCORING_HARNESS_*` environment variables or a TOML file.

use crate::endpoint::ServerEndpoint;
use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_HOST: &str = "SCORING_HARNESS_HOST";
pub const ENV_PORT: &str = "SCORING_HARNESS_PORT";
pub const ENV_SERVER_ROOT: &str = "SCORING_HARNESS_SERVER_ROOT";
pub const ENV_SERVER_PROGRAM: &str = "SCORING_HARNESS_SERVER_PROGRAM";
pub const ENV_READY_TIMEOUT_SECS: &str = "SCORING_HARNESS_READY_TIMEOUT_SECS";
pub const ENV_DRAIN_SECS: &str = "SCORING_HARNESS_DRAIN_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "SCORING_HARNESS_REQUEST_TIMEOUT_SECS";

/// How to build the server launch command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Executable to run, resolved against `working_dir` when relative.
    pub program: PathBuf,

    /// Working directory for the child process only.
    pub working_dir: Option<PathBuf>,

    /// Arguments placed before the generated flags.
    pub args: Vec<String>,

    /// Flag pointing the server at a pre-supplied model archive.
    pub model_flag: String,

    /// Flag carrying the bind host.
    pub host_flag: String,

    /// Flag carrying the bind port.
    pub port_flag: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("./bin/scoring-server.sh"),
            working_dir: None,
            args: Vec::new(),
            model_flag: "-Dtrustedanalytics.scoring-engine.archive-mar".to_string(),
            host_flag: "-Dtrustedanalytics.scoring.host".to_string(),
            port_flag: "-Dtrustedanalytics.scoring.port".to_string(),
        }
    }
}

impl LaunchConfig {
    /// Launch a specific program with no extra arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Program path to spawn.
    ///
    /// Relative paths with a directory part (`./bin/scoring-server.sh`) are
    /// joined onto `working_dir`; bare names (`sh`) stay on `PATH` lookup.
    pub fn resolved_program(&self) -> PathBuf {
        let has_dir = self
            .program
            .parent()
            .map(|p| !p.as_os_str().is_empty())
            .unwrap_or(false);
        match &self.working_dir {
            Some(dir) if self.program.is_relative() && has_dir => dir.join(&self.program),
            _ => self.program.clone(),
        }
    }

    /// Full argument list: fixed args, then `model_flag=<path>` when a model
    /// is supplied, then host and port flags.
    pub fn command_args(&self, model: Option<&Path>, endpoint: &ServerEndpoint) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(model) = model {
            args.push(format!("{}={}", self.model_flag, model.display()));
        }
        args.push(format!("{}={}", self.host_flag, endpoint.host()));
        args.push(format!("{}={}", self.port_flag, endpoint.port()));
        args
    }
}

/// How `start` decides the server is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// Poll a TCP connect until it succeeds or `timeout_ms` expires.
    TcpConnect { timeout_ms: u64, interval_ms: u64 },

    /// Sleep for a fixed delay and assume the server is up.
    FixedDelay { delay_ms: u64 },
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        ReadinessProbe::TcpConnect {
            timeout_ms: 60_000,
            interval_ms: 250,
        }
    }
}

impl ReadinessProbe {
    pub fn tcp(timeout: Duration, interval: Duration) -> Self {
        ReadinessProbe::TcpConnect {
            timeout_ms: timeout.as_millis() as u64,
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        ReadinessProbe::FixedDelay {
            delay_ms: delay.as_millis() as u64,
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Whole-request timeout for every call.
    pub request_timeout_ms: u64,

    /// TCP connect timeout.
    pub connect_timeout_ms: u64,

    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            user_agent: concat!("scoring-harness/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Complete harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub endpoint: ServerEndpoint,
    pub launch: LaunchConfig,
    pub readiness: ReadinessProbe,
    /// Wait after killing the server so the OS releases its port.
    pub drain_ms: u64,
    pub client: ClientConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            endpoint: ServerEndpoint::default(),
            launch: LaunchConfig::default(),
            readiness: ReadinessProbe::default(),
            drain_ms: 5_000,
            client: ClientConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overlaid with `SCORING_HARNESS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let host = lookup(ENV_HOST);
        let port = parse_var::<u16, _>(&lookup, ENV_PORT)?;
        if host.is_some() || port.is_some() {
            config.endpoint = ServerEndpoint::new(
                host.unwrap_or_else(|| config.endpoint.host().to_string()),
                port.unwrap_or(config.endpoint.port()),
            );
        }

        if let Some(root) = lookup(ENV_SERVER_ROOT) {
            config.launch.working_dir = Some(PathBuf::from(root));
        }
        if let Some(program) = lookup(ENV_SERVER_PROGRAM) {
            config.launch.program = PathBuf::from(program);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_READY_TIMEOUT_SECS)? {
            config.readiness = match config.readiness {
                ReadinessProbe::TcpConnect { interval_ms, .. } => ReadinessProbe::TcpConnect {
                    timeout_ms: secs * 1000,
                    interval_ms,
                },
                ReadinessProbe::FixedDelay { .. } => ReadinessProbe::FixedDelay {
                    delay_ms: secs * 1000,
                },
            };
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_DRAIN_SECS)? {
            config.drain_ms = secs * 1000;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_REQUEST_TIMEOUT_SECS)? {
            config.client.request_timeout_ms = secs * 1000;
        }

        Ok(config)
    }

    /// Load from a TOML file; missing fields take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HarnessError::Config(e.to_string()))
    }

    pub fn with_endpoint(mut self, endpoint: ServerEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_launch(mut self, launch: LaunchConfig) -> Self {
        self.launch = launch;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessProbe) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_drain(mut self, drain: Duration) -> Self {
        self.drain_ms = drain.as_millis() as u64;
        self
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| HarnessError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}
