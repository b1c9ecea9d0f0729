//! Controller Configuration
//!
//! Layered configuration: built-in defaults, then an optional YAML file,
//! then command-line overrides applied by the binary.

use crate::controlplane::policy::RetryPolicy;
use crate::error::{Error, Result};
use crate::store::DEFAULT_DOCK_ROUTE_FILE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50049";
pub const DEFAULT_OPS_ADDR: &str = "0.0.0.0:50048";

// =============================================================================
// Controller Config
// =============================================================================

/// Top-level controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// RPC listener for the API server and dock agents
    pub listen_addr: String,
    /// Operator HTTP surface (health, metrics, task queue)
    pub ops_addr: String,
    /// Tokio worker threads serving RPC calls
    pub worker_threads: usize,
    /// Upper bound on concurrently served RPC calls
    pub max_concurrent_requests: usize,
    /// Transport timeout for one dock RPC
    #[serde(with = "duration_str")]
    pub dock_rpc_timeout: Duration,
    /// Asynchronous workflow settings
    pub workflow: WorkflowConfig,
    /// Dock route seed file; `None` disables seeding and flushing
    pub dock_route_file: Option<PathBuf>,
    #[serde(with = "duration_str")]
    pub log_flush_frequency: Duration,
    pub log_level: String,
    pub log_json: bool,
    pub daemon: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            ops_addr: DEFAULT_OPS_ADDR.to_string(),
            worker_threads: 4,
            max_concurrent_requests: 256,
            dock_rpc_timeout: Duration::from_secs(30),
            workflow: WorkflowConfig::default(),
            dock_route_file: Some(PathBuf::from(DEFAULT_DOCK_ROUTE_FILE)),
            log_flush_frequency: Duration::from_secs(5),
            log_level: "info".to_string(),
            log_json: false,
            daemon: false,
        }
    }
}

/// Workflow retry budget and failure channel sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_attempts: u32,
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Capacity of the workflow failure channel
    pub queue_capacity: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_attempts: retry.max_attempts,
            interval: retry.interval,
            queue_capacity: 64,
        }
    }
}

impl WorkflowConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            interval: self.interval,
        }
    }
}

impl ControllerConfig {
    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
            .map_err(|e| Error::Configuration(format!("invalid config: {}", e)))
    }

    /// Load from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn listen_socket(&self) -> Result<SocketAddr> {
        parse_addr("listen_addr", &self.listen_addr)
    }

    pub fn ops_socket(&self) -> Result<SocketAddr> {
        parse_addr("ops_addr", &self.ops_addr)
    }

    /// Reject values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        self.listen_socket()?;
        self.ops_socket()?;
        if self.worker_threads == 0 {
            return Err(Error::Configuration("worker_threads must be > 0".into()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(Error::Configuration(
                "max_concurrent_requests must be > 0".into(),
            ));
        }
        if self.workflow.max_attempts == 0 {
            return Err(Error::Configuration(
                "workflow.max_attempts must be > 0".into(),
            ));
        }
        if self.workflow.queue_capacity == 0 {
            return Err(Error::Configuration(
                "workflow.queue_capacity must be > 0".into(),
            ));
        }
        if self.dock_rpc_timeout.is_zero() || self.log_flush_frequency.is_zero() {
            return Err(Error::Configuration("durations must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_addr(field: &str, raw: &str) -> Result<SocketAddr> {
    raw.parse()
        .map_err(|e| Error::Configuration(format!("invalid {} {:?}: {}", field, raw, e)))
}

// =============================================================================
// Durations
// =============================================================================

/// Parse `"3600"`, `"250ms"`, `"30s"`, `"30m"`, `"1h"` or `"1d"`
///
/// A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    if digits.is_empty() {
        return Err(Error::DurationParse(format!("missing number in {:?}", raw)));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| Error::DurationParse(format!("{:?}: {}", raw, e)))?;

    let overflow = || Error::DurationParse(format!("{:?} is out of range", raw));
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs).ok_or_else(overflow),
        "h" => value
            .checked_mul(3_600)
            .map(Duration::from_secs)
            .ok_or_else(overflow),
        "d" => value
            .checked_mul(86_400)
            .map(Duration::from_secs)
            .ok_or_else(overflow),
        other => Err(Error::DurationParse(format!(
            "unknown unit {:?} in {:?}",
            other, raw
        ))),
    }
}

/// Render a duration in the largest unit that represents it exactly
pub fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() != 0 {
        return format!("{}ms", d.as_millis());
    }
    let secs = d.as_secs();
    match secs {
        0 => "0s".to_string(),
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

/// Serde adapter for human-readable durations
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => super::parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}
