//! Server configuration parsing and validation.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Keepalive cadence for each stream profile.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct KeepaliveConfig {
    /// Heartbeat interval on the legacy `/mcp/sse` event stream.
    #[serde(default = "default_sse_seconds")]
    pub sse_seconds: u64,
    /// Heartbeat interval on the `/mcp/stream` NDJSON stream.
    #[serde(default = "default_stream_seconds")]
    pub stream_seconds: u64,
    /// Heartbeat interval on the unified `/mcp` event stream.
    #[serde(default = "default_stream_seconds")]
    pub unified_seconds: u64,
    /// Reconnection hint (`retry:` field) sent on the unified stream.
    #[serde(default = "default_retry_millis")]
    pub retry_millis: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            sse_seconds: default_sse_seconds(),
            stream_seconds: default_stream_seconds(),
            unified_seconds: default_stream_seconds(),
            retry_millis: default_retry_millis(),
        }
    }
}

fn default_sse_seconds() -> u64 {
    20
}

fn default_stream_seconds() -> u64 {
    15
}

fn default_retry_millis() -> u64 {
    15_000
}

fn default_bind_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    3000
}

fn default_server_name() -> String {
    "mcp-switchboard".into()
}

fn default_sink_buffer() -> usize {
    64
}

fn default_write_timeout_millis() -> u64 {
    5_000
}

/// Server configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface the HTTP listener binds to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// HTTP port for all stream and call endpoints.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Name announced in the `initialize` response.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Encoded frames buffered per sink before writers wait. The opening
    /// frames of a stream do not count against it.
    #[serde(default = "default_sink_buffer")]
    pub sink_buffer: usize,
    /// Longest a push or keepalive waits on a full sink before the write
    /// counts as failed.
    #[serde(default = "default_write_timeout_millis")]
    pub write_timeout_millis: u64,
    /// Heartbeat intervals.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            http_port: default_http_port(),
            server_name: default_server_name(),
            sink_buffer: default_sink_buffer(),
            write_timeout_millis: default_write_timeout_millis(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address the HTTP listener binds to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `bind_host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_host, self.http_port)
            .parse()
            .map_err(|err| AppError::Config(format!("invalid bind address: {err}")))
    }

    /// Bound on a single sink write.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_millis)
    }

    /// Legacy event-stream heartbeat interval.
    #[must_use]
    pub fn sse_keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive.sse_seconds)
    }

    /// NDJSON stream heartbeat interval.
    #[must_use]
    pub fn stream_keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive.stream_seconds)
    }

    /// Unified event-stream heartbeat interval.
    #[must_use]
    pub fn unified_keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive.unified_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.sink_buffer == 0 {
            return Err(AppError::Config(
                "sink_buffer must be greater than zero".into(),
            ));
        }

        if self.write_timeout_millis == 0 {
            return Err(AppError::Config(
                "write_timeout_millis must be greater than zero".into(),
            ));
        }

        let keepalive = &self.keepalive;
        if keepalive.sse_seconds == 0 || keepalive.stream_seconds == 0 || keepalive.unified_seconds == 0
        {
            return Err(AppError::Config(
                "keepalive intervals must be greater than zero".into(),
            ));
        }

        if keepalive.sse_seconds < keepalive.stream_seconds {
            return Err(AppError::Config(
                "keepalive.sse_seconds must not be shorter than keepalive.stream_seconds".into(),
            ));
        }

        self.bind_addr()?;
        Ok(())
    }
}
