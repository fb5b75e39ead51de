//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate the upstream endpoint and listen addresses
//! - Validate value ranges (capacities and timeouts > 0, backoff bounds)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::RelayConfig;

/// Paths served by the relay itself; the WebSocket path must not shadow them.
pub const RESERVED_PATHS: [&str; 2] = ["/status", "/health"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_listen_address(&config.listener.bind_address) {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a host:port address", config.listener.bind_address),
        ));
    }

    let ws_path = &config.listener.ws_path;
    if !ws_path.starts_with('/') {
        errors.push(ValidationError::new("listener.ws_path", "must start with '/'"));
    } else if RESERVED_PATHS.contains(&ws_path.as_str()) {
        errors.push(ValidationError::new(
            "listener.ws_path",
            format!("'{}' is reserved", ws_path),
        ));
    }

    if let Err(message) = validate_endpoint(&config.upstream.endpoint) {
        errors.push(ValidationError::new("upstream.endpoint", message));
    }

    let upstream = &config.upstream;
    if upstream.backoff_base_ms == 0 {
        errors.push(ValidationError::new("upstream.backoff_base_ms", "must be greater than 0"));
    }
    if upstream.backoff_max_ms < upstream.backoff_base_ms {
        errors.push(ValidationError::new(
            "upstream.backoff_max_ms",
            "must not be less than backoff_base_ms",
        ));
    }
    if upstream.backoff_factor.is_nan() || upstream.backoff_factor < 1.0 {
        errors.push(ValidationError::new("upstream.backoff_factor", "must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&upstream.jitter_ratio) {
        errors.push(ValidationError::new("upstream.jitter_ratio", "must be between 0.0 and 1.0"));
    }

    if upstream.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_ms", "must be greater than 0"));
    }

    if config.broadcast.queue_capacity == 0 {
        errors.push(ValidationError::new("broadcast.queue_capacity", "must be greater than 0"));
    }
    if config.broadcast.send_timeout_ms == 0 {
        errors.push(ValidationError::new("broadcast.send_timeout_ms", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Accepts anything `TcpListener::bind` can resolve without a lookup here:
/// a socket address, or a host name followed by a port.
fn is_listen_address(address: &str) -> bool {
    if address.parse::<SocketAddr>().is_ok() {
        return true;
    }
    match address.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

/// Check that an upstream endpoint is something a SUB socket can connect to.
pub fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    let url = Url::parse(endpoint).map_err(|e| format!("'{}' is not a valid endpoint: {}", endpoint, e))?;
    match url.scheme() {
        "tcp" => {
            if url.host_str().map_or(true, str::is_empty) {
                return Err(format!("'{}' has no host", endpoint));
            }
            if url.port().is_none() {
                return Err(format!("'{}' has no port", endpoint));
            }
            Ok(())
        }
        "ipc" => Ok(()),
        other => Err(format!("unsupported transport '{}'", other)),
    }
}
