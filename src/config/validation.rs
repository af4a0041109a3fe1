//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, depth >= 1)
//! - Check addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ManagerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ManagerConfig;

/// A single semantic problem in the settings file.
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

pub fn validate_config(config: &ManagerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.paths.config_path.file_name().is_none() {
        errors.push(ValidationError::new(
            "paths.config_path",
            "must name a file",
        ));
    }
    if config.paths.snapshot_dir.as_os_str().is_empty() {
        errors.push(ValidationError::new("paths.snapshot_dir", "must not be empty"));
    }

    if config.validator.timeout_secs == 0 {
        errors.push(ValidationError::new("validator.timeout_secs", "must be greater than 0"));
    }
    if config.service.command_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "service.command_timeout_secs",
            "must be greater than 0",
        ));
    }
    if config.service.unit.trim().is_empty() {
        errors.push(ValidationError::new("service.unit", "must not be empty"));
    }
    if let Some(probe) = &config.service.probe_address {
        if probe.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "service.probe_address",
                format!("'{}' is not a socket address", probe),
            ));
        }
    }

    let readiness = &config.readiness;
    // the unit must be seen twice with the same activation
    if readiness.max_attempts < 2 {
        errors.push(ValidationError::new("readiness.max_attempts", "must be at least 2"));
    }
    if readiness.probe_timeout_ms == 0 {
        errors.push(ValidationError::new("readiness.probe_timeout_ms", "must be greater than 0"));
    }
    if readiness.base_delay_ms > readiness.max_delay_ms {
        errors.push(ValidationError::new(
            "readiness.base_delay_ms",
            "must not exceed readiness.max_delay_ms",
        ));
    }

    if config.snapshots.depth == 0 {
        errors.push(ValidationError::new("snapshots.depth", "must be at least 1"));
    }
    if config.writer.acquire_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "writer.acquire_timeout_secs",
            "must be greater than 0",
        ));
    }

    let links = &config.links;
    match &links.server_address {
        Some(address) if address.trim().is_empty() => {
            errors.push(ValidationError::new("links.server_address", "must not be blank"));
        }
        Some(_) => {}
        None => {
            if url::Url::parse(&links.address_lookup_url).is_err() {
                errors.push(ValidationError::new(
                    "links.address_lookup_url",
                    format!("'{}' is not a URL", links.address_lookup_url),
                ));
            }
            if links.lookup_timeout_secs == 0 {
                errors.push(ValidationError::new(
                    "links.lookup_timeout_secs",
                    "must be greater than 0",
                ));
            }
        }
    }

    let obs = &config.observability;
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("'{}' is not one of pretty, json", obs.log_format),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
