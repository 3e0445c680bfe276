pub mod web;

use config::ConfigError;
use serde_json::Error as SerdeJsonError;
use std::{collections::BTreeMap, fmt, io::Error as IoError};
use thiserror::Error;
use tokio::time::Duration;

pub type GatewayResult<T, E = GatewayError> = Result<T, E>;

/// Result returned by REST handlers; the error renders itself through [`web::ApiError`].
pub type WebResult<T> = Result<T, GatewayError>;

/// Which kind of entity a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Environment,
    Model,
    Subscription,
}

impl NotFoundKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            NotFoundKind::Environment => "ENVIRONMENT",
            NotFoundKind::Model => "MODEL",
            NotFoundKind::Subscription => "SUBSCRIPTION",
        }
    }
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single monitored item that could not be created for a mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub key: String,
    pub address: String,
    pub message: String,
}

impl ItemError {
    pub fn new(key: impl Into<String>, address: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            address: address.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} => {}] {}", self.key, self.address, self.message)
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{kind} `{id}` not found")]
    NotFound { kind: NotFoundKind, id: String },
    #[error("{message}")]
    Validation {
        message: String,
        /// Offending field (usually a mapping key) to problem description.
        fields: BTreeMap<String, String>,
    },
    #[error("Subscription failed for {} mapping(s)", .0.len())]
    Subscription(Vec<ItemError>),
    #[error("{operation} timed out after {} ms", .timeout.as_millis())]
    Timeout { operation: String, timeout: Duration },
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Data processing error: {0}")]
    DataProcessing(String),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Io(#[from] IoError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
}

impl GatewayError {
    #[inline]
    pub fn not_found(kind: NotFoundKind, id: impl Into<String>) -> Self {
        GatewayError::NotFound {
            kind,
            id: id.into(),
        }
    }

    #[inline]
    pub fn validation(message: impl Into<String>, fields: BTreeMap<String, String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
            fields,
        }
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}

impl From<String> for GatewayError {
    #[inline]
    fn from(e: String) -> Self {
        GatewayError::Internal(e)
    }
}

impl From<&str> for GatewayError {
    #[inline]
    fn from(e: &str) -> Self {
        GatewayError::Internal(e.to_string())
    }
}
