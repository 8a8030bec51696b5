//! Error types and handling for the JIRA attachment server
//!
//! Provides structured error types that map to MCP JSON-RPC error codes for
//! tool callers and to HTTP status codes for the file-serving endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

/// Custom error types for the attachment server
#[derive(Debug, Error)]
pub enum AttachmentServerError {
    /// Configuration errors (-32001)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Authentication failures against JIRA (-32002)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Network errors (-32003)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Permission denied errors (-32004)
    #[error("Permission denied: {message}")]
    Permission { message: String },

    /// The upstream resource does not exist (-32005)
    #[error("Not found: {resource} '{key}' not found")]
    UpstreamNotFound { resource: String, key: String },

    /// Invalid parameter errors (-32006)
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// A file identifier that does not have the expected syntax
    #[error("Invalid file identifier")]
    InvalidIdentifier { id: String },

    /// Unknown, expired, or already reclaimed file
    #[error("File not found or expired")]
    FileUnavailable,

    /// Local write/delete failures (-32008)
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Internal server errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AttachmentServerError {
    /// Get the MCP JSON-RPC error code for this error
    pub fn error_code(&self) -> i32 {
        match self {
            AttachmentServerError::Configuration { .. } => -32001,
            AttachmentServerError::Authentication { .. } => -32002,
            AttachmentServerError::Network { .. } => -32003,
            AttachmentServerError::Permission { .. } => -32004,
            AttachmentServerError::UpstreamNotFound { .. } => -32005,
            AttachmentServerError::InvalidParameter { .. } => -32006,
            AttachmentServerError::InvalidIdentifier { .. } => -32006,
            AttachmentServerError::FileUnavailable => -32005,
            AttachmentServerError::Storage { .. } => -32008,
            AttachmentServerError::Internal { .. } => -32603,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AttachmentServerError::Configuration { .. } => "configuration",
            AttachmentServerError::Authentication { .. } => "authentication",
            AttachmentServerError::Network { .. } => "network",
            AttachmentServerError::Permission { .. } => "permission",
            AttachmentServerError::UpstreamNotFound { .. } => "not_found",
            AttachmentServerError::InvalidParameter { .. } => "invalid_parameter",
            AttachmentServerError::InvalidIdentifier { .. } => "invalid_identifier",
            AttachmentServerError::FileUnavailable => "file_unavailable",
            AttachmentServerError::Storage { .. } => "storage",
            AttachmentServerError::Internal { .. } => "internal",
        }
    }

    /// HTTP status used when the error reaches the file-serving endpoint
    pub fn status_code(&self) -> StatusCode {
        match self {
            AttachmentServerError::UpstreamNotFound { .. }
            | AttachmentServerError::InvalidIdentifier { .. }
            | AttachmentServerError::FileUnavailable => StatusCode::NOT_FOUND,
            AttachmentServerError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            AttachmentServerError::Permission { .. } => StatusCode::FORBIDDEN,
            AttachmentServerError::Authentication { .. } | AttachmentServerError::Network { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AttachmentServerError::Configuration { .. }
            | AttachmentServerError::Storage { .. }
            | AttachmentServerError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get additional error data for MCP error responses
    pub fn error_data(&self) -> Option<Value> {
        let mut data = serde_json::Map::new();
        data.insert(
            "category".to_string(),
            Value::String(self.category().to_string()),
        );

        match self {
            AttachmentServerError::UpstreamNotFound { resource, key } => {
                data.insert("resource".to_string(), Value::String(resource.clone()));
                data.insert("key".to_string(), Value::String(key.clone()));
            }
            AttachmentServerError::InvalidParameter { parameter, .. } => {
                data.insert("parameter".to_string(), Value::String(parameter.clone()));
            }
            _ => {}
        }

        Some(Value::Object(data))
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        AttachmentServerError::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        AttachmentServerError::Authentication {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        AttachmentServerError::Network {
            message: message.into(),
        }
    }

    /// Create a permission error
    pub fn permission(message: impl Into<String>) -> Self {
        AttachmentServerError::Permission {
            message: message.into(),
        }
    }

    /// Create an upstream not found error
    pub fn not_found(resource: impl Into<String>, key: impl Into<String>) -> Self {
        AttachmentServerError::UpstreamNotFound {
            resource: resource.into(),
            key: key.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_param(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        AttachmentServerError::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an invalid identifier error
    pub fn invalid_id(id: impl Into<String>) -> Self {
        AttachmentServerError::InvalidIdentifier { id: id.into() }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        AttachmentServerError::Storage {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        AttachmentServerError::Internal {
            message: message.into(),
        }
    }
}

/// Convert from gouqi errors
impl From<gouqi::Error> for AttachmentServerError {
    fn from(err: gouqi::Error) -> Self {
        match err {
            gouqi::Error::Http(_) => AttachmentServerError::network(format!("HTTP error: {}", err)),
            gouqi::Error::IO(_) => AttachmentServerError::network(format!("IO error: {}", err)),
            gouqi::Error::Serde(_) => {
                AttachmentServerError::internal(format!("Serialization error: {}", err))
            }
            gouqi::Error::Unauthorized => AttachmentServerError::auth("JIRA authentication failed"),
            gouqi::Error::NotFound => AttachmentServerError::not_found("resource", "unknown"),
            gouqi::Error::Fault { .. } => {
                AttachmentServerError::internal(format!("JIRA API error: {}", err))
            }
            _ => AttachmentServerError::internal(format!("JIRA client error: {}", err)),
        }
    }
}

/// Local filesystem failures are storage errors
impl From<std::io::Error> for AttachmentServerError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                AttachmentServerError::storage(format!("permission denied: {}", err))
            }
            _ => AttachmentServerError::storage(err.to_string()),
        }
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for AttachmentServerError {
    fn from(err: serde_json::Error) -> Self {
        AttachmentServerError::internal(format!("JSON error: {}", err))
    }
}

/// Convert from TOML parsing errors
impl From<toml::de::Error> for AttachmentServerError {
    fn from(err: toml::de::Error) -> Self {
        AttachmentServerError::config(format!("TOML parsing error: {}", err))
    }
}

/// Convert from generic anyhow errors
impl From<anyhow::Error> for AttachmentServerError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        let lower_message = message.to_lowercase();

        if lower_message.contains("authentication") || lower_message.contains("unauthorized") {
            AttachmentServerError::auth(message)
        } else if lower_message.contains("not found") || lower_message.contains("404") {
            AttachmentServerError::not_found("resource", "unknown")
        } else if lower_message.contains("permission")
            || lower_message.contains("forbidden")
            || lower_message.contains("403")
        {
            AttachmentServerError::permission(message)
        } else if lower_message.contains("network")
            || lower_message.contains("connection")
            || lower_message.contains("timeout")
        {
            AttachmentServerError::network(message)
        } else if lower_message.contains("config") {
            AttachmentServerError::config(message)
        } else {
            AttachmentServerError::internal(message)
        }
    }
}

impl IntoResponse for AttachmentServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Unknown, expired, malformed and vanished files all look the same
        let body = if status == StatusCode::NOT_FOUND {
            json!({
                "error": {
                    "code": "not_found",
                    "message": "File not found or expired",
                }
            })
        } else {
            json!({
                "error": {
                    "code": self.category(),
                    "message": "Internal server error",
                }
            })
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for attachment server operations
pub type AttachmentServerResult<T> = Result<T, AttachmentServerError>;
