use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KgError {
    #[error("Instance not found: {id}")]
    NotFound { id: String },

    #[error("Request failed: {}", .0.describe())]
    Request(#[from] RequestError),

    #[error("Failed to fetch instance {id}: {message}")]
    Fetch { id: String, message: String },

    #[error("Failed to save instance {id}: {message}")]
    Save { id: String, message: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Operation '{operation}' is not implemented for widget {widget}")]
    NotImplemented {
        widget: String,
        operation: &'static str,
    },

    #[error("Invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, KgError>;

/// Error returned by an `Api` implementation.
///
/// Mirrors the transport error shape `{ message, response?: { status, data } }`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct RequestError {
    pub message: String,
    pub status: Option<u16>,
    pub data: Option<Value>,
}

impl RequestError {
    pub fn new(message: impl Into<String>) -> Self {
        RequestError {
            message: message.into(),
            status: None,
            data: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        RequestError {
            message: message.into(),
            status: Some(status),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Human-readable message built from status, message and response body.
    pub fn describe(&self) -> String {
        let body = match &self.data {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        match (self.status, body) {
            (Some(status), Some(body)) => format!("{} ({status}): {body}", self.message),
            (Some(status), None) => format!("{} ({status})", self.message),
            (None, Some(body)) => format!("{}: {body}", self.message),
            (None, None) => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(RequestError::with_status("missing", 404).is_not_found());
        assert!(!RequestError::with_status("boom", 500).is_not_found());
        assert!(!RequestError::new("offline").is_not_found());
    }

    #[test]
    fn test_describe_includes_status_and_body() {
        let err = RequestError::with_status("Bad gateway", 502)
            .with_data(Value::String("upstream timeout".into()));
        assert_eq!(err.describe(), "Bad gateway (502): upstream timeout");
        assert_eq!(RequestError::new("offline").describe(), "offline");
    }
}
