//! Error types for CourseBuilder.
//!
//! Library crates use [`CourseBuilderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all CourseBuilder operations.
#[derive(Debug, thiserror::Error)]
pub enum CourseBuilderError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Caller input was rejected (missing selection, malformed outline, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Transport-level failure talking to an external service.
    #[error("network error: {0}")]
    Network(String),

    /// The external service asked us to slow down. Retryable.
    #[error("rate limited by {service}: {message}")]
    RateLimited { service: String, message: String },

    /// The external service rejected the request or is unavailable.
    #[error("{service} error: {message}")]
    Service { service: String, message: String },

    /// AI output could not be decoded into the expected structure.
    #[error("JSON parse hatası: {message} (yanıt: {raw})")]
    ResponseParse { message: String, raw: String },

    /// A task lifecycle transition was attempted from the wrong state.
    #[error("invalid task transition for {task_id}: {message}")]
    InvalidTransition { task_id: String, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CourseBuilderError>;

impl CourseBuilderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for an entity kind and id.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a rate-limit error for a named service.
    pub fn rate_limited(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RateLimited {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Create a permanent service error for a named service.
    pub fn service(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Create a decode error that keeps the offending payload.
    pub fn response_parse(msg: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::ResponseParse {
            message: msg.into(),
            raw: raw.into(),
        }
    }

    /// Create an invalid-transition error for a task.
    pub fn invalid_transition(task_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidTransition {
            task_id: task_id.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry with backoff may succeed. Only rate limits qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CourseBuilderError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = CourseBuilderError::not_found("document", "doc-1");
        assert_eq!(err.to_string(), "document not found: doc-1");
    }

    #[test]
    fn parse_error_carries_raw_payload() {
        let err = CourseBuilderError::response_parse("expected value", "not json {");
        let text = err.to_string();
        assert!(text.starts_with("JSON parse hatası"));
        assert!(text.contains("not json {"));
    }

    #[test]
    fn only_rate_limits_are_retryable() {
        assert!(CourseBuilderError::rate_limited("completion", "429").is_retryable());
        assert!(!CourseBuilderError::service("completion", "503").is_retryable());
        assert!(!CourseBuilderError::Network("reset".into()).is_retryable());
    }
}
