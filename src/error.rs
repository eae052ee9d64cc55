//! Error types for itemmatch.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (4=validation, 7=config, 9=remote, 10=local model)
//! - Retryability flags for callers deciding whether to re-run
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use thiserror::Error;

/// Result type alias for itemmatch operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (exit 4)
    InvalidArgument,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Remote embeddings (exit 9)
    RemoteUnavailable,
    RemoteTimeout,
    RemoteRejected,
    EmbeddingError,

    // Local model (exit 10)
    LocalModelError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::RemoteUnavailable => "REMOTE_UNAVAILABLE",
            Self::RemoteTimeout => "REMOTE_TIMEOUT",
            Self::RemoteRejected => "REMOTE_REJECTED",
            Self::EmbeddingError => "EMBEDDING_ERROR",
            Self::LocalModelError => "LOCAL_MODEL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::InvalidArgument => 4,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::RemoteUnavailable
            | Self::RemoteTimeout
            | Self::RemoteRejected
            | Self::EmbeddingError => 9,
            Self::LocalModelError => 10,
        }
    }

    /// Whether re-running the same request may succeed.
    ///
    /// True for remote outages and timeouts. False for rejected requests,
    /// bad configuration and local model failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable | Self::RemoteTimeout)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in itemmatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Remote batch still failing after the retry budget was spent.
    #[error("Remote embedding failed after {attempts} attempts: {message}")]
    RemoteBatch { attempts: u32, message: String },

    /// Overall per-call deadline elapsed.
    #[error("Remote embedding call timed out after {secs}s")]
    RemoteTimeout { secs: u64 },

    /// Non-retryable HTTP status (bad credential, bad request).
    #[error("Remote embedding rejected ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("Local embedding model error: {0}")]
    LocalModel(String),

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual} (row {row})")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        row: usize,
    },

    #[error("No API key configured for the remote embedding backend")]
    MissingCredential,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::RemoteBatch { .. } => ErrorCode::RemoteUnavailable,
            Self::RemoteTimeout { .. } => ErrorCode::RemoteTimeout,
            Self::RemoteRejected { .. } => ErrorCode::RemoteRejected,
            Self::InvalidResponse(_) | Self::DimensionMismatch { .. } => ErrorCode::EmbeddingError,
            Self::LocalModel(_) => ErrorCode::LocalModelError,
            Self::MissingCredential | Self::Config(_) => ErrorCode::ConfigError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether the failure came back from the remote embedding API.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::RemoteBatch { .. }
                | Self::RemoteTimeout { .. }
                | Self::RemoteRejected { .. }
                | Self::InvalidResponse(_)
        )
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::MissingCredential => Some(
                "Set DEEPINFRA_API_KEY (or DEEPINFRA_TOKEN), or run with \
                 MODEL_FALLBACK_MODE=local to use the local model only."
                    .to_string(),
            ),
            Self::RemoteBatch { .. } | Self::RemoteTimeout { .. } => Some(
                "The embedding API looks unavailable. Retry later, raise \
                 API_EMBED_TIMEOUT_SECS, or use --mode local."
                    .to_string(),
            ),
            Self::RemoteRejected { status: 401 | 403, .. } => {
                Some("Check that the API key is valid for the embedding endpoint.".to_string())
            }
            Self::DimensionMismatch { .. } => Some(
                "Remote and local models produce different vector sizes. Configure \
                 LOCAL_EMBEDDING_MODEL to match EMBEDDING_MODEL, or pin --mode."
                    .to_string(),
            ),
            Self::LocalModel(_) => Some(
                "The local model could not be loaded. Check network access to the \
                 HuggingFace Hub or set LOCAL_EMBEDDING_MODEL to a local path."
                    .to_string(),
            ),
            Self::InvalidArgument(msg) if msg.contains("threshold") => {
                Some("Threshold must be a number between 0 and 1.".to_string())
            }
            Self::InvalidArgument(msg) if msg.contains("mode") => Some(
                "Valid modes: auto, api-only (api), local-only (local), disabled (off)".to_string(),
            ),
            _ => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
