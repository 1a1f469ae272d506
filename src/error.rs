//! Crate-level error type
//!
//! Each layer has its own error enum; [`FleetError`] gathers them for callers
//! that drive the whole service, such as the binary.

use crate::config::ConfigError;
use crate::protocol::{CodecError, TopicError};
use crate::session::SessionError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for fleet service operations
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid topic: {0}")]
    Topic(#[from] TopicError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl FleetError {
    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Error text safe to print or serve: credentials redacted, length capped
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PAIRS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static URL_USERINFO: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)([a-z][a-z0-9+.-]*://)[^/@\s]+@").ok());

const MAX_MESSAGE_LEN: usize = 500;

/// Redact credentials from an error message and cap its length
///
/// Broker URLs may carry `user:password@`, and connection errors echo them.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(re) = SECRET_PAIRS.as_ref() {
        sanitized = re.replace_all(&sanitized, "${1}=***").to_string();
    }
    if let Some(re) = URL_USERINFO.as_ref() {
        sanitized = re.replace_all(&sanitized, "${1}***@").to_string();
    }

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for fleet service operations
pub type FleetResult<T> = Result<T, FleetError>;
