//! Error taxonomy.
//!
//! `ErrorKind` is the closed set of error classes described by the spec's
//! error handling design: most kinds are recorded on a `SourceFetch` and
//! never abort a request; only `invalid_input` and `invalid_configuration`
//! are ever surfaced as a hard failure to a caller.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    InvalidConfiguration,
    UpstreamUnavailable,
    MissingCredentials,
    RateLimited,
    InsufficientOverlap,
    DeadlineExceeded,
    DegradedAllSourcesMissing,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidConfiguration => "invalid_configuration",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::MissingCredentials => "missing_credentials",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InsufficientOverlap => "insufficient_overlap",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::DegradedAllSourcesMissing => "degraded_all_sources_missing",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level application error. Client-visible variants carry an
/// `ErrorKind`; everything upstream-related is recovered locally into a
/// `SourceFetch` and never constructs one of these.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {message}")]
    Internal {
        message: String,
        correlation_id: uuid::Uuid,
    },
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidInput { .. } => ErrorKind::InvalidInput,
            AppError::InvalidConfiguration { .. } => ErrorKind::InvalidConfiguration,
            AppError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            AppError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
            correlation_id: uuid::Uuid::new_v4(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        AppError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        AppError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Correlation id to surface in the structured error body. Freshly
    /// minted for errors that didn't already carry one.
    pub fn correlation_id(&self) -> uuid::Uuid {
        match self {
            AppError::Internal { correlation_id, .. } => *correlation_id,
            _ => uuid::Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_kind: &'static str,
    pub message: String,
    pub correlation_id: String,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        ErrorBody {
            error_kind: err.kind().as_str(),
            message: err.to_string(),
            correlation_id: err.correlation_id().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_spec_taxonomy() {
        assert_eq!(ErrorKind::InvalidInput.as_str(), "invalid_input");
        assert_eq!(
            ErrorKind::DegradedAllSourcesMissing.as_str(),
            "degraded_all_sources_missing"
        );
    }

    #[test]
    fn invalid_input_round_trips_to_error_body() {
        let err = AppError::invalid_input("region id missing");
        let body: ErrorBody = (&err).into();
        assert_eq!(body.error_kind, "invalid_input");
        assert_eq!(body.message, "invalid input: region id missing");
    }
}
