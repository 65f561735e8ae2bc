//! Error types
//!
//! [`Error`] is the one failure type handlers return. It is turned into an
//! HTTP outcome exactly once, at the boundary, by
//! [`ErrorClassifier`](crate::classifier::ErrorClassifier).

use std::backtrace::Backtrace;
use std::collections::BTreeMap;

use axum::http::StatusCode;
use thiserror::Error;

use crate::query::QuerySpecError;
use crate::repository::{RepositoryError, RepositoryErrorKind};

/// Result type alias using the crate's [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Per-field validation messages, keyed by field name
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Failures a request can end with
#[derive(Debug, Error)]
pub enum Error {
    /// Request fields failed validation (422, with per-field errors)
    #[error("{message}")]
    Validation { message: String, errors: FieldErrors },

    /// A business rule rejected the request (422)
    #[error("{0}")]
    DomainValidation(String),

    #[error("{0}")]
    NotFound(String),

    /// No or invalid credentials (401)
    #[error("{0}")]
    Unauthenticated(String),

    /// Credentials valid but not allowed (403)
    #[error("{0}")]
    Unauthorized(String),

    /// An upstream call or connection timed out (408)
    #[error("{0}")]
    Timeout(String),

    /// Duplicate or conflicting resource (409)
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    RateLimited(String),

    /// An error carrying an HTTP status chosen by whoever raised it
    #[error("{message}")]
    Status {
        status: StatusCode,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    QuerySpec(#[from] QuerySpecError),

    /// Outbound HTTP call failed
    #[error(transparent)]
    Upstream(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Anything else, with the stack captured where it was raised
    #[error("{message}")]
    Unexpected { message: String, trace: Vec<String> },
}

impl Error {
    /// Field validation failure
    pub fn validation<I, K>(message: impl Into<String>, errors: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<String>)>,
        K: Into<String>,
    {
        Self::Validation {
            message: message.into(),
            errors: errors.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// A failure with an explicit HTTP status and no underlying error
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an HTTP status to this error, keeping it as the source
    #[must_use]
    pub fn with_status(self, status: StatusCode) -> Self {
        Self::Status {
            status,
            message: self.to_string(),
            source: Some(Box::new(self)),
        }
    }

    /// An unclassified failure; captures the current stack
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
            trace: frames(&Backtrace::force_capture().to_string()),
        }
    }

    /// The innermost wrapped error (self when nothing is wrapped)
    pub fn innermost(&self) -> &Error {
        let mut current = self;
        while let Error::Status {
            source: Some(inner), ..
        } = current
        {
            current = inner;
        }
        current
    }

    /// Status attached by the raiser (the outermost one wins)
    pub fn supplied_status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Upstream(e) => e.status(),
            _ => None,
        }
    }

    /// Kind of a repository failure, looking through wrappers
    pub fn repository_kind(&self) -> Option<RepositoryErrorKind> {
        match self.innermost() {
            Error::Repository(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Captured stack frames, if any
    pub fn trace(&self) -> &[String] {
        match self.innermost() {
            Error::Unexpected { trace, .. } => trace,
            _ => &[],
        }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        let trace = frames(&err.backtrace().to_string());
        Error::Unexpected {
            message: format!("{err:#}"),
            trace,
        }
    }
}

/// Non-empty, trimmed lines of a rendered backtrace
fn frames(rendered: &str) -> Vec<String> {
    rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
