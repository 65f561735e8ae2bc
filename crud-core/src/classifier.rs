//! Mapping errors to HTTP outcomes
//!
//! [`ErrorClassifier::classify`] applies a fixed, first-match priority list:
//!
//! | # | Matches | Status | Message |
//! |---|---------|--------|---------|
//! | 1 | field validation | 422 | error message, per-field errors as `data` |
//! | 2 | domain validation, rejected query spec, supplied 422 | 422 | error message |
//! | 3 | not found, supplied 404 | 404 | error message |
//! | 4 | unauthenticated, supplied 401 | 401 | `Unauthenticated` |
//! | 5 | unauthorized, supplied 403 | 403 | `Unauthorized` |
//! | 6 | timeout, connection failure, supplied 408 | 408 | `Server error` |
//! | 7 | conflict, duplicate key, constraint, supplied 409 | 409 | error message |
//! | 8 | rate limited, supplied 429 | 429 | error message |
//! | 9 | anything else in production | 400 | `Fail` |
//! | 10 | anything else elsewhere | 400 | error message, traces and request payload |
//!
//! Type checks look at the innermost error, status checks at the status
//! supplied with it. Validation failures are not logged; every other outcome
//! is logged exactly once.

use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::config::{Config, DeploymentMode};
use crate::context::RequestInfo;
use crate::envelope::{self, Envelope, WireResponse};
use crate::error::{Error, FieldErrors};
use crate::repository::RepositoryErrorKind;

/// Outcome category chosen for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FieldValidation,
    DomainValidation,
    NotFound,
    Unauthenticated,
    Unauthorized,
    Timeout,
    Conflict,
    RateLimited,
    /// Unmatched failure; details withheld
    Unexpected,
}

impl ErrorKind {
    fn is_validation(self) -> bool {
        matches!(self, Self::FieldValidation | Self::DomainValidation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetails {
    Fields(FieldErrors),
    Diagnostics { traces: Vec<String>, payload: Value },
}

/// A classified error, ready to render
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub message: String,
    pub details: Option<ErrorDetails>,
}

impl Classification {
    fn new(kind: ErrorKind, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    mode: DeploymentMode,
    app_frame_marker: String,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DeploymentMode::default(), "crud_core")
    }
}

impl ErrorClassifier {
    /// `app_frame_marker` selects the stack frames shown outside production
    pub fn new(mode: DeploymentMode, app_frame_marker: impl Into<String>) -> Self {
        Self {
            mode,
            app_frame_marker: app_frame_marker.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.deployment_mode(),
            config.diagnostics.app_frame_marker.clone(),
        )
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn classify(&self, err: &Error, request: &RequestInfo) -> Classification {
        let classification = self.decide(err, request);
        if !classification.kind.is_validation() {
            tracing::error!(
                error = %err,
                kind = ?classification.kind,
                status = classification.status.as_u16(),
                trace = ?err.trace(),
                "request failed"
            );
        }
        classification
    }

    fn decide(&self, err: &Error, request: &RequestInfo) -> Classification {
        let inner = err.innermost();
        let supplied = err.supplied_status();
        let repo = err.repository_kind();
        let message = client_message(err);

        if let Error::Validation { message, errors } = inner {
            return Classification {
                details: Some(ErrorDetails::Fields(errors.clone())),
                ..Classification::new(
                    ErrorKind::FieldValidation,
                    StatusCode::UNPROCESSABLE_ENTITY,
                    message.clone(),
                )
            };
        }

        if matches!(inner, Error::DomainValidation(_) | Error::QuerySpec(_))
            || repo == Some(RepositoryErrorKind::ValidationFailed)
            || supplied == Some(StatusCode::UNPROCESSABLE_ENTITY)
        {
            return Classification::new(
                ErrorKind::DomainValidation,
                StatusCode::UNPROCESSABLE_ENTITY,
                message,
            );
        }

        if matches!(inner, Error::NotFound(_))
            || repo == Some(RepositoryErrorKind::NotFound)
            || supplied == Some(StatusCode::NOT_FOUND)
        {
            return Classification::new(ErrorKind::NotFound, StatusCode::NOT_FOUND, message);
        }

        if matches!(inner, Error::Unauthenticated(_)) || supplied == Some(StatusCode::UNAUTHORIZED)
        {
            return Classification::new(
                ErrorKind::Unauthenticated,
                StatusCode::UNAUTHORIZED,
                envelope::UNAUTHENTICATED,
            );
        }

        if matches!(inner, Error::Unauthorized(_)) || supplied == Some(StatusCode::FORBIDDEN) {
            return Classification::new(
                ErrorKind::Unauthorized,
                StatusCode::FORBIDDEN,
                envelope::UNAUTHORIZED,
            );
        }

        if is_timeout(inner, repo) || supplied == Some(StatusCode::REQUEST_TIMEOUT) {
            return Classification::new(
                ErrorKind::Timeout,
                StatusCode::REQUEST_TIMEOUT,
                envelope::SERVER_ERROR,
            );
        }

        if matches!(inner, Error::Conflict(_))
            || repo.is_some_and(RepositoryErrorKind::is_constraint)
            || supplied == Some(StatusCode::CONFLICT)
        {
            return Classification::new(ErrorKind::Conflict, StatusCode::CONFLICT, message);
        }

        if matches!(inner, Error::RateLimited(_)) || supplied == Some(StatusCode::TOO_MANY_REQUESTS)
        {
            return Classification::new(
                ErrorKind::RateLimited,
                StatusCode::TOO_MANY_REQUESTS,
                message,
            );
        }

        if self.mode.is_production() {
            return Classification::new(ErrorKind::Unexpected, StatusCode::BAD_REQUEST, envelope::FAIL);
        }

        Classification {
            details: Some(ErrorDetails::Diagnostics {
                traces: self.app_frames(err.trace()),
                payload: request.to_payload(),
            }),
            ..Classification::new(ErrorKind::Unexpected, StatusCode::BAD_REQUEST, message)
        }
    }

    /// Classify `err` and build its envelope
    pub fn render(&self, envelope: &Envelope, err: &Error, request: &RequestInfo) -> WireResponse {
        let Classification {
            kind,
            status,
            message,
            details,
        } = self.classify(err, request);

        match (kind, details) {
            (ErrorKind::FieldValidation, Some(ErrorDetails::Fields(errors))) => {
                match serde_json::to_value(errors) {
                    Ok(errors) => envelope.validation_failed(message, errors),
                    Err(_) => envelope.validation_failed(message, Value::Null),
                }
            }
            (ErrorKind::Timeout, _) => envelope.request_timeout(),
            (ErrorKind::Unauthenticated, _) => envelope.unauthenticated(),
            (ErrorKind::Unauthorized, _) => envelope.unauthorized(),
            (ErrorKind::NotFound, _) => envelope.not_found(message),
            (ErrorKind::Unexpected, Some(ErrorDetails::Diagnostics { traces, payload })) => {
                envelope.bad_request(message, traces, payload)
            }
            (ErrorKind::Unexpected, _) => envelope.bad_request(message, Vec::new(), Value::Null),
            (_, _) => envelope.error(status, message),
        }
    }

    /// Frames naming the application, each with its `at file:line` line
    fn app_frames(&self, trace: &[String]) -> Vec<String> {
        let mut kept = Vec::new();
        let mut keep_location = false;
        for line in trace {
            let matches = line.contains(&self.app_frame_marker);
            if line.starts_with("at ") {
                if keep_location || matches {
                    kept.push(line.clone());
                }
            } else {
                keep_location = matches;
                if matches {
                    kept.push(line.clone());
                }
            }
        }
        kept
    }
}

fn is_timeout(inner: &Error, repo: Option<RepositoryErrorKind>) -> bool {
    match inner {
        Error::Timeout(_) => true,
        Error::Upstream(e) => e.is_timeout() || e.is_connect(),
        _ => matches!(
            repo,
            Some(RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout)
        ),
    }
}

/// Message safe to show a client
fn client_message(err: &Error) -> String {
    match err.innermost() {
        Error::Repository(e) => match (&e.entity_type, &e.entity_id) {
            (Some(table), Some(id)) => format!("{}: {table} {id}", e.message),
            _ => e.message.clone(),
        },
        _ => err.to_string(),
    }
}
