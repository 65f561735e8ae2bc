//! Request context middleware
//!
//! Runs once per inbound request:
//!
//! - takes the correlation id from `x-request-id` when it is a valid
//!   correlation id, otherwise generates one
//! - captures method, path, route, parameters, query and JSON body into a
//!   [`RequestContext`] stored in the request extensions
//! - opens a span carrying the correlation id and logs `REQUEST` / `RESPONSE`
//! - echoes the id back in the response's `x-request-id` header

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    Router,
};
use serde_json::Value;
use tower_http::request_id::PropagateRequestIdLayer;
use tracing::Instrument;

use crate::classifier::ErrorClassifier;
use crate::config::Config;
use crate::context::{RequestContext, RequestInfo};
use crate::envelope::Envelope;
use crate::ids::CorrelationId;

/// Header carrying the correlation id in both directions
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Largest JSON body captured for error diagnostics
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Settings shared by every request
#[derive(Debug, Clone)]
pub struct ContextSettings {
    classifier: ErrorClassifier,
    body_limit: usize,
}

impl ContextSettings {
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self {
            classifier,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ErrorClassifier::from_config(config))
    }

    #[must_use]
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }
}

/// Install the middleware on every route of `router`
///
/// ```rust,no_run
/// use axum::{routing::get, Router};
/// use crud_core::config::Config;
/// use crud_core::middleware::request_context::{attach, ContextSettings};
///
/// let router: Router = Router::new().route("/health", get(|| async { "ok" }));
/// let router = attach(router, ContextSettings::from_config(&Config::default()));
/// ```
pub fn attach<S>(router: Router<S>, settings: ContextSettings) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(from_fn_with_state(settings, track_request))
}

pub async fn track_request(
    State(settings): State<ContextSettings>,
    request: Request,
    next: Next,
) -> Response {
    let correlation_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<CorrelationId>().ok())
        .unwrap_or_default();

    let span = tracing::info_span!("request", correlation_id = %correlation_id);

    async move {
        let (mut parts, body) = request.into_parts();
        let info = RequestInfo::from_parts(&mut parts).await;

        tracing::info!(method = %parts.method, uri = %parts.uri, "REQUEST");

        let (info, body) = if is_json(&parts) {
            match to_bytes(body, settings.body_limit).await {
                Ok(bytes) => {
                    let captured = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                    (info.with_body(captured), Body::from(bytes))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "request body could not be read");
                    let envelope = Envelope::new(correlation_id.clone(), settings.classifier.mode());
                    let mut response = envelope
                        .error(axum::http::StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
                        .into_response();
                    set_request_id(&mut response, &correlation_id);
                    return response;
                }
            }
        } else {
            (info, body)
        };

        let ctx = RequestContext::with_id(correlation_id.clone(), settings.classifier.clone())
            .with_request(info);

        if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
            parts.headers.insert(REQUEST_ID_HEADER, value);
        }
        parts.extensions.insert(ctx);

        let response = next.run(Request::from_parts(parts, body)).await;

        tracing::info!(status = response.status().as_u16(), "RESPONSE");
        response
    }
    .instrument(span)
    .await
}

fn is_json(parts: &axum::http::request::Parts) -> bool {
    parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

fn set_request_id(response: &mut Response, id: &CorrelationId) {
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
}
