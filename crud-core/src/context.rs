//! Per-request context
//!
//! A [`RequestContext`] is created once when a request enters the service
//! (see [`crate::middleware::request_context`]) and passed to handlers as an
//! axum extractor. It owns the correlation id every envelope of the request
//! carries, so nothing about the request lives in global state.
//!
//! ```rust,no_run
//! use axum::{extract::Path, response::IntoResponse};
//! use crud_core::prelude::*;
//!
//! async fn show(ctx: RequestContext, Path(id): Path<i64>) -> impl IntoResponse {
//!     if id <= 0 {
//!         return ctx.fail(&Error::NotFound(format!("user {id}")));
//!     }
//!     ctx.envelope().success(serde_json::json!({ "id": id }))
//! }
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, MatchedPath, Query, RawPathParams},
    http::{request::Parts, Uri},
    RequestPartsExt,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::classifier::ErrorClassifier;
use crate::config::DeploymentMode;
use crate::envelope::{Envelope, IntoData, WireResponse};
use crate::error::Error;
use crate::ids::CorrelationId;

/// What an error response may echo back about the inbound request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestInfo {
    pub method: String,
    /// Requested path
    pub name: String,
    /// Route pattern that matched, e.g. `/users/{id}`
    pub route: String,
    pub parameters: Map<String, Value>,
    pub query: Map<String, Value>,
    pub body: Value,
}

impl RequestInfo {
    /// Everything but the body, read from request parts
    pub async fn from_parts(parts: &mut Parts) -> Self {
        let route = parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();

        let parameters = match parts.extract::<RawPathParams>().await {
            Ok(params) => params
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect(),
            Err(_) => Map::new(),
        };

        let query = parse_query(&parts.uri);

        Self {
            method: parts.method.to_string(),
            name: parts.uri.path().to_string(),
            route,
            parameters,
            query,
            body: Value::Null,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Query string as a flat JSON object; repeated keys keep the last value
fn parse_query(uri: &Uri) -> Map<String, Value> {
    Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map(|Query(pairs)| pairs)
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

/// Correlation id, deployment mode and request details for one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    mode: DeploymentMode,
    request: Arc<RequestInfo>,
    classifier: ErrorClassifier,
}

impl RequestContext {
    /// A fresh context with a newly generated correlation id
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self::with_id(CorrelationId::new(), classifier)
    }

    pub fn with_id(correlation_id: CorrelationId, classifier: ErrorClassifier) -> Self {
        Self {
            correlation_id,
            mode: classifier.mode(),
            request: Arc::new(RequestInfo::default()),
            classifier,
        }
    }

    #[must_use]
    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Arc::new(request);
        self
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Envelope builder bound to this request's correlation id
    pub fn envelope(&self) -> Envelope {
        Envelope::new(self.correlation_id.clone(), self.mode)
    }

    /// Classify `err` and render it
    pub fn fail(&self, err: &Error) -> WireResponse {
        self.classifier.render(&self.envelope(), err, &self.request)
    }

    /// 200 envelope for `Ok`, classified failure for `Err`
    pub fn respond<T: IntoData>(&self, result: Result<T, Error>) -> WireResponse {
        match result {
            Ok(data) => self.envelope().success(data),
            Err(err) => self.fail(&err),
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<RequestContext>() {
            return Ok(ctx.clone());
        }

        // No middleware installed: build one for this request only.
        // Without the configured mode, diagnostics stay off.
        let info = RequestInfo::from_parts(parts).await;
        let classifier = ErrorClassifier::new(DeploymentMode::Production, "crud_core");
        let ctx = RequestContext::new(classifier).with_request(info);
        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::json;

    fn parts(uri: &str) -> Parts {
        let (parts, _) = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn test_request_info_from_parts() {
        let mut parts = parts("/users?status=active&role=admin");
        let info = RequestInfo::from_parts(&mut parts).await;

        assert_eq!(info.method, "GET");
        assert_eq!(info.name, "/users");
        assert_eq!(info.query["status"], "active");
        assert_eq!(info.query["role"], "admin");
        assert!(info.parameters.is_empty());
        assert_eq!(info.body, Value::Null);
    }

    #[test]
    fn test_payload_shape() {
        let info = RequestInfo {
            method: "POST".into(),
            name: "/users".into(),
            ..Default::default()
        }
        .with_body(json!({"email": "a@b.c"}));

        let payload = info.to_payload();
        for key in ["method", "name", "route", "parameters", "query", "body"] {
            assert!(payload.get(key).is_some(), "missing {key}");
        }
        assert_eq!(payload["body"]["email"], "a@b.c");
    }

    #[tokio::test]
    async fn test_extractor_reuses_context_from_extensions() {
        let ctx = RequestContext::new(ErrorClassifier::default());
        let mut parts = parts("/");
        parts.extensions.insert(ctx.clone());

        let extracted = RequestContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(extracted.correlation_id(), ctx.correlation_id());
    }

    #[tokio::test]
    async fn test_extractor_creates_context_once() {
        let mut parts = parts("/items");
        let first = RequestContext::from_request_parts(&mut parts, &()).await.unwrap();
        let second = RequestContext::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(first.correlation_id(), second.correlation_id());
        assert_eq!(first.request().name, "/items");
    }

    #[tokio::test]
    async fn test_extractor_without_middleware_hides_diagnostics() {
        let mut parts = parts("/reports?secret=1");
        let ctx = RequestContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ctx.mode(), DeploymentMode::Production);

        let failed = ctx.fail(&Error::unexpected("db password=hunter2"));
        assert_eq!(failed.status, StatusCode::BAD_REQUEST);
        assert_eq!(failed.body["message"], "Fail");
        assert!(failed.body.get("traces").is_none());
        assert!(failed.body.get("payload").is_none());
    }

    #[test]
    fn test_envelopes_share_correlation_id() {
        let ctx = RequestContext::new(ErrorClassifier::default());
        let ok = ctx.envelope().success(());
        let failed = ctx.fail(&Error::NotFound("gone".into()));

        assert_eq!(ok.body["correlationId"], failed.body["correlationId"]);
        assert_eq!(failed.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_respond() {
        let ctx = RequestContext::new(ErrorClassifier::default());
        assert_eq!(ctx.respond(Ok(json!([1]))).status, StatusCode::OK);
        assert_eq!(
            ctx.respond::<Value>(Err(Error::Conflict("taken".into()))).status,
            StatusCode::CONFLICT
        );
    }
}
