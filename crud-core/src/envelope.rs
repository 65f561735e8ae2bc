//! Uniform JSON response envelope
//!
//! Every response, success or failure, has the same shape:
//!
//! ```json
//! {
//!   "correlationId": "cid_01h455vb4pex5vsknk084sn02q",
//!   "code": 200,
//!   "message": "SUCCESS",
//!   "data": { "id": 1 }
//! }
//! ```
//!
//! Meta entries are merged next to those four keys. A [`Page`] payload adds a
//! `paginate` block and puts the page items in `data`.
//!
//! Building an envelope is pure: [`Envelope::render`] returns a
//! [`WireResponse`] value, which becomes an HTTP response through axum's
//! [`IntoResponse`].

use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::DeploymentMode;
use crate::ids::CorrelationId;
use crate::repository::{Page, Row};

/// Default success message
pub const SUCCESS: &str = "SUCCESS";
/// Message for failures whose details are withheld
pub const FAIL: &str = "Fail";
pub const SERVER_ERROR: &str = "Server error";
pub const NOT_FOUND: &str = "Not Found";
pub const UNAUTHENTICATED: &str = "Unauthenticated";
pub const UNAUTHORIZED: &str = "Unauthorized";
pub const METHOD_NOT_ALLOWED: &str = "Method not allow";

/// Content type every envelope is served with
pub const CONTENT_TYPE: &str = "application/json;charset=UTF-8";

const CHARSET: HeaderName = HeaderName::from_static("charset");

/// The `data` of an envelope, with the paging block when the payload was a [`Page`]
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    value: Value,
    paginate: Option<Value>,
}

impl Data {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            paginate: None,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn paginate(&self) -> Option<&Value> {
        self.paginate.as_ref()
    }
}

/// Payloads an envelope can carry
pub trait IntoData {
    fn into_data(self) -> serde_json::Result<Data>;
}

impl IntoData for Data {
    fn into_data(self) -> serde_json::Result<Data> {
        Ok(self)
    }
}

impl IntoData for Value {
    fn into_data(self) -> serde_json::Result<Data> {
        Ok(Data::new(self))
    }
}

impl IntoData for Row {
    fn into_data(self) -> serde_json::Result<Data> {
        Ok(Data::new(Value::Object(self)))
    }
}

impl IntoData for () {
    fn into_data(self) -> serde_json::Result<Data> {
        Ok(Data::new(Value::Null))
    }
}

impl IntoData for &str {
    fn into_data(self) -> serde_json::Result<Data> {
        Ok(Data::new(Value::String(self.to_string())))
    }
}

impl IntoData for bool {
    fn into_data(self) -> serde_json::Result<Data> {
        Ok(Data::new(Value::Bool(self)))
    }
}

impl<T: Serialize> IntoData for Json<T> {
    fn into_data(self) -> serde_json::Result<Data> {
        serde_json::to_value(self.0).map(Data::new)
    }
}

impl<T: Serialize> IntoData for Option<T> {
    fn into_data(self) -> serde_json::Result<Data> {
        serde_json::to_value(self).map(Data::new)
    }
}

impl<T: Serialize> IntoData for Vec<T> {
    fn into_data(self) -> serde_json::Result<Data> {
        serde_json::to_value(self).map(Data::new)
    }
}

impl<T: Serialize> IntoData for Page<T> {
    fn into_data(self) -> serde_json::Result<Data> {
        let paginate = json!({
            "current_page": self.current_page(),
            "last_page": self.last_page(),
            "per_page": self.per_page(),
            "total": self.total(),
            "next": self.next(),
            "prev": self.prev(),
        });
        Ok(Data {
            value: serde_json::to_value(self.into_items())?,
            paginate: Some(paginate),
        })
    }
}

/// A rendered envelope: status, headers and JSON body
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl WireResponse {
    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }

    pub fn data(&self) -> &Value {
        self.body.get("data").unwrap_or(&Value::Null)
    }
}

impl IntoResponse for WireResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

/// Renders envelopes for one request
///
/// ```rust
/// use crud_core::config::DeploymentMode;
/// use crud_core::envelope::Envelope;
/// use crud_core::ids::CorrelationId;
/// use serde_json::json;
///
/// let envelope = Envelope::new(CorrelationId::new(), DeploymentMode::Development);
/// let wire = envelope.success(json!({"id": 1}));
///
/// assert_eq!(wire.status.as_u16(), 200);
/// assert_eq!(wire.body["message"], "SUCCESS");
/// assert_eq!(wire.body["data"]["id"], 1);
/// ```
#[derive(Debug, Clone)]
pub struct Envelope {
    correlation_id: CorrelationId,
    mode: DeploymentMode,
}

impl Envelope {
    pub fn new(correlation_id: CorrelationId, mode: DeploymentMode) -> Self {
        Self {
            correlation_id,
            mode,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    /// Build an envelope
    ///
    /// `meta` keys are merged at the top level but never replace the four
    /// envelope keys. `headers` are added on top of the default content type.
    pub fn render(
        &self,
        status: StatusCode,
        message: impl Into<String>,
        data: impl IntoData,
        meta: Map<String, Value>,
        headers: HeaderMap,
    ) -> WireResponse {
        let data = match data.into_data() {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(
                    correlation_id = %self.correlation_id,
                    error = %e,
                    "response data could not be serialized"
                );
                return self.render(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    SERVER_ERROR,
                    Value::Null,
                    Map::new(),
                    HeaderMap::new(),
                );
            }
        };

        let mut body = Map::new();
        body.insert(
            "correlationId".into(),
            Value::String(self.correlation_id.to_string()),
        );
        body.insert("code".into(), Value::from(status.as_u16()));
        body.insert("message".into(), Value::String(message.into()));
        body.insert("data".into(), data.value);
        if let Some(paginate) = data.paginate {
            body.insert("paginate".into(), paginate);
        }
        for (key, value) in meta {
            body.entry(key).or_insert(value);
        }

        let mut all_headers = default_headers();
        all_headers.extend(headers);

        WireResponse {
            status,
            headers: all_headers,
            body: Value::Object(body),
        }
    }

    fn plain(&self, status: StatusCode, message: impl Into<String>, data: impl IntoData) -> WireResponse {
        self.render(status, message, data, Map::new(), HeaderMap::new())
    }

    /// 200 with the `SUCCESS` message
    pub fn success(&self, data: impl IntoData) -> WireResponse {
        self.plain(StatusCode::OK, SUCCESS, data)
    }

    pub fn created(&self, data: impl IntoData) -> WireResponse {
        self.plain(StatusCode::CREATED, SUCCESS, data)
    }

    pub fn updated(&self, data: impl IntoData) -> WireResponse {
        self.plain(StatusCode::OK, SUCCESS, data)
    }

    pub fn not_found(&self, message: impl Into<String>) -> WireResponse {
        self.plain(StatusCode::NOT_FOUND, message, Value::Null)
    }

    /// 422; `errors` becomes `data`
    pub fn validation_failed(&self, message: impl Into<String>, errors: impl IntoData) -> WireResponse {
        self.plain(StatusCode::UNPROCESSABLE_ENTITY, message, errors)
    }

    pub fn unauthenticated(&self) -> WireResponse {
        self.plain(StatusCode::UNAUTHORIZED, UNAUTHENTICATED, Value::Null)
    }

    pub fn unauthorized(&self) -> WireResponse {
        self.plain(StatusCode::FORBIDDEN, UNAUTHORIZED, Value::Null)
    }

    pub fn request_timeout(&self) -> WireResponse {
        self.plain(
            StatusCode::REQUEST_TIMEOUT,
            SERVER_ERROR,
            Value::String(String::new()),
        )
    }

    /// 400; `traces` and `payload` are attached only outside production
    pub fn bad_request(
        &self,
        message: impl Into<String>,
        traces: Vec<String>,
        payload: Value,
    ) -> WireResponse {
        let mut meta = Map::new();
        if !self.mode.is_production() {
            meta.insert("payload".into(), payload);
            meta.insert("traces".into(), Value::from(traces));
        }
        self.render(StatusCode::BAD_REQUEST, message, Value::Null, meta, HeaderMap::new())
    }

    pub fn server_error(&self) -> WireResponse {
        self.plain(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR, Value::Null)
    }

    pub fn method_not_allowed(&self) -> WireResponse {
        self.plain(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED, Value::Null)
    }

    /// Failure with an arbitrary status and message
    pub fn error(&self, status: StatusCode, message: impl Into<String>) -> WireResponse {
        self.plain(status, message, Value::Null)
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(CHARSET, HeaderValue::from_static("utf-8"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(mode: DeploymentMode) -> Envelope {
        Envelope::new(CorrelationId::new(), mode)
    }

    #[test]
    fn test_every_envelope_has_four_keys() {
        let env = envelope(DeploymentMode::Development);
        for wire in [
            env.success(()),
            env.not_found("missing"),
            env.unauthenticated(),
            env.server_error(),
        ] {
            let body = wire.body.as_object().unwrap();
            assert_eq!(body["correlationId"], env.correlation_id().to_string());
            assert_eq!(body["code"], wire.status.as_u16());
            assert!(body.contains_key("message"));
            assert!(body.contains_key("data"));
        }
    }

    #[test]
    fn test_default_headers() {
        let wire = envelope(DeploymentMode::Development).success(());
        assert_eq!(wire.headers[header::CONTENT_TYPE], CONTENT_TYPE);
        assert_eq!(wire.headers["charset"], "utf-8");
    }

    #[test]
    fn test_custom_headers_override_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/vnd.api+json"));
        headers.insert("x-total", HeaderValue::from_static("3"));

        let wire = envelope(DeploymentMode::Development).render(
            StatusCode::OK,
            SUCCESS,
            (),
            Map::new(),
            headers,
        );
        assert_eq!(wire.headers[header::CONTENT_TYPE], "application/vnd.api+json");
        assert_eq!(wire.headers["x-total"], "3");
    }

    #[test]
    fn test_meta_merged_without_replacing_envelope_keys() {
        let mut meta = Map::new();
        meta.insert("version".into(), json!("v2"));
        meta.insert("code".into(), json!(999));

        let wire = envelope(DeploymentMode::Development).render(
            StatusCode::OK,
            "ok",
            (),
            meta,
            HeaderMap::new(),
        );
        assert_eq!(wire.body["version"], "v2");
        assert_eq!(wire.body["code"], 200);
    }

    #[test]
    fn test_page_payload_adds_paginate_block() {
        let page = Page::new(vec![json!({"id": 11}), json!({"id": 12})], 2, 10, 25);
        let wire = envelope(DeploymentMode::Development).success(page);

        assert_eq!(wire.body["data"].as_array().unwrap().len(), 2);
        assert_eq!(
            wire.body["paginate"],
            json!({
                "current_page": 2,
                "last_page": 3,
                "per_page": 10,
                "total": 25,
                "next": 3,
                "prev": 1,
            })
        );
    }

    #[test]
    fn test_non_page_payload_has_no_paginate_block() {
        let wire = envelope(DeploymentMode::Development).success(vec![1, 2, 3]);
        assert!(wire.body.get("paginate").is_none());
        assert_eq!(wire.body["data"], json!([1, 2, 3]));
    }

    #[test]
    fn test_validation_failed_puts_errors_in_data() {
        let errors = json!({"email": ["The email field is required."]});
        let wire = envelope(DeploymentMode::Development)
            .validation_failed("The given data was invalid.", errors.clone());
        assert_eq!(wire.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(wire.data(), &errors);
    }

    #[test]
    fn test_fixed_messages() {
        let env = envelope(DeploymentMode::Development);
        assert_eq!(env.unauthenticated().message(), Some("Unauthenticated"));
        assert_eq!(env.unauthorized().status, StatusCode::FORBIDDEN);
        assert_eq!(env.method_not_allowed().message(), Some("Method not allow"));

        let timeout = env.request_timeout();
        assert_eq!(timeout.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(timeout.message(), Some("Server error"));
        assert_eq!(timeout.data(), &json!(""));
    }

    #[test]
    fn test_bad_request_diagnostics_hidden_in_production() {
        let traces = vec!["crud_core::handler".to_string()];
        let payload = json!({"method": "GET"});

        let dev = envelope(DeploymentMode::Development).bad_request("boom", traces.clone(), payload.clone());
        assert_eq!(dev.body["traces"], json!(traces));
        assert_eq!(dev.body["payload"], payload);

        let prod = envelope(DeploymentMode::Production).bad_request(FAIL, traces, payload);
        assert!(prod.body.get("traces").is_none());
        assert!(prod.body.get("payload").is_none());
        assert_eq!(prod.message(), Some("Fail"));
    }

    #[test]
    fn test_unserializable_data_renders_server_error() {
        use std::collections::HashMap;

        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON object keys");
        let wire = envelope(DeploymentMode::Development).success(Some(bad));
        assert_eq!(wire.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(wire.message(), Some("Server error"));
    }

    #[tokio::test]
    async fn test_into_response_keeps_status_and_headers() {
        let wire = envelope(DeploymentMode::Development).created(json!({"id": 5}));
        let response = wire.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["id"], 5);
    }
}
