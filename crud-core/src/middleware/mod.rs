//! HTTP middleware

pub mod request_context;

pub use request_context::{attach, track_request, ContextSettings, REQUEST_ID_HEADER};
