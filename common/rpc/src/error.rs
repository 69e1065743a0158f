use std::error::Error as StdError;
use std::fmt;

use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::code::Code;

pub type RpcResult<T> = Result<T, RpcError>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Caller-visible RPC failure.
///
/// The optional `source` is kept for server-side logging and never rendered
/// into the response body.
#[derive(Debug)]
pub struct RpcError {
    code: Code,
    message: Option<String>,
    source: Option<BoxError>,
}

#[derive(Serialize, Debug)]
struct ErrorBody<'a> {
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl RpcError {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            message: None,
            source: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn unauthenticated() -> Self {
        Self::new(Code::Unauthenticated)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted).with_message(message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument).with_message(message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound).with_message(message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented).with_message(message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal).with_message(message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

impl StdError for RpcError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code.as_str(),
            message: self.message.as_deref(),
        };
        let mut resp = (self.code.http_status(), Json(body)).into_response();
        resp.headers_mut()
            .insert("X-Error-Code", HeaderValue::from_static(self.code.as_str()));
        resp
    }
}
