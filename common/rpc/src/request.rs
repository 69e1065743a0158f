use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{RpcError, RpcResult};

/// An inbound unary call as seen by interceptors and handlers.
#[derive(Debug)]
pub struct RpcRequest {
    procedure: String,
    headers: HeaderMap,
    peer: Option<SocketAddr>,
    extensions: Extensions,
    body: Bytes,
}

impl RpcRequest {
    pub fn new(procedure: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            procedure: procedure.into(),
            headers: HeaderMap::new(),
            peer: None,
            extensions: Extensions::new(),
            body: body.into(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Fully-qualified procedure path, e.g. `/rpc.user.v1.UserService/LoginUser`.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Transport-level peer address, when the server was started with connect info.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the JSON message. An empty body decodes as `{}`.
    pub fn decode<T: DeserializeOwned>(&self) -> RpcResult<T> {
        let raw: &[u8] = if self.body.is_empty() { b"{}" } else { &self.body };
        serde_json::from_slice(raw).map_err(|err| {
            RpcError::invalid_argument(format!("malformed request message: {err}"))
        })
    }
}

/// A successful unary reply.
#[derive(Debug, Clone)]
pub struct RpcResponse {
    headers: HeaderMap,
    body: serde_json::Value,
}

impl RpcResponse {
    pub fn json<T: Serialize>(message: &T) -> RpcResult<Self> {
        let body = serde_json::to_value(message).map_err(|err| {
            RpcError::internal("failed to encode response").with_source(err)
        })?;
        Ok(Self {
            headers: HeaderMap::new(),
            body,
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }
}

impl IntoResponse for RpcResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, self.headers, Json(self.body)).into_response()
    }
}
