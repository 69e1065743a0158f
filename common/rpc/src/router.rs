use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tracing::{debug, warn};

use crate::code::Code;
use crate::error::{RpcError, RpcResult};
use crate::interceptor::{InterceptorChain, UnaryHandler};
use crate::request::{RpcRequest, RpcResponse};

pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Procedure table plus the interceptor chain every call runs through.
#[derive(Clone, Default)]
pub struct RpcRouter {
    chain: InterceptorChain,
    procedures: HashMap<String, Arc<dyn UnaryHandler>>,
}

impl RpcRouter {
    pub fn new(chain: InterceptorChain) -> Self {
        Self {
            chain,
            procedures: HashMap::new(),
        }
    }

    pub fn unary<H>(mut self, procedure: &str, handler: H) -> Self
    where
        H: UnaryHandler + 'static,
    {
        self.procedures
            .insert(procedure.to_string(), Arc::new(handler));
        self
    }

    pub fn procedures(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    /// Resolve the procedure and run it through the chain.
    pub async fn handle(&self, request: RpcRequest) -> RpcResult<RpcResponse> {
        let handler = self
            .procedures
            .get(request.procedure())
            .cloned()
            .ok_or_else(|| RpcError::not_found(format!("unknown procedure {}", request.procedure())))?;
        self.chain.dispatch(request, handler.as_ref()).await
    }

    pub fn into_router<S>(self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new()
            .route("/:service/:method", post(serve_unary))
            .with_state(Arc::new(self))
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    match headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()) {
        Some(value) => value.trim().starts_with("application/json"),
        None => true,
    }
}

async fn serve_unary(State(router): State<Arc<RpcRouter>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let procedure = parts.uri.path().to_string();

    if !is_json(&parts.headers) {
        return RpcError::invalid_argument("unsupported content type, expected application/json")
            .into_response();
    }

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(procedure = %procedure, error = %err, "failed to read request body");
            return RpcError::new(Code::ResourceExhausted)
                .with_message("request body too large")
                .into_response();
        }
    };

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let mut rpc = RpcRequest::new(procedure.clone(), body).with_headers(parts.headers);
    if let Some(peer) = peer {
        rpc = rpc.with_peer(peer);
    }

    match router.handle(rpc).await {
        Ok(response) => response.into_response(),
        Err(err) => {
            let code = err.code();
            match std::error::Error::source(&err) {
                Some(source) if code == Code::Internal => {
                    warn!(procedure = %procedure, %code, error = %source, "rpc failed")
                }
                Some(source) => debug!(procedure = %procedure, %code, error = %source, "rpc rejected"),
                None => debug!(procedure = %procedure, %code, "rpc rejected"),
            }
            err.into_response()
        }
    }
}
