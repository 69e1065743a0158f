use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RpcResult;
use crate::request::{RpcRequest, RpcResponse};

/// Terminal handler for a unary procedure.
#[async_trait]
pub trait UnaryHandler: Send + Sync {
    async fn call(&self, request: RpcRequest) -> RpcResult<RpcResponse>;
}

/// Middleware wrapped around handler invocation.
///
/// Implementations either short-circuit with an error or forward the call with
/// `next.run(request)`.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, request: RpcRequest, next: Next<'_>) -> RpcResult<RpcResponse>;
}

/// The remainder of the chain after the current interceptor.
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn UnaryHandler,
}

impl<'a> Next<'a> {
    pub async fn run(self, request: RpcRequest) -> RpcResult<RpcResponse> {
        match self.interceptors.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    interceptors: rest,
                    handler: self.handler,
                };
                current.intercept(request, next).await
            }
            None => self.handler.call(request).await,
        }
    }
}

/// Ordered interceptors. The first one added is the outermost and runs first.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub async fn dispatch(
        &self,
        request: RpcRequest,
        handler: &dyn UnaryHandler,
    ) -> RpcResult<RpcResponse> {
        Next {
            interceptors: &self.interceptors,
            handler,
        }
        .run(request)
        .await
    }
}

/// Adapts an async closure into a [`UnaryHandler`].
pub struct UnaryFn<F>(F);

pub fn unary_fn<F, Fut>(handler: F) -> UnaryFn<F>
where
    F: Fn(RpcRequest) -> Fut + Send + Sync,
    Fut: Future<Output = RpcResult<RpcResponse>> + Send + 'static,
{
    UnaryFn(handler)
}

#[async_trait]
impl<F, Fut> UnaryHandler for UnaryFn<F>
where
    F: Fn(RpcRequest) -> Fut + Send + Sync,
    Fut: Future<Output = RpcResult<RpcResponse>> + Send + 'static,
{
    async fn call(&self, request: RpcRequest) -> RpcResult<RpcResponse> {
        (self.0)(request).await
    }
}
