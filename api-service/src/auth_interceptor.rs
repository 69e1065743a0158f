use std::sync::Arc;

use async_trait::async_trait;
use common_auth::{parse_bearer, AuthError, Claims, JwtVerifier};
use common_rpc::{Interceptor, Next, RpcError, RpcRequest, RpcResponse, RpcResult};
use tracing::debug;

/// Rejects calls without a valid bearer token, except for procedures whose
/// path ends with one of the skip suffixes.
///
/// Every failure surfaces as a bare `unauthenticated`; the underlying
/// [`AuthError`] is kept as the error source for logs only.
pub struct AuthInterceptor {
    verifier: Arc<JwtVerifier>,
    skip_suffixes: Vec<String>,
}

impl AuthInterceptor {
    pub fn new(verifier: Arc<JwtVerifier>, skip_suffixes: Vec<String>) -> Self {
        let skip_suffixes = skip_suffixes
            .into_iter()
            .map(|suffix| suffix.trim().to_string())
            .filter(|suffix| !suffix.is_empty())
            .collect();
        Self {
            verifier,
            skip_suffixes,
        }
    }

    pub fn is_public(&self, procedure: &str) -> bool {
        self.skip_suffixes
            .iter()
            .any(|suffix| procedure.ends_with(suffix.as_str()))
    }

    fn authenticate(&self, request: &RpcRequest) -> Result<Claims, AuthError> {
        let token = parse_bearer(request.headers())?;
        self.verifier.verify(token)
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept(&self, mut request: RpcRequest, next: Next<'_>) -> RpcResult<RpcResponse> {
        if self.is_public(request.procedure()) {
            return next.run(request).await;
        }

        match self.authenticate(&request) {
            Ok(claims) => {
                request.extensions_mut().insert(claims);
                next.run(request).await
            }
            Err(err) => {
                debug!(procedure = %request.procedure(), error = %err, "authentication failed");
                Err(RpcError::unauthenticated().with_source(err))
            }
        }
    }
}

/// Claims attached by [`AuthInterceptor`] for the current call, if any.
pub fn request_claims(request: &RpcRequest) -> Option<&Claims> {
    request.extensions().get::<Claims>()
}
