use std::future::Future;
use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common_auth::{JwtVerifier, TokenSigner};
use common_rpc::{unary_fn, InterceptorChain, RpcRequest, RpcResponse, RpcResult, RpcRouter};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, warn};

use crate::auth_interceptor::AuthInterceptor;
use crate::config::ServiceConfig;
use crate::expense_handlers::{
    create_expense, delete_expense, get_expense, list_expenses, update_expense, CREATE_EXPENSE,
    DELETE_EXPENSE, GET_EXPENSE, LIST_EXPENSES, UPDATE_EXPENSE,
};
use crate::metrics::{ApiMetrics, MetricsInterceptor};
use crate::payment_handlers::{
    make_payment, mark_invoice_paid, pay_invoice, MAKE_PAYMENT, MARK_INVOICE_PAID, PAY_INVOICE,
};
use crate::rate_limiter::{ClientRateLimiter, LoginRateLimitInterceptor};
use crate::repo::DataStore;
use crate::user_handlers::{login_user, register_user, LOGIN_USER, REGISTER_USER};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    /// `None` when authentication is disabled.
    pub verifier: Option<Arc<JwtVerifier>>,
    pub signer: Option<Arc<TokenSigner>>,
    pub limiter: Arc<ClientRateLimiter>,
    pub metrics: Arc<ApiMetrics>,
    pub config: Arc<ServiceConfig>,
}

impl FromRef<AppState> for Arc<ApiMetrics> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

impl FromRef<AppState> for Arc<dyn DataStore> {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}

/// Interceptor order, outermost first: metrics, login rate limit, auth.
pub fn build_chain(state: &AppState) -> InterceptorChain {
    let mut chain = InterceptorChain::new()
        .with(MetricsInterceptor::new(state.metrics.clone()))
        .with(
            LoginRateLimitInterceptor::new(state.limiter.clone())
                .with_metrics(state.metrics.clone()),
        );

    match &state.verifier {
        Some(verifier) => {
            chain = chain.with(AuthInterceptor::new(
                verifier.clone(),
                state.config.auth_skip_suffixes.clone(),
            ));
        }
        None => warn!("authentication is DISABLED; every procedure is publicly callable"),
    }

    chain
}

pub fn build_rpc_router(state: &AppState) -> RpcRouter {
    let router = RpcRouter::new(build_chain(state));
    let router = procedure(router, state, REGISTER_USER, register_user);
    let router = procedure(router, state, LOGIN_USER, login_user);
    let router = procedure(router, state, MAKE_PAYMENT, make_payment);
    let router = procedure(router, state, MARK_INVOICE_PAID, mark_invoice_paid);
    let router = procedure(router, state, PAY_INVOICE, pay_invoice);
    let router = procedure(router, state, CREATE_EXPENSE, create_expense);
    let router = procedure(router, state, GET_EXPENSE, get_expense);
    let router = procedure(router, state, LIST_EXPENSES, list_expenses);
    let router = procedure(router, state, UPDATE_EXPENSE, update_expense);
    procedure(router, state, DELETE_EXPENSE, delete_expense)
}

fn procedure<F, Fut>(router: RpcRouter, state: &AppState, path: &str, handler: F) -> RpcRouter
where
    F: Fn(AppState, RpcRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<RpcResponse>> + Send + 'static,
{
    let state = state.clone();
    router.unary(path, unary_fn(move |request| handler(state.clone(), request)))
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let rpc = build_rpc_router(&state).into_router::<AppState>();

    Router::new()
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics))
        .merge(rpc)
        .with_state(state)
        .layer(cors)
}

fn cors_layer(config: &ServiceConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("connect-protocol-version"),
            HeaderName::from_static("connect-timeout-ms"),
        ])
        .expose_headers([HeaderName::from_static("x-error-code")]);

    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    layer.allow_origin(AllowOrigin::list(
        config
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| origin.parse::<HeaderValue>().ok())
            .collect::<Vec<_>>(),
    ))
}

async fn livez() -> &'static str {
    "ok"
}

async fn readyz(State(store): State<Arc<dyn DataStore>>) -> Response {
    match store.ping().await {
        Ok(()) => (StatusCode::OK, "ready").into_response(),
        Err(err) => {
            warn!(error = %err, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

#[derive(Serialize)]
struct VersionInfo {
    version: &'static str,
    commit: &'static str,
    date: &'static str,
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("BUILD_COMMIT").unwrap_or("unknown"),
        date: option_env!("BUILD_DATE").unwrap_or("unknown"),
    })
}

async fn metrics(State(metrics): State<Arc<ApiMetrics>>) -> Response {
    match metrics.render() {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
