use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use common_rpc::{Interceptor, Next, RpcRequest, RpcResponse, RpcResult};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct ApiMetrics {
    registry: Registry,
    rpc_requests: IntCounterVec,
    login_attempts: IntCounterVec,
    rate_limited: IntCounter,
    limiter_clients: IntGauge,
}

impl ApiMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let rpc_requests = IntCounterVec::new(
            Opts::new(
                "rpc_requests_total",
                "Count of RPC calls grouped by procedure and status code",
            ),
            &["procedure", "code"],
        )?;
        registry.register(Box::new(rpc_requests.clone()))?;

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "login_attempts_total",
                "Count of login attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let rate_limited = IntCounter::new(
            "rate_limited_total",
            "Count of calls rejected by the login rate limiter",
        )?;
        registry.register(Box::new(rate_limited.clone()))?;

        let limiter_clients = IntGauge::new(
            "rate_limiter_clients",
            "Number of client identifiers tracked by the login rate limiter",
        )?;
        registry.register(Box::new(limiter_clients.clone()))?;

        Ok(Self {
            registry,
            rpc_requests,
            login_attempts,
            rate_limited,
            limiter_clients,
        })
    }

    pub fn rpc_completed(&self, procedure: &str, code: &str) {
        self.rpc_requests
            .with_label_values(&[procedure, code])
            .inc();
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn rate_limited(&self) {
        self.rate_limited.inc();
    }

    pub fn set_limiter_clients(&self, clients: usize) {
        self.limiter_clients
            .set(i64::try_from(clients).unwrap_or(i64::MAX));
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}

/// Outermost interceptor: counts every call by procedure and final status.
pub struct MetricsInterceptor {
    metrics: Arc<ApiMetrics>,
}

impl MetricsInterceptor {
    pub fn new(metrics: Arc<ApiMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    async fn intercept(&self, request: RpcRequest, next: Next<'_>) -> RpcResult<RpcResponse> {
        let procedure = request.procedure().to_string();
        let result = next.run(request).await;
        let code = match &result {
            Ok(_) => "ok",
            Err(err) => err.code().as_str(),
        };
        self.metrics.rpc_completed(&procedure, code);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_exposes_registered_series() {
        let metrics = ApiMetrics::new().unwrap();
        metrics.rpc_completed("/svc/Method", "ok");
        metrics.login_attempt("success");
        metrics.set_limiter_clients(3);

        let response = metrics.render().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
    }

    #[test]
    fn gather_reports_counter_values() {
        let metrics = ApiMetrics::new().unwrap();
        metrics.login_attempt("invalid_credentials");
        metrics.login_attempt("invalid_credentials");

        let families = metrics.registry.gather();
        let login = families
            .iter()
            .find(|family| family.get_name() == "login_attempts_total")
            .expect("login counter registered");
        assert_eq!(login.get_metric()[0].get_counter().get_value(), 2.0);
    }
}
