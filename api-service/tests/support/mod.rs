#![allow(dead_code)]

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use api_service::app::{build_router, AppState};
use api_service::config::ServiceConfig;
use api_service::metrics::ApiMetrics;
use api_service::rate_limiter::ClientRateLimiter;
use api_service::repo::InMemoryStore;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use common_auth::{JwtVerifier, KeyRing, TokenSigner};
use serde_json::Value;
use tower::util::ServiceExt;

pub const SECRET: &str = "integration-secret";
pub const PREVIOUS_SECRET: &str = "integration-secret-previous";
pub const ISSUER: &str = "api-service";
pub const AUDIENCE: &str = "api-clients";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub state: AppState,
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        jwt_secrets: vec![SECRET.to_string(), PREVIOUS_SECRET.to_string()],
        jwt_issuer: ISSUER.to_string(),
        jwt_audience: AUDIENCE.to_string(),
        ..ServiceConfig::default()
    }
}

pub fn spawn_app() -> Result<TestApp> {
    spawn_app_with(test_config())
}

pub fn spawn_app_with(config: ServiceConfig) -> Result<TestApp> {
    let store = Arc::new(InMemoryStore::new());
    let jwt_config = config.jwt_config();

    let (verifier, signer) = if config.jwt_secrets.is_empty() {
        (None, None)
    } else {
        let ring = KeyRing::new(config.jwt_secrets.iter())?;
        let signer = TokenSigner::new(&jwt_config, &ring, config.jwt_access_ttl_seconds);
        let verifier = (!config.auth_disabled).then(|| JwtVerifier::new(jwt_config.clone(), ring));
        (verifier.map(Arc::new), Some(Arc::new(signer)))
    };

    let state = AppState {
        store: store.clone(),
        verifier,
        signer,
        limiter: Arc::new(ClientRateLimiter::new(config.login_rps, config.login_burst)),
        metrics: Arc::new(ApiMetrics::new()?),
        config: Arc::new(config),
    };

    Ok(TestApp {
        router: build_router(state.clone()),
        store,
        state,
    })
}

/// Sign a token the way a peer holding `secret` would.
pub fn token_signed_with(secret: &str, subject: &str) -> Result<String> {
    let ring = KeyRing::new([secret])?;
    let signer = TokenSigner::new(&common_auth::JwtConfig::new(ISSUER, AUDIENCE), &ring, 300);
    Ok(signer.issue(subject)?.access_token)
}

pub struct RpcReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn call(&self, procedure: &str, body: Value, headers: &[(&str, &str)]) -> Result<RpcReply> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(procedure)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(serde_json::to_vec(&body)?))?;

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).context("response body is not json")?
        };
        Ok(RpcReply {
            status,
            headers,
            body,
        })
    }

    pub async fn get(&self, path: &str) -> Result<(StatusCode, String)> {
        let request = Request::builder().uri(path).body(Body::empty())?;
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await?;
        Ok((status, String::from_utf8(bytes.to_vec())?))
    }

    /// Register a user and log in, returning the access token.
    pub async fn register_and_login(&self, email: &str, password: &str) -> Result<String> {
        let reply = self
            .call(
                "/rpc.user.v1.UserService/RegisterUser",
                serde_json::json!({ "email": email, "password": password, "firstName": "Test" }),
                &[],
            )
            .await?;
        anyhow::ensure!(reply.status == StatusCode::OK, "register failed: {}", reply.body);

        let reply = self
            .call(
                "/rpc.user.v1.UserService/LoginUser",
                serde_json::json!({ "email": email, "password": password }),
                &[],
            )
            .await?;
        anyhow::ensure!(reply.status == StatusCode::OK, "login failed: {}", reply.body);
        reply.body["accessToken"]
            .as_str()
            .map(str::to_string)
            .context("accessToken missing")
    }
}

pub fn env_flag_enabled(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
