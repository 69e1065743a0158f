mod support;

use anyhow::Result;
use api_service::config::ServiceConfig;
use api_service::repo::DataStore;
use axum::http::StatusCode;
use common_auth::{JwtConfig, JwtVerifier};
use serde_json::json;
use support::{spawn_app, spawn_app_with, test_config, AUDIENCE, ISSUER, SECRET};

const REGISTER: &str = "/rpc.user.v1.UserService/RegisterUser";
const LOGIN: &str = "/rpc.user.v1.UserService/LoginUser";

#[tokio::test]
async fn login_issues_a_verifiable_token() -> Result<()> {
    let app = spawn_app()?;
    app.call(
        REGISTER,
        json!({ "email": "Ada@Example.com", "password": "hunter22", "firstName": "Ada", "lastName": "Lovelace" }),
        &[],
    )
    .await?;

    let reply = app
        .call(LOGIN, json!({ "email": "ada@example.com", "password": "hunter22" }), &[])
        .await?;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["tokenType"], "Bearer");
    assert_eq!(reply.body["expiresIn"], 900);
    assert!(reply.body["expiresAt"].as_str().is_some());

    let token = reply.body["accessToken"].as_str().unwrap();
    let verifier = JwtVerifier::builder(JwtConfig::new(ISSUER, AUDIENCE))
        .with_secret(SECRET)
        .build()?;
    let claims = verifier.verify(token)?;
    let user = app.state.store.find_user_by_email("ada@example.com").await?.unwrap();
    assert_eq!(claims.subject, Some(user.id.to_string()));
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_conflicts() -> Result<()> {
    let app = spawn_app()?;
    let body = json!({ "email": "dup@example.com", "password": "pw" });
    assert_eq!(app.call(REGISTER, body.clone(), &[]).await?.status, StatusCode::OK);

    let reply = app
        .call(REGISTER, json!({ "email": "DUP@example.com", "password": "pw" }), &[])
        .await?;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["code"], "already_exists");
    Ok(())
}

#[tokio::test]
async fn registration_validates_input() -> Result<()> {
    let app = spawn_app()?;
    for body in [
        json!({ "email": "", "password": "pw" }),
        json!({ "email": "no-at-sign", "password": "pw" }),
        json!({ "email": "ok@example.com", "password": "  " }),
    ] {
        let reply = app.call(REGISTER, body, &[]).await?;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["code"], "invalid_argument");
    }
    Ok(())
}

#[tokio::test]
async fn unknown_email_and_wrong_password_are_indistinguishable() -> Result<()> {
    let app = spawn_app()?;
    app.call(REGISTER, json!({ "email": "known@example.com", "password": "right" }), &[])
        .await?;

    let wrong_password = app
        .call(LOGIN, json!({ "email": "known@example.com", "password": "wrong" }), &[])
        .await?;
    let unknown_email = app
        .call(LOGIN, json!({ "email": "nobody@example.com", "password": "wrong" }), &[])
        .await?;

    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.status, unknown_email.status);
    assert_eq!(wrong_password.body, unknown_email.body);
    assert_eq!(
        wrong_password.body,
        json!({ "code": "unauthenticated", "message": "invalid credentials" })
    );
    Ok(())
}

#[tokio::test]
async fn login_is_rate_limited_per_client() -> Result<()> {
    let config = ServiceConfig {
        login_rps: 0.001,
        login_burst: 2,
        ..test_config()
    };
    let app = spawn_app_with(config)?;
    let body = json!({ "email": "nobody@example.com", "password": "pw" });
    let client_a = [("x-forwarded-for", "198.51.100.1, 10.0.0.1")];
    let client_b = [("x-real-ip", "198.51.100.2")];

    for _ in 0..2 {
        let reply = app.call(LOGIN, body.clone(), &client_a).await?;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    let limited = app.call(LOGIN, body.clone(), &client_a).await?;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        limited.body,
        json!({ "code": "resource_exhausted", "message": "rate limit exceeded" })
    );

    let other = app.call(LOGIN, body.clone(), &client_b).await?;
    assert_eq!(other.status, StatusCode::UNAUTHORIZED);

    // Only login is throttled.
    let register = app
        .call(REGISTER, json!({ "email": "fresh@example.com", "password": "pw" }), &client_a)
        .await?;
    assert_eq!(register.status, StatusCode::OK);

    let (_, metrics) = app.get("/metrics").await?;
    assert!(metrics.contains("rate_limited_total 1"));
    assert!(metrics.contains("rate_limiter_clients 2"));
    assert!(metrics.contains("login_attempts_total{outcome=\"invalid_credentials\"} 3"));
    Ok(())
}

#[tokio::test]
async fn issued_token_opens_protected_procedures() -> Result<()> {
    let app = spawn_app()?;
    let token = app.register_and_login("spender@example.com", "s3cret!").await?;
    let header = format!("Bearer {token}");

    let reply = app
        .call(
            "/rpc.expense.v1.ExpenseService/ListExpenses",
            json!({}),
            &[("authorization", header.as_str())],
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["expenses"], json!([]));
    Ok(())
}
