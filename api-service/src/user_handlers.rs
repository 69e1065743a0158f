use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::SecondsFormat;
use common_rpc::{Code, RpcError, RpcRequest, RpcResponse, RpcResult};
use once_cell::sync::Lazy;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::app::AppState;
use crate::repo::NewUser;

pub const REGISTER_USER: &str = "/rpc.user.v1.UserService/RegisterUser";
pub const LOGIN_USER: &str = "/rpc.user.v1.UserService/LoginUser";

/// Verified against when the email is unknown so that both failure paths pay
/// for one Argon2 verification.
static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| hash_password("not-a-real-password").unwrap_or_default());

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub id: String,
    pub created_at: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub expires_at: String,
}

pub async fn register_user(state: AppState, request: RpcRequest) -> RpcResult<RpcResponse> {
    let RegisterRequest {
        email,
        password,
        first_name,
        last_name,
    } = request.decode()?;

    let email = normalize_email(&email);
    if email.is_empty() || !email.contains('@') {
        return Err(RpcError::invalid_argument("a valid email is required"));
    }
    if password.trim().is_empty() {
        return Err(RpcError::invalid_argument("password must not be empty"));
    }

    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| RpcError::internal("unable to register user").with_source(err))?
        .map_err(|err| {
            RpcError::internal("unable to register user")
                .with_source(format!("failed to hash password: {err}"))
        })?;

    let user = state
        .store
        .insert_user(NewUser {
            email,
            password_hash,
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
        })
        .await?;

    info!(user_id = %user.id, "user registered");

    RpcResponse::json(&RegisterResponse {
        id: user.id.to_string(),
        created_at: user.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

pub async fn login_user(state: AppState, request: RpcRequest) -> RpcResult<RpcResponse> {
    let LoginRequest { email, password } = request.decode()?;

    let Some(signer) = state.signer.clone() else {
        return Err(RpcError::new(Code::Unavailable).with_message("login is disabled"));
    };

    let email = normalize_email(&email);
    let user = match state.store.find_user_by_email(&email).await {
        Ok(user) => user,
        Err(err) => {
            state.metrics.login_attempt("error");
            return Err(err.into());
        }
    };

    let (user_id, hash) = match &user {
        Some(user) => (Some(user.id), user.password_hash.clone()),
        None => (None, DUMMY_HASH.clone()),
    };

    let password_valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|err| RpcError::internal("unable to complete login").with_source(err))?;

    let user_id = match (user_id, password_valid) {
        (Some(user_id), true) => user_id,
        _ => {
            state.metrics.login_attempt("invalid_credentials");
            return Err(invalid_credentials());
        }
    };

    let issued = signer.issue(&user_id.to_string()).map_err(|err| {
        error!(user_id = %user_id, error = %err, "failed to issue access token");
        state.metrics.login_attempt("error");
        RpcError::internal("unable to issue access token").with_source(err)
    })?;

    state.metrics.login_attempt("success");

    RpcResponse::json(&LoginResponse {
        access_token: issued.access_token,
        token_type: issued.token_type,
        expires_in: issued.expires_in,
        expires_at: issued
            .expires_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

fn invalid_credentials() -> RpcError {
    RpcError::unauthenticated().with_message("invalid credentials")
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub(crate) fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub(crate) fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trips_through_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn unparseable_hash_never_verifies() {
        assert!(!verify_password("anything", "plain-text"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn dummy_hash_is_a_real_argon2_hash() {
        assert!(PasswordHash::new(&DUMMY_HASH).is_ok());
        assert!(!verify_password("guess", &DUMMY_HASH));
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
