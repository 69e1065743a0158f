use http::header::AUTHORIZATION;
use http::HeaderMap;

use crate::error::{AuthError, AuthResult};

pub const AUTHORIZATION_HEADER: &str = "Authorization";

const BEARER_PREFIX: &str = "Bearer ";

/// Pull the bearer token out of the `Authorization` header.
///
/// The scheme match is case-sensitive with a single space separator.
pub fn parse_bearer(headers: &HeaderMap) -> AuthResult<&str> {
    let raw = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthorization)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthorization)?;

    let token = raw
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::InvalidAuthorization)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::InvalidAuthorization);
    }

    Ok(token)
}
