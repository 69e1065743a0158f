use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Failures raised while verifying or issuing tokens.
///
/// The variants are for logs and tests. Callers facing the network collapse
/// all of them into a single unauthenticated status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("jwt secret missing")]
    MissingSecret,
    #[error("authorization header missing")]
    MissingAuthorization,
    #[error("authorization header malformed")]
    InvalidAuthorization,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidToken
    }
}
