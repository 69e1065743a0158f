pub mod claims;
pub mod config;
pub mod error;
pub mod extractors;
pub mod signer;
pub mod verifier;

pub use claims::Claims;
pub use config::JwtConfig;
pub use error::{AuthError, AuthResult};
pub use extractors::{parse_bearer, AUTHORIZATION_HEADER};
pub use signer::{IssuedToken, TokenSigner};
pub use verifier::{JwtVerifier, JwtVerifierBuilder, KeyRing};
