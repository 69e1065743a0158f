use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};
use crate::verifier::KeyRing;

pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 900;

/// Issues HS256 access tokens signed with the active key of a [`KeyRing`].
pub struct TokenSigner {
    issuer: String,
    audience: String,
    access_ttl: Duration,
    key: EncodingKey,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
}

#[derive(Serialize)]
struct AccessClaims<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    iss: Option<&'a str>,
    sub: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    aud: Option<[&'a str; 1]>,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: &'a str,
}

impl TokenSigner {
    pub fn new(config: &JwtConfig, ring: &KeyRing, access_ttl_seconds: i64) -> Self {
        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::seconds(access_ttl_seconds.max(1)),
            key: ring.active_encoding_key().clone(),
        }
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    pub fn issue(&self, subject: &str) -> AuthResult<IssuedToken> {
        self.issue_at(subject, Utc::now())
    }

    pub fn issue_at(&self, subject: &str, now: DateTime<Utc>) -> AuthResult<IssuedToken> {
        let expires_at = now + self.access_ttl;
        let token_id = Uuid::new_v4().to_string();

        let claims = AccessClaims {
            iss: (!self.issuer.is_empty()).then_some(self.issuer.as_str()),
            sub: subject,
            aud: (!self.audience.is_empty()).then_some([self.audience.as_str()]),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: &token_id,
        };

        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|err| AuthError::Signing(err.to_string()))?;

        Ok(IssuedToken {
            access_token,
            token_type: "Bearer",
            token_id,
            expires_at,
            expires_in: self.access_ttl.num_seconds(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::JwtVerifier;
    use chrono::SubsecRound;

    #[test]
    fn issued_tokens_round_trip_through_verifier() {
        let config = JwtConfig::new("grpc-buf", "grpc-buf-clients");
        let ring = KeyRing::from_csv("current,previous").unwrap();
        let signer = TokenSigner::new(&config, &ring, 600);
        let verifier = JwtVerifier::new(config, ring);

        let issued = signer.issue("user-42").expect("issue token");
        assert_eq!(issued.token_type, "Bearer");
        assert_eq!(issued.expires_in, 600);

        let claims = verifier.verify(&issued.access_token).expect("verify");
        assert_eq!(claims.subject.as_deref(), Some("user-42"));
        assert_eq!(claims.token_id.as_deref(), Some(issued.token_id.as_str()));
        assert_eq!(claims.expires_at, Some(issued.expires_at.trunc_subsecs(0)));
    }

    #[test]
    fn tokens_signed_with_previous_active_key_survive_rotation() {
        let config = JwtConfig::new("", "");
        let old_ring = KeyRing::from_csv("k1").unwrap();
        let old_signer = TokenSigner::new(&config, &old_ring, 300);
        let token = old_signer.issue("user-1").unwrap().access_token;

        let rotated = JwtVerifier::new(config, KeyRing::from_csv("k2,k1").unwrap());
        assert!(rotated.verify(&token).is_ok());
    }

    #[test]
    fn issuer_and_audience_are_omitted_when_unset() {
        let config = JwtConfig::new("", "");
        let ring = KeyRing::from_csv("k1").unwrap();
        let signer = TokenSigner::new(&config, &ring, 300);
        let verifier = JwtVerifier::new(config, ring);

        let claims = verifier.verify(&signer.issue("u").unwrap().access_token).unwrap();
        assert!(claims.issuer.is_none());
        assert!(claims.audience.is_empty());
    }
}
