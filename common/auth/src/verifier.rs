use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, EncodingKey, Validation};
use tracing::{debug, trace};

use crate::claims::{Claims, ClaimsRepr};
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};

#[derive(Clone)]
struct RingKey {
    decoding: DecodingKey,
    encoding: EncodingKey,
}

/// Ordered HMAC secrets accepted for verification.
///
/// The first key is the active one used for signing; the rest are historical
/// keys still honoured until the tokens they signed expire.
#[derive(Clone)]
pub struct KeyRing {
    keys: Vec<RingKey>,
}

impl KeyRing {
    pub fn new<I, K>(secrets: I) -> AuthResult<Self>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let keys = secrets
            .into_iter()
            .filter_map(|secret| {
                let bytes: &[u8] = secret.as_ref();
                (!bytes.is_empty()).then(|| RingKey {
                    decoding: DecodingKey::from_secret(bytes),
                    encoding: EncodingKey::from_secret(bytes),
                })
            })
            .collect::<Vec<_>>();

        if keys.is_empty() {
            return Err(AuthError::MissingSecret);
        }
        Ok(Self { keys })
    }

    /// Parse a comma separated list, most recent secret first.
    pub fn from_csv(value: &str) -> AuthResult<Self> {
        Self::new(
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty()),
        )
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn active_encoding_key(&self) -> &EncodingKey {
        // The constructor guarantees at least one key.
        &self.keys[0].encoding
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing").field("keys", &self.keys.len()).finish()
    }
}

/// Verifies HS256 bearer tokens against a [`KeyRing`].
///
/// Holds only immutable state after construction, so a single instance can be
/// shared across concurrent requests behind an `Arc`.
#[derive(Clone)]
pub struct JwtVerifier {
    config: JwtConfig,
    ring: KeyRing,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: JwtConfig, ring: KeyRing) -> Self {
        // Signature and structure only; time, issuer and audience checks are
        // applied afterwards against an explicit clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        Self {
            config,
            ring,
            validation,
        }
    }

    pub fn builder(config: JwtConfig) -> JwtVerifierBuilder {
        JwtVerifierBuilder::new(config)
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }

    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let header = decode_header(token)?;
        if header.alg != Algorithm::HS256 {
            debug!(alg = ?header.alg, "rejecting token with unexpected signing method");
            return Err(AuthError::InvalidToken);
        }

        let mut verified = None;
        for (key_index, key) in self.ring.keys.iter().enumerate() {
            match decode::<ClaimsRepr>(token, &key.decoding, &self.validation) {
                Ok(data) => {
                    verified = Some((key_index, data.claims));
                    break;
                }
                Err(err) => trace!(key_index, error = %err, "key did not verify token"),
            }
        }
        let (key_index, repr) = verified.ok_or(AuthError::InvalidToken)?;
        let claims = Claims::try_from(repr)?;

        let leeway = self.config.leeway();
        // An overflowing bound lies past every representable instant.
        if let Some(not_before) = claims.not_before {
            let latest_now = now.checked_add_signed(leeway);
            if latest_now.is_some_and(|latest| latest < not_before) {
                return Err(AuthError::InvalidToken);
            }
        }
        if let Some(expires_at) = claims.expires_at {
            let deadline = expires_at.checked_add_signed(leeway);
            if deadline.is_some_and(|deadline| now > deadline) {
                return Err(AuthError::InvalidToken);
            }
        }

        if !self.config.issuer.is_empty()
            && claims.issuer.as_deref() != Some(self.config.issuer.as_str())
        {
            return Err(AuthError::InvalidIssuer);
        }
        if !self.config.audience.is_empty() && !claims.has_audience(&self.config.audience) {
            return Err(AuthError::InvalidAudience);
        }

        debug!(key_index, "verified JWT successfully");
        Ok(claims)
    }
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("config", &self.config)
            .field("ring", &self.ring)
            .finish()
    }
}

pub struct JwtVerifierBuilder {
    config: JwtConfig,
    secrets: Vec<Vec<u8>>,
}

impl JwtVerifierBuilder {
    fn new(config: JwtConfig) -> Self {
        Self {
            config,
            secrets: Vec::new(),
        }
    }

    pub fn with_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.secrets.push(secret.as_ref().to_vec());
        self
    }

    pub fn with_secrets_csv(mut self, value: &str) -> Self {
        self.secrets.extend(
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| item.as_bytes().to_vec()),
        );
        self
    }

    pub fn build(self) -> AuthResult<JwtVerifier> {
        let ring = KeyRing::new(self.secrets)?;
        Ok(JwtVerifier::new(self.config, ring))
    }
}
