/// Runtime configuration for JWT verification and issuance.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Expected issuer claim (iss). Empty disables the check.
    pub issuer: String,
    /// Expected audience claim (aud). Empty disables the check.
    pub audience: String,
    /// Allowable clock skew in seconds when validating exp/nbf.
    pub leeway_seconds: u32,
}

impl JwtConfig {
    /// Construct config with sensible defaults (30 second leeway).
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into().trim().to_string(),
            audience: audience.into().trim().to_string(),
            leeway_seconds: 30,
        }
    }

    /// Adjust the allowed leeway.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn leeway(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.leeway_seconds))
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}
