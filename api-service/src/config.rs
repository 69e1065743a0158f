use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use common_auth::signer::DEFAULT_ACCESS_TTL_SECONDS;
use common_auth::JwtConfig;

const ENV_PREFIX: &str = "CFG_";

pub const DEFAULT_LOGIN_RPS: f64 = 5.0;
pub const DEFAULT_LOGIN_BURST: u32 = 10;
pub const DEFAULT_SKIP_SUFFIXES: &[&str] = &["/RegisterUser", "/LoginUser"];

const MIN_SWEEP_SECONDS: u64 = 10;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub environment: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_conns: u32,
    pub run_migrations: bool,
    pub cors_allowed_origins: Vec<String>,
    pub login_rps: f64,
    pub login_burst: u32,
    pub login_limiter_sweep: Duration,
    /// Signing secrets, most recent first.
    pub jwt_secrets: Vec<String>,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_leeway_seconds: u32,
    pub jwt_access_ttl_seconds: i64,
    pub auth_skip_suffixes: Vec<String>,
    pub auth_disabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            database_url: None,
            database_max_conns: 10,
            run_migrations: true,
            cors_allowed_origins: Vec::new(),
            login_rps: DEFAULT_LOGIN_RPS,
            login_burst: DEFAULT_LOGIN_BURST,
            login_limiter_sweep: Duration::from_secs(60),
            jwt_secrets: Vec::new(),
            jwt_issuer: String::new(),
            jwt_audience: String::new(),
            jwt_leeway_seconds: 30,
            jwt_access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            auth_skip_suffixes: DEFAULT_SKIP_SUFFIXES
                .iter()
                .map(|suffix| suffix.to_string())
                .collect(),
            auth_disabled: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. `CFG_<KEY>` wins over `<KEY>`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            lookup(&format!("{ENV_PREFIX}{key}"))
                .and_then(|value| normalize_optional(&value))
                .or_else(|| lookup(key).and_then(|value| normalize_optional(&value)))
        };

        let defaults = Self::default();

        let port = get("PORT")
            .map(|value| value.parse::<u16>())
            .transpose()
            .context("Failed to parse PORT")?
            .unwrap_or(defaults.port);

        let database_max_conns = get("DATABASE_MAX_CONNS")
            .map(|value| value.parse::<u32>())
            .transpose()
            .context("Failed to parse DATABASE_MAX_CONNS")?
            .filter(|conns| *conns > 0)
            .unwrap_or(defaults.database_max_conns);

        let login_rps = get("LOGIN_RPS")
            .map(|value| value.parse::<f64>())
            .transpose()
            .context("Failed to parse LOGIN_RPS")?
            .filter(|rps| rps.is_finite() && *rps > 0.0)
            .unwrap_or(defaults.login_rps);

        let login_burst = get("LOGIN_BURST")
            .map(|value| value.parse::<i64>())
            .transpose()
            .context("Failed to parse LOGIN_BURST")?
            .filter(|burst| *burst > 0)
            .map(|burst| u32::try_from(burst).unwrap_or(u32::MAX))
            .unwrap_or(defaults.login_burst);

        let sweep_seconds = get("LOGIN_LIMITER_SWEEP_SECONDS")
            .map(|value| value.parse::<u64>())
            .transpose()
            .context("Failed to parse LOGIN_LIMITER_SWEEP_SECONDS")?
            .unwrap_or(defaults.login_limiter_sweep.as_secs())
            .max(MIN_SWEEP_SECONDS);

        let mut jwt_secrets = get("JWT_SECRETS")
            .map(|value| parse_list(&value))
            .unwrap_or_default();
        if jwt_secrets.is_empty() {
            jwt_secrets.extend(get("JWT_SECRET"));
        }

        let jwt_leeway_seconds = get("JWT_LEEWAY_SECONDS")
            .map(|value| value.parse::<u32>())
            .transpose()
            .context("Failed to parse JWT_LEEWAY_SECONDS")?
            .unwrap_or(defaults.jwt_leeway_seconds);

        let jwt_access_ttl_seconds = get("JWT_ACCESS_TTL_SECONDS")
            .map(|value| value.parse::<i64>())
            .transpose()
            .context("Failed to parse JWT_ACCESS_TTL_SECONDS")?
            .filter(|ttl| *ttl > 0)
            .unwrap_or(defaults.jwt_access_ttl_seconds);

        let auth_skip_suffixes = get("AUTH_SKIP_SUFFIXES")
            .map(|value| parse_list(&value))
            .unwrap_or(defaults.auth_skip_suffixes);

        let run_migrations = get("RUN_MIGRATIONS")
            .map(|value| parse_bool(&value))
            .transpose()
            .context("Failed to parse RUN_MIGRATIONS")?
            .unwrap_or(defaults.run_migrations);

        let auth_disabled = get("AUTH_DISABLED")
            .map(|value| parse_bool(&value))
            .transpose()
            .context("Failed to parse AUTH_DISABLED")?
            .unwrap_or(false);

        Ok(Self {
            environment: get("ENVIRONMENT").unwrap_or(defaults.environment),
            host: get("HOST").unwrap_or(defaults.host),
            port,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            database_url: get("DATABASE_URL"),
            database_max_conns,
            run_migrations,
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS")
                .map(|value| parse_list(&value))
                .unwrap_or_default(),
            login_rps,
            login_burst,
            login_limiter_sweep: Duration::from_secs(sweep_seconds),
            jwt_secrets,
            jwt_issuer: get("JWT_ISSUER").unwrap_or_default(),
            jwt_audience: get("JWT_AUDIENCE").unwrap_or_default(),
            jwt_leeway_seconds,
            jwt_access_ttl_seconds,
            auth_skip_suffixes,
            auth_disabled,
        })
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.trim().to_ascii_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("PORT must be non-zero");
        }

        if self.is_production() {
            if self.database_url.is_none() {
                bail!("DATABASE_URL is required in production");
            }
            if self.auth_disabled {
                bail!("AUTH_DISABLED is not permitted in production");
            }
            if self.jwt_secrets.is_empty() {
                bail!("JWT_SECRETS or JWT_SECRET is required in production");
            }
            return Ok(());
        }

        if self.jwt_secrets.is_empty() && !self.auth_disabled {
            return Err(anyhow!(
                "JWT_SECRETS or JWT_SECRET must be set; set AUTH_DISABLED=true to run without authentication"
            ));
        }

        Ok(())
    }

    pub fn jwt_config(&self) -> JwtConfig {
        JwtConfig::new(self.jwt_issuer.clone(), self.jwt_audience.clone())
            .with_leeway(self.jwt_leeway_seconds)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_allowed_origins.iter().any(|origin| origin == "*")
            || (self.cors_allowed_origins.is_empty() && !self.is_production())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{other}'")),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(normalize_optional)
        .collect()
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
