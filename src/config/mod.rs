use serde::Deserialize;
use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub port: u16,
    pub database_url: String,
    pub allowed_origins: Vec<String>,
    /// Hex-encoded 32-byte AES key; absent means the codec runs in
    /// pass-through mode (refused in production).
    pub token_encryption_key: Option<String>,
    pub oauth: Option<OAuthProviderConfig>,
    pub smtp: SmtpConfig,
    pub reset: ResetConfig,
    pub rate_limit: RateLimitConfig,
    pub lockout: LockoutConfig,
    pub session: SessionConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// Single configured authorization-code-grant provider.
#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub scopes: String,
    pub success_redirect: String,
    pub failure_redirect: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct ResetConfig {
    /// Base for the link embedded in the reset email.
    pub base_url: String,
    pub token_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub reset_attempts: u32,
    pub reset_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub threshold: i32,
    pub lock_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval_seconds: u64,
    pub attempt_retention_days: i64,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("curio-auth"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            port: get_env("PORT", Some("8080"), is_prod)?
                .parse()
                .map_err(|e: std::num::ParseIntError| {
                    AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                })?,
            database_url: get_env("DATABASE_URL", None, is_prod)?,
            allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            token_encryption_key: env::var("TOKEN_ENCRYPTION_KEY").ok(),
            oauth: load_oauth_config(is_prod)?,
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: get_env("SMTP_PORT", Some("587"), is_prod)?
                    .parse()
                    .unwrap_or(587),
                user: get_env("SMTP_USER", None, is_prod)?,
                password: get_env("SMTP_PASSWORD", None, is_prod)?,
                from: get_env("SMTP_FROM", None, is_prod)?,
            },
            reset: ResetConfig {
                base_url: get_env("RESET_BASE_URL", Some("http://localhost:8080"), is_prod)?,
                token_ttl_seconds: get_env("RESET_TOKEN_TTL_SECONDS", Some("3600"), is_prod)?
                    .parse()
                    .unwrap_or(3600),
            },
            rate_limit: RateLimitConfig {
                login_attempts: get_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(5),
                login_window_seconds: get_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("900"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(900),
                reset_attempts: get_env("RATE_LIMIT_RESET_ATTEMPTS", Some("3"), is_prod)?
                    .parse()
                    .unwrap_or(3),
                reset_window_seconds: get_env(
                    "RATE_LIMIT_RESET_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(3600),
            },
            lockout: LockoutConfig {
                threshold: get_env("LOCKOUT_THRESHOLD", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(5),
                lock_seconds: get_env("LOCKOUT_DURATION_SECONDS", Some("1800"), is_prod)?
                    .parse()
                    .unwrap_or(1800),
            },
            session: SessionConfig {
                ttl_seconds: get_env("SESSION_TTL_SECONDS", Some("604800"), is_prod)?
                    .parse()
                    .unwrap_or(604_800),
            },
            sweep: SweepConfig {
                interval_seconds: get_env("SWEEP_INTERVAL_SECONDS", Some("3600"), is_prod)?
                    .parse()
                    .unwrap_or(3600),
                attempt_retention_days: get_env("ATTEMPT_RETENTION_DAYS", Some("7"), is_prod)?
                    .parse()
                    .unwrap_or(7),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if let Some(key) = &self.token_encryption_key {
            if key.len() != 64 || hex::decode(key).is_err() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "TOKEN_ENCRYPTION_KEY must be 64 hex characters (32 bytes)"
                )));
            }
        }

        if self.environment == Environment::Prod {
            // Plaintext token storage is a migration aid, not a production mode.
            if self.token_encryption_key.is_none() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "TOKEN_ENCRYPTION_KEY is required in production; refusing to store provider tokens in clear text"
                )));
            }

            if self.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }
        }

        Ok(())
    }
}

/// All-or-nothing provider configuration: the OAuth flow stays disabled
/// until client id, client secret, and callback URL are all present.
fn load_oauth_config(is_prod: bool) -> Result<Option<OAuthProviderConfig>, AppError> {
    let client_id = env::var("OAUTH_CLIENT_ID").ok();
    let client_secret = env::var("OAUTH_CLIENT_SECRET").ok();
    let redirect_uri = env::var("OAUTH_REDIRECT_URI").ok();

    let (Some(client_id), Some(client_secret), Some(redirect_uri)) =
        (client_id, client_secret, redirect_uri)
    else {
        tracing::info!("OAuth provider not configured; federated sign-in disabled");
        return Ok(None);
    };

    Ok(Some(OAuthProviderConfig {
        provider: get_env("OAUTH_PROVIDER", Some("google"), is_prod)?,
        client_id,
        client_secret,
        redirect_uri,
        auth_url: get_env(
            "OAUTH_AUTH_URL",
            Some("https://accounts.google.com/o/oauth2/v2/auth"),
            is_prod,
        )?,
        token_url: get_env(
            "OAUTH_TOKEN_URL",
            Some("https://oauth2.googleapis.com/token"),
            is_prod,
        )?,
        userinfo_url: get_env(
            "OAUTH_USERINFO_URL",
            Some("https://www.googleapis.com/oauth2/v2/userinfo"),
            is_prod,
        )?,
        scopes: get_env("OAUTH_SCOPES", Some("openid email profile"), is_prod)?,
        success_redirect: get_env("OAUTH_SUCCESS_REDIRECT", Some("/"), is_prod)?,
        failure_redirect: get_env(
            "OAUTH_FAILURE_REDIRECT",
            Some("/login?error=signin_failed"),
            is_prod,
        )?,
    }))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
