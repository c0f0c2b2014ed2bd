use secrecy::SecretString;
use session_core::config::CommonConfig;
use session_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub common: CommonConfig,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub tokens: TokenConfig,
    pub retention: RetentionConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Token lifetimes and signing material.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub signing_secret: SecretString,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub rotation_grace_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention_days: i64,
    pub sweep_interval_seconds: u64,
}

/// Domain admission quotas plus the edge IP limit.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub issue_max: u32,
    pub issue_window_seconds: u64,
    pub rotate_max: u32,
    pub rotate_window_seconds: u64,
    pub failed_auth_max: u32,
    pub failed_auth_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = CommonConfig::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = ServiceConfig {
            common,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("embed-session-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: get_parsed("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            tokens: TokenConfig {
                signing_secret: SecretString::new(get_env(
                    "TOKEN_SIGNING_SECRET",
                    Some("dev-signing-secret-change-me-0123456789abcdef"),
                    is_prod,
                )?),
                access_ttl_minutes: get_parsed("ACCESS_TOKEN_TTL_MINUTES", Some("15"), is_prod)?,
                refresh_ttl_days: get_parsed("REFRESH_TOKEN_TTL_DAYS", Some("7"), is_prod)?,
                rotation_grace_seconds: get_parsed("ROTATION_GRACE_SECONDS", Some("30"), is_prod)?,
            },
            retention: RetentionConfig {
                retention_days: get_parsed("SESSION_RETENTION_DAYS", Some("30"), is_prod)?,
                sweep_interval_seconds: get_parsed(
                    "SWEEP_INTERVAL_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
            },
            rate_limit: RateLimitConfig {
                issue_max: get_parsed("RATE_LIMIT_ISSUE_MAX", Some("30"), is_prod)?,
                issue_window_seconds: get_parsed(
                    "RATE_LIMIT_ISSUE_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
                rotate_max: get_parsed("RATE_LIMIT_ROTATE_MAX", Some("120"), is_prod)?,
                rotate_window_seconds: get_parsed(
                    "RATE_LIMIT_ROTATE_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
                failed_auth_max: get_parsed("RATE_LIMIT_FAILED_AUTH_MAX", Some("10"), is_prod)?,
                failed_auth_window_seconds: get_parsed(
                    "RATE_LIMIT_FAILED_AUTH_WINDOW_SECONDS",
                    Some("300"),
                    is_prod,
                )?,
                global_ip_limit: get_parsed("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?,
                global_ip_window_seconds: get_parsed(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        use secrecy::ExposeSecret;

        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.tokens.access_ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_TOKEN_TTL_MINUTES must be positive"
            )));
        }

        if self.tokens.refresh_ttl_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFRESH_TOKEN_TTL_DAYS must be positive"
            )));
        }

        if self.tokens.rotation_grace_seconds < 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ROTATION_GRACE_SECONDS must not be negative"
            )));
        }

        // Grace is a retry window, not a second lifetime.
        if self.tokens.rotation_grace_seconds >= self.tokens.refresh_ttl_days * 86_400 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ROTATION_GRACE_SECONDS must be shorter than the refresh token lifetime"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.tokens.signing_secret.expose_secret().len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "TOKEN_SIGNING_SECRET must be at least 32 bytes in production"
                )));
            }
        }

        Ok(())
    }
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

fn get_parsed<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, default, is_prod)?;
    raw.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} is not a valid value: {}", key, e))
    })
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
