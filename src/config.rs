/// Configuration management for the CarePath server
use crate::error::{PortalError, PortalResult};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub scheduling: SchedulingConfig,
    pub bootstrap: Option<BootstrapAdminConfig>,
    pub email: Option<EmailConfig>,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub public_url: String,
    pub version: String,
    /// Development mode exposes internal error details to clients
    pub development: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
    pub max_connections: u32,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Lifetime of an issued access token, in minutes
    pub access_token_ttl_minutes: i64,
    /// Failed logins allowed before the account is locked
    pub max_failed_logins: i64,
    pub lockout_minutes: i64,
    /// Placeholder credential assigned to enrolled accounts
    pub default_enrollment_password: String,
}

/// Scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Institution offset from UTC, in minutes; all calendar dates are taken in this zone
    pub utc_offset_minutes: i32,
    pub default_session_minutes: u32,
}

/// Initial administrator created on first start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapAdminConfig {
    pub email: String,
    pub password: String,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl SchedulingConfig {
    /// Institution time zone as a fixed offset
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            default_session_minutes: 60,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> PortalResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("CAREPATH_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("CAREPATH_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| PortalError::Validation("Invalid port number".to_string()))?;
        let public_url = env::var("CAREPATH_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", hostname, port));
        let version = env::var("CAREPATH_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());
        let development = env_parse("CAREPATH_DEVELOPMENT", false);

        let data_directory: PathBuf = env::var("CAREPATH_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("CAREPATH_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("carepath.sqlite"));
        let max_connections = env_parse("CAREPATH_DATABASE_MAX_CONNECTIONS", 10);

        let jwt_secret = env::var("CAREPATH_JWT_SECRET")
            .map_err(|_| PortalError::Validation("JWT secret required".to_string()))?;
        let access_token_ttl_minutes = env_parse("CAREPATH_ACCESS_TOKEN_TTL_MINUTES", 12 * 60);
        let max_failed_logins = env_parse("CAREPATH_MAX_FAILED_LOGINS", 5);
        let lockout_minutes = env_parse("CAREPATH_LOCKOUT_MINUTES", 15);
        let default_enrollment_password = env::var("CAREPATH_DEFAULT_ENROLLMENT_PASSWORD")
            .unwrap_or_else(|_| "ChangeMe123!".to_string());

        let utc_offset_minutes = env_parse("CAREPATH_UTC_OFFSET_MINUTES", 0);
        let default_session_minutes = env_parse("CAREPATH_DEFAULT_SESSION_MINUTES", 60);

        let bootstrap = match (
            env::var("CAREPATH_BOOTSTRAP_ADMIN_EMAIL"),
            env::var("CAREPATH_BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) => Some(BootstrapAdminConfig { email, password }),
            _ => None,
        };

        let email = if let Ok(smtp_url) = env::var("CAREPATH_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("CAREPATH_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let rate_limit = RateLimitConfig {
            enabled: env_parse("CAREPATH_RATE_LIMITS_ENABLED", true),
            authenticated_rps: env_parse("CAREPATH_RATE_LIMIT_AUTHENTICATED_RPS", 100),
            unauthenticated_rps: env_parse("CAREPATH_RATE_LIMIT_UNAUTHENTICATED_RPS", 10),
            burst_size: env_parse("CAREPATH_RATE_LIMIT_BURST", 50),
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("CAREPATH_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                public_url,
                version,
                development,
            },
            storage: StorageConfig {
                data_directory,
                database,
                max_connections,
            },
            authentication: AuthConfig {
                jwt_secret,
                access_token_ttl_minutes,
                max_failed_logins,
                lockout_minutes,
                default_enrollment_password,
            },
            scheduling: SchedulingConfig {
                utc_offset_minutes,
                default_session_minutes,
            },
            bootstrap,
            email,
            rate_limit,
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> PortalResult<()> {
        if self.service.hostname.is_empty() {
            return Err(PortalError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(PortalError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.max_failed_logins <= 0 {
            return Err(PortalError::Validation(
                "Failed login threshold must be positive".to_string(),
            ));
        }

        if self.authentication.access_token_ttl_minutes <= 0 {
            return Err(PortalError::Validation(
                "Access token lifetime must be positive".to_string(),
            ));
        }

        if self.scheduling.utc_offset_minutes.abs() > 14 * 60 {
            return Err(PortalError::Validation(
                "UTC offset must be within +/-14 hours".to_string(),
            ));
        }

        if self.scheduling.default_session_minutes == 0 {
            return Err(PortalError::Validation(
                "Default session length must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration suitable for tests and local tooling
    pub fn for_testing(data_directory: PathBuf) -> Self {
        Self {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 0,
                public_url: "http://localhost".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                development: true,
            },
            storage: StorageConfig {
                database: data_directory.join("carepath.sqlite"),
                data_directory,
                max_connections: 1,
            },
            authentication: AuthConfig {
                jwt_secret: "test-secret-that-is-at-least-32-characters".to_string(),
                access_token_ttl_minutes: 60,
                max_failed_logins: 3,
                lockout_minutes: 15,
                default_enrollment_password: "ChangeMe123!".to_string(),
            },
            scheduling: SchedulingConfig::default(),
            bootstrap: None,
            email: None,
            rate_limit: RateLimitConfig {
                enabled: false,
                authenticated_rps: 1000,
                unauthenticated_rps: 1000,
                burst_size: 1000,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}
