use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

const DEV_JWT_SECRET: &str = "nomad-trip-development-secret";

/// One year.
pub const MAX_ACCESS_TOKEN_MINUTES: u64 = 365 * 24 * 60;
/// One day.
pub const MAX_OTP_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub admin: Option<AdminSeed>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ if environment == AppEnvironment::Production => {
                return Err(ConfigError::MissingSecret("JWT_SECRET"))
            }
            _ => DEV_JWT_SECRET.to_string(),
        };
        let issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "nomad-trip".to_string());
        let access_token_minutes = parse_bounded(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            30,
            MAX_ACCESS_TOKEN_MINUTES,
        )?;
        let otp_ttl_seconds = parse_bounded("OTP_TTL", 300, MAX_OTP_TTL_SECONDS)?;

        let bucket = env::var("STORAGE_BUCKET").unwrap_or_else(|_| "nomad-trip".to_string());
        let storage_timeout_ms = parse_number("STORAGE_TIMEOUT_MS", 5_000)?;
        let max_upload_bytes = parse_number("MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?;

        let mail_from = env::var("SMTP_FROM").unwrap_or_else(|_| "no-reply@nomad-trip.local".to_string());
        let mail_timeout_ms = parse_number("MAIL_TIMEOUT_MS", 5_000)?;

        let admin = match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) if !email.trim().is_empty() && !password.is_empty() => {
                Some(AdminSeed { email, password })
            }
            _ => None,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            auth: AuthConfig {
                jwt_secret,
                issuer,
                access_token_minutes,
                otp_ttl_seconds,
            },
            storage: StorageConfig {
                bucket,
                timeout: Duration::from_millis(storage_timeout_ms),
                max_upload_bytes: max_upload_bytes as usize,
            },
            mail: MailConfig {
                from: mail_from,
                timeout: Duration::from_millis(mail_timeout_ms),
            },
            admin,
        })
    }
}

impl AppConfig {
    /// Development defaults without reading the environment. Used by the demo
    /// command and the service tests.
    pub fn local() -> Self {
        Self {
            environment: AppEnvironment::Development,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
            },
            auth: AuthConfig {
                jwt_secret: DEV_JWT_SECRET.to_string(),
                issuer: "nomad-trip".to_string(),
                access_token_minutes: 30,
                otp_ttl_seconds: 300,
            },
            storage: StorageConfig::default(),
            mail: MailConfig {
                from: "no-reply@nomad-trip.local".to_string(),
                timeout: Duration::from_secs(5),
            },
            admin: None,
        }
    }
}

fn parse_number(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber(key)),
        Err(_) => Ok(default),
    }
}

fn parse_bounded(key: &'static str, default: u64, max: u64) -> Result<u64, ConfigError> {
    let value = parse_number(key, default)?;
    if value == 0 || value > max {
        return Err(ConfigError::OutOfRange { key, max });
    }
    Ok(value)
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Token signing and one-time-password settings.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub access_token_minutes: u64,
    pub otp_ttl_seconds: u64,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_token_minutes", &self.access_token_minutes)
            .field("otp_ttl_seconds", &self.otp_ttl_seconds)
            .finish()
    }
}

/// Object storage bucket and the bounds applied to every call.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "nomad-trip".to_string(),
            timeout: Duration::from_secs(5),
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub from: String,
    pub timeout: Duration,
}

/// Credentials for the administrator account created at startup.
#[derive(Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber(&'static str),
    OutOfRange { key: &'static str, max: u64 },
    MissingSecret(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber(key) => write!(f, "{key} must be a non-negative integer"),
            ConfigError::OutOfRange { key, max } => write!(f, "{key} must be between 1 and {max}"),
            ConfigError::MissingSecret(key) => write!(f, "{key} must be set in production"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber(_)
            | ConfigError::OutOfRange { .. }
            | ConfigError::MissingSecret(_) => None,
        }
    }
}
