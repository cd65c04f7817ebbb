use std::path::PathBuf;
use std::time::Duration;

use crate::authz::AuthzMode;
use crate::errors::AppError;
use crate::jwt::JwtConfig;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// First administrator created on an empty database.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub jwt: JwtConfig,
    pub authz_mode: AuthzMode,
    pub permission_cache_ttl: Duration,
    pub permission_cache_capacity: u64,
    pub tls: Option<TlsConfig>,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl AppConfig {
    /// Defaults for everything except the signing secret.
    pub fn new(jwt: JwtConfig) -> Self {
        Self {
            port: DEFAULT_PORT,
            jwt,
            authz_mode: AuthzMode::Strict,
            permission_cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            permission_cache_capacity: DEFAULT_CACHE_CAPACITY,
            tls: None,
            bootstrap_admin: None,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::new(JwtConfig::from_env()?);

        config.port = parse_env("APP_PORT")?.unwrap_or(DEFAULT_PORT);
        config.permission_cache_ttl =
            Duration::from_secs(parse_env("PERMISSION_CACHE_TTL_SECS")?.unwrap_or(DEFAULT_CACHE_TTL_SECS));
        config.permission_cache_capacity = parse_env("PERMISSION_CACHE_CAPACITY")?.unwrap_or(DEFAULT_CACHE_CAPACITY);

        if let Ok(mode) = std::env::var("AUTHZ_MODE") {
            config.authz_mode = mode.parse().map_err(AppError::configuration)?;
        }

        config.tls = match (std::env::var("TLS_CERT_PATH"), std::env::var("TLS_KEY_PATH")) {
            (Ok(cert), Ok(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (Err(_), Err(_)) => None,
            _ => return Err(AppError::configuration("TLS_CERT_PATH and TLS_KEY_PATH must be set together")),
        };

        config.bootstrap_admin = match (
            std::env::var("BOOTSTRAP_ADMIN_LOGIN"),
            std::env::var("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Ok(login), Ok(password)) => Some(BootstrapAdmin { login, password }),
            _ => None,
        };

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::configuration(format!("{name} has an invalid value"))),
        Err(_) => Ok(None),
    }
}
