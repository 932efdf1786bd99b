//! Server configuration
//!
//! Values come from built-in defaults overridden by `AGENCY_*` environment
//! variables (`AGENCY_BIND_ADDRESS`, `AGENCY_STORAGE`, ...).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const INSECURE_JWT_SECRET: &str = "change-me-in-production";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Embedded SQLite file
    Sqlite { database_path: String },
    /// Hosted Postgres reached through its REST gateway
    Supabase { url: String, service_key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub storage: StorageBackend,
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub dedup_ttl: Duration,
    /// Empty means any origin
    pub cors_allowed_origins: Vec<String>,
    pub log_format: LogFormat,
}

/// Flat shape read from the environment
#[derive(Debug, Deserialize)]
struct RawConfig {
    bind_address: String,
    storage: String,
    database_path: String,
    supabase_url: Option<String>,
    supabase_service_key: Option<String>,
    jwt_secret: String,
    jwt_audience: String,
    dedup_ttl_secs: u64,
    cors_allowed_origins: String,
    log_format: LogFormat,
}

impl Config {
    /// True while the built-in development secret is in use
    pub fn uses_default_jwt_secret(&self) -> bool {
        self.jwt_secret == INSECURE_JWT_SECRET
    }

    /// Load from `AGENCY_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("AGENCY"))
    }

    pub fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let raw: RawConfig = config::Config::builder()
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("storage", "sqlite")?
            .set_default("database_path", "./data/agency.db")?
            .set_default("jwt_secret", INSECURE_JWT_SECRET)?
            .set_default("jwt_audience", "authenticated")?
            .set_default("dedup_ttl_secs", 30)?
            .set_default("cors_allowed_origins", "*")?
            .set_default("log_format", "text")?
            .add_source(source)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let storage = match raw.storage.to_lowercase().as_str() {
            "sqlite" => StorageBackend::Sqlite {
                database_path: raw.database_path,
            },
            "supabase" => {
                let url = raw
                    .supabase_url
                    .filter(|u| !u.is_empty())
                    .context("AGENCY_SUPABASE_URL is required when storage=supabase")?;
                let service_key = raw
                    .supabase_service_key
                    .filter(|k| !k.is_empty())
                    .context("AGENCY_SUPABASE_SERVICE_KEY is required when storage=supabase")?;
                StorageBackend::Supabase {
                    url: url.trim_end_matches('/').to_string(),
                    service_key,
                }
            }
            other => anyhow::bail!("Unknown storage backend '{}'", other),
        };

        let cors_allowed_origins = if raw.cors_allowed_origins.trim() == "*" {
            Vec::new()
        } else {
            raw.cors_allowed_origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect()
        };

        Ok(Self {
            bind_address: raw.bind_address,
            storage,
            jwt_secret: raw.jwt_secret,
            jwt_audience: raw.jwt_audience,
            dedup_ttl: Duration::from_secs(raw.dedup_ttl_secs),
            cors_allowed_origins,
            log_format: raw.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("AGENCY").source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_source(env(&[])).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(
            config.storage,
            StorageBackend::Sqlite {
                database_path: "./data/agency.db".to_string()
            }
        );
        assert_eq!(config.dedup_ttl, Duration::from_secs(30));
        assert!(config.cors_allowed_origins.is_empty());
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.uses_default_jwt_secret());

        let config = Config::from_source(env(&[("AGENCY_JWT_SECRET", "s3cret")])).unwrap();
        assert!(!config.uses_default_jwt_secret());
    }

    #[test]
    fn test_supabase_backend_from_env() {
        let config = Config::from_source(env(&[
            ("AGENCY_STORAGE", "supabase"),
            ("AGENCY_SUPABASE_URL", "https://proj.supabase.co/"),
            ("AGENCY_SUPABASE_SERVICE_KEY", "service"),
            ("AGENCY_CORS_ALLOWED_ORIGINS", "https://app.example.com, http://localhost:5173"),
            ("AGENCY_LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(
            config.storage,
            StorageBackend::Supabase {
                url: "https://proj.supabase.co".to_string(),
                service_key: "service".to_string()
            }
        );
        assert_eq!(config.cors_allowed_origins.len(), 2);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_supabase_requires_credentials() {
        let result = Config::from_source(env(&[("AGENCY_STORAGE", "supabase")]));
        assert!(result.is_err());
        let result = Config::from_source(env(&[("AGENCY_STORAGE", "mongo")]));
        assert!(result.is_err());
    }
}
