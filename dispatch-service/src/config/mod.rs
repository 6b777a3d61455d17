//! Configuration module for dispatch-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub completion: CompletionConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// How long after first completion a technician may still amend.
    pub amend_window_minutes: i64,
}

impl CompletionConfig {
    pub fn amend_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.amend_window_minutes.max(0))
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            amend_window_minutes: 24 * 60,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "dispatch-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            completion: CompletionConfig {
                amend_window_minutes: env::var("AMEND_WINDOW_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(CompletionConfig::default().amend_window_minutes),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_amend_window_is_one_day() {
        assert_eq!(
            CompletionConfig::default().amend_window(),
            chrono::Duration::hours(24)
        );
    }

    #[test]
    fn negative_window_is_clamped() {
        let config = CompletionConfig {
            amend_window_minutes: -5,
        };
        assert_eq!(config.amend_window(), chrono::Duration::zero());
    }
}
