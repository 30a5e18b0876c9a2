use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::RetryConfig;

// ============================================================================
// Configuration - Loaded from environment variables
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: String,
    pub database: DatabaseConfig,
    pub redpanda: RedpandaConfig,
    pub metrics: MetricsConfig,
    pub compensation: CompensationConfig,
}

/// Unset `url` selects the in-memory stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

/// Unset `brokers` selects the in-memory event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    pub brokers: Option<String>,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl CompensationConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            ..RetryConfig::default()
        }
    }
}

impl Config {
    /// Load configuration from the process environment. A `.env` file in the
    /// working directory is read first if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup. Unparseable values fall back
    /// to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            environment: non_empty("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            database: DatabaseConfig {
                url: non_empty("DATABASE_URL"),
                max_connections: parsed(&non_empty, "DATABASE_MAX_CONNECTIONS").unwrap_or(5),
            },
            redpanda: RedpandaConfig {
                brokers: non_empty("REDPANDA_BROKERS"),
                topic: non_empty("ORDER_EVENTS_TOPIC").unwrap_or_else(|| "order-events".to_string()),
            },
            metrics: MetricsConfig {
                enabled: non_empty("METRICS_ENABLED")
                    .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                    .unwrap_or(false),
                port: parsed(&non_empty, "METRICS_PORT").unwrap_or(9090),
            },
            compensation: CompensationConfig {
                max_attempts: parsed(&non_empty, "COMPENSATION_MAX_ATTEMPTS").unwrap_or(3),
                initial_delay_ms: parsed(&non_empty, "COMPENSATION_INITIAL_DELAY_MS").unwrap_or(50),
            },
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn parsed<T, F>(non_empty: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    non_empty(key).and_then(|v| v.trim().parse().ok())
}
