//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string
//!
//! ## Optional
//! - `STREETLINE_RETRY_MAX_ATTEMPTS` - Bounded retry attempts for transient
//!   store failures (default: 3)
//! - `STREETLINE_RETRY_BASE_DELAY_MS` - Base backoff delay in milliseconds
//!   (default: 50)

use std::env;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::retry::RetryPolicy;

const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Commerce engine configuration.
#[derive(Debug, Clone)]
pub struct CommerceConfig {
    /// `PostgreSQL` database connection URL (contains password).
    pub database_url: SecretString,
    /// Bounded retry attempts for transient store failures.
    pub retry_max_attempts: u32,
    /// Base backoff delay between retry attempts.
    pub retry_base_delay: Duration,
}

impl CommerceConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `DATABASE_URL` is missing or an optional
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let retry_max_attempts =
            parse_optional("STREETLINE_RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS)?;
        if retry_max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "STREETLINE_RETRY_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let base_delay_ms =
            parse_optional("STREETLINE_RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS)?;

        Ok(Self {
            database_url: SecretString::from(database_url),
            retry_max_attempts,
            retry_base_delay: Duration::from_millis(base_delay_ms),
        })
    }

    /// Retry policy derived from the configured tunables.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: Duration::from_secs(1),
        }
    }
}

fn parse_optional<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar(name.to_string(), format!("got `{raw}`"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_from_config() {
        let config = CommerceConfig {
            database_url: SecretString::from("postgres://localhost/streetline".to_string()),
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(10),
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
    }
}
