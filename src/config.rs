//! Service configuration.
//!
//! Configuration is assembled from defaults, builder methods, and `REVIEWD_*`
//! environment variables. The CLI layers its own flags on top of `from_env`.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// A configuration value is invalid.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Top-level configuration for the review service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis connection URL.
    pub redis_url: String,
    /// Queue key prefix in Redis.
    pub queue_name: String,
    /// Bind address for the webhook server.
    pub bind_addr: String,
    /// Number of review workers to spawn.
    pub num_workers: usize,
    /// How long a worker blocks waiting for a job before re-checking shutdown.
    pub poll_interval: Duration,
    /// Maximum wall-clock time for a single review job.
    pub job_timeout: Duration,
    /// Timeout for graceful worker shutdown.
    pub shutdown_timeout: Duration,
    /// Retry budget for review jobs.
    pub max_attempts: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/reviewd".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            queue_name: "reviews".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from `REVIEWD_*` environment variables.
    ///
    /// `REVIEWD_DATABASE_URL` and `REVIEWD_REDIS_URL` are required; all other
    /// variables fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if a required variable is absent,
    /// or `ConfigError::InvalidValue` if a numeric variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.database_url = std::env::var("REVIEWD_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("REVIEWD_DATABASE_URL".to_string()))?;
        config.redis_url = std::env::var("REVIEWD_REDIS_URL")
            .map_err(|_| ConfigError::MissingEnvVar("REVIEWD_REDIS_URL".to_string()))?;

        if let Ok(addr) = std::env::var("REVIEWD_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(name) = std::env::var("REVIEWD_QUEUE_NAME") {
            config.queue_name = name;
        }
        if let Ok(workers) = std::env::var("REVIEWD_WORKERS") {
            config.num_workers = parse_env("REVIEWD_WORKERS", &workers)?;
        }
        if let Ok(secs) = std::env::var("REVIEWD_JOB_TIMEOUT_SECS") {
            config.job_timeout = Duration::from_secs(parse_env("REVIEWD_JOB_TIMEOUT_SECS", &secs)?);
        }
        if let Ok(attempts) = std::env::var("REVIEWD_MAX_ATTEMPTS") {
            config.max_attempts = parse_env("REVIEWD_MAX_ATTEMPTS", &attempts)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Sets the bind address for the webhook server.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Sets the number of workers.
    pub fn with_num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    /// Sets the per-job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for out-of-range settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "num_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.queue_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "queue_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("cannot parse '{}'", value),
    })
}
