//! Service configuration read from the environment.

use std::path::PathBuf;

use anyhow::Context;

pub const DEFAULT_MODELS_DIR: &str = "models";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_IMPUTATION_POLICY: &str = "zero";
pub const DEFAULT_DECISION_THRESHOLD: f64 = 0.5;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Directory holding model checkpoints
    pub models_dir: PathBuf,

    /// Address the HTTP server listens on
    pub bind_address: String,

    pub database_max_connections: u32,

    /// Whether request profiles are written to `profiling_logs`
    pub profiling_enabled: bool,

    /// Numeric imputation policy name, `zero` or `median`
    pub imputation_policy: String,

    /// Default-class probability at or above which a row is non-solvable
    pub decision_threshold: f64,
}

impl Config {
    /// Loads configuration from environment variables, reading a `.env`
    /// file first if present.
    ///
    /// Required environment variables:
    /// - `DATABASE_URL`: `PostgreSQL` connection string
    ///
    /// Optional environment variables:
    /// - `MODELS_DIR` (default: `models`)
    /// - `BIND_ADDRESS` (default: `0.0.0.0:8000`)
    /// - `DATABASE_MAX_CONNECTIONS` (default: `10`)
    /// - `PROFILING_ENABLED` (default: `false`)
    /// - `IMPUTATION_POLICY` (default: `zero`)
    /// - `DECISION_THRESHOLD` (default: `0.5`)
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does
    /// not parse.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does
    /// not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url =
            lookup("DATABASE_URL").context("DATABASE_URL environment variable not set")?;

        let models_dir = lookup("MODELS_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR), PathBuf::from);

        let bind_address =
            lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_owned());

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        anyhow::ensure!(
            database_max_connections > 0,
            "DATABASE_MAX_CONNECTIONS must be a positive integer, got 0"
        );

        let profiling_enabled = lookup("PROFILING_ENABLED")
            .map(|v| parse_flag(&v))
            .transpose()?
            .unwrap_or(false);

        let imputation_policy = lookup("IMPUTATION_POLICY")
            .map_or_else(|| DEFAULT_IMPUTATION_POLICY.to_owned(), |v| v.to_lowercase());

        let decision_threshold = lookup("DECISION_THRESHOLD")
            .map(|v| v.parse::<f64>())
            .transpose()
            .context("DECISION_THRESHOLD must be a number")?
            .unwrap_or(DEFAULT_DECISION_THRESHOLD);
        anyhow::ensure!(
            (0.0..=1.0).contains(&decision_threshold),
            "DECISION_THRESHOLD must be between 0 and 1, got {decision_threshold}"
        );

        Ok(Self {
            database_url,
            models_dir,
            bind_address,
            database_max_connections,
            profiling_enabled,
            imputation_policy,
            decision_threshold,
        })
    }
}

fn parse_flag(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("invalid boolean value: {other}"),
    }
}
