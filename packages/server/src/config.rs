use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use trellis::{DEFAULT_STATE_TTL, DEFAULT_WORKERS};

/// Default mount point of the action endpoint.
pub const DEFAULT_ACTION_PREFIX: &str = "/internal/actions";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Concurrent jobs per page render or action
    pub workers: usize,
    /// Directory for server-side component state
    pub state_dir: PathBuf,
    pub state_ttl: Duration,
    /// Path prefix of `POST <prefix>/<Component>/<Action>`
    pub action_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            workers: DEFAULT_WORKERS,
            state_dir: env::temp_dir().join("trellis"),
            state_ttl: DEFAULT_STATE_TTL,
            action_prefix: DEFAULT_ACTION_PREFIX.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        let defaults = Self::default();

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .context("PORT must be a valid number")?,
            workers: env::var("TRELLIS_WORKERS")
                .unwrap_or_else(|_| defaults.workers.to_string())
                .parse()
                .context("TRELLIS_WORKERS must be a positive number")?,
            state_dir: env::var("TRELLIS_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            state_ttl: env::var("TRELLIS_STATE_TTL_SECS")
                .ok()
                .map(|secs| secs.parse().map(Duration::from_secs))
                .transpose()
                .context("TRELLIS_STATE_TTL_SECS must be a number of seconds")?
                .unwrap_or(defaults.state_ttl),
            action_prefix: normalize_prefix(
                &env::var("TRELLIS_ACTION_PREFIX").unwrap_or(defaults.action_prefix),
            ),
        })
    }
}

/// `"internal/actions/"` becomes `"/internal/actions"`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    format!("/{}", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("internal/actions/"), "/internal/actions");
        assert_eq!(normalize_prefix("/a"), "/a");
        assert_eq!(normalize_prefix("/"), "/");
    }
}
