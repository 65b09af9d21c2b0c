use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Limits and retry policy for timeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Entries kept after the merged timeline is sorted
    pub max_entries: usize,
    /// Posts fetched per author chunk
    pub chunk_limit: u32,
    /// Posts fetched for a single profile's activity views
    pub profile_activity_limit: u32,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            chunk_limit: 100,
            profile_activity_limit: 100,
            retry_attempts: 2,
            retry_backoff_ms: 25,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let feed_defaults = FeedConfig::default();
        let config = Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("SERVER_PORT", 3000),
            },
            feed: FeedConfig {
                max_entries: env_or("FEED_MAX_ENTRIES", feed_defaults.max_entries),
                chunk_limit: env_or("FEED_CHUNK_LIMIT", feed_defaults.chunk_limit),
                profile_activity_limit: env_or(
                    "PROFILE_ACTIVITY_LIMIT",
                    feed_defaults.profile_activity_limit,
                ),
                retry_attempts: env_or("STORE_RETRY_ATTEMPTS", feed_defaults.retry_attempts),
                retry_backoff_ms: env_or("STORE_RETRY_BACKOFF_MS", feed_defaults.retry_backoff_ms),
            },
        };

        if config.feed.max_entries == 0 || config.feed.chunk_limit == 0 {
            anyhow::bail!("FEED_MAX_ENTRIES and FEED_CHUNK_LIMIT must be positive");
        }

        Ok(config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_defaults() {
        let feed = FeedConfig::default();
        assert_eq!(feed.max_entries, 200);
        assert_eq!(feed.chunk_limit, 100);
        assert_eq!(feed.profile_activity_limit, 100);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("FEED_ENGINE_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("FEED_ENGINE_TEST_GARBAGE", 42u32), 42);
        env::set_var("FEED_ENGINE_TEST_NUMBER", "7");
        assert_eq!(env_or("FEED_ENGINE_TEST_NUMBER", 42u32), 7);
    }
}
