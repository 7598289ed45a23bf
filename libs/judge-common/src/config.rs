// Redis connection settings shared by the worker and the CLI

use crate::redis::DEFAULT_QUEUE;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    pub queue: String,
}

impl RedisConfig {
    /// Read `REDIS_URL` and `QUEUE_NAME`, falling back to local defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            queue: lookup("QUEUE_NAME").unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
