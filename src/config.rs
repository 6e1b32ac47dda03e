// Configuration module for metagrep
// Reads from environment variables with sensible defaults

use std::env;
use std::sync::OnceLock;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Search timeout in seconds (METAGREP_SEARCH_TIMEOUT_SECS)
    pub search_timeout_secs: u32,

    /// Database connection pool size (METAGREP_POOL_SIZE)
    pub pool_size: u32,

    /// Database connection pool minimum idle connections (METAGREP_POOL_MIN_IDLE)
    pub pool_min_idle: u32,

    /// Maximum rendered length for metadata values in tree output (METAGREP_VALUE_MAX_LEN)
    pub value_max_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_timeout_secs: 30,
            pool_size: 10,
            pool_min_idle: 2,
            value_max_len: 80,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(val) = env::var("METAGREP_SEARCH_TIMEOUT_SECS") {
            if let Ok(parsed) = val.parse() {
                config.search_timeout_secs = parsed;
            } else {
                eprintln!(
                    "metagrep: Warning: Invalid METAGREP_SEARCH_TIMEOUT_SECS value: {}, using default: {}",
                    val, config.search_timeout_secs
                );
            }
        }

        if let Ok(val) = env::var("METAGREP_POOL_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.pool_size = parsed;
            } else {
                eprintln!(
                    "metagrep: Warning: Invalid METAGREP_POOL_SIZE value: {}, using default: {}",
                    val, config.pool_size
                );
            }
        }

        if let Ok(val) = env::var("METAGREP_POOL_MIN_IDLE") {
            if let Ok(parsed) = val.parse() {
                config.pool_min_idle = parsed;
            } else {
                eprintln!(
                    "metagrep: Warning: Invalid METAGREP_POOL_MIN_IDLE value: {}, using default: {}",
                    val, config.pool_min_idle
                );
            }
        }

        if let Ok(val) = env::var("METAGREP_VALUE_MAX_LEN") {
            if let Ok(parsed) = val.parse() {
                config.value_max_len = parsed;
            } else {
                eprintln!(
                    "metagrep: Warning: Invalid METAGREP_VALUE_MAX_LEN value: {}, using default: {}",
                    val, config.value_max_len
                );
            }
        }

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}
