use clap::{Parser, ValueEnum};
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const BASE_URL_ENV: &str = "TINYLINK_BASE_URL";
pub const STORAGE_BACKEND_ENV: &str = "TINYLINK_STORAGE_BACKEND";
pub const MYSQL_DSN_ENV: &str = "TINYLINK_MYSQL_DSN";
pub const MYSQL_MAX_CONNECTIONS_ENV: &str = "TINYLINK_MYSQL_MAX_CONNECTIONS";
pub const CACHE_BACKEND_ENV: &str = "TINYLINK_CACHE_BACKEND";
pub const CACHE_CAPACITY_ENV: &str = "TINYLINK_CACHE_CAPACITY";
pub const REDIS_URL_ENV: &str = "TINYLINK_REDIS_URL";
pub const REDIS_KEY_PREFIX_ENV: &str = "TINYLINK_REDIS_KEY_PREFIX";
pub const DEFAULT_DURATION_HOURS_ENV: &str = "TINYLINK_DEFAULT_DURATION_HOURS";
pub const CODE_LENGTH_ENV: &str = "TINYLINK_CODE_LENGTH";
pub const FILTER_CAPACITY_ENV: &str = "TINYLINK_FILTER_CAPACITY";
pub const FILTER_ERROR_RATE_ENV: &str = "TINYLINK_FILTER_ERROR_RATE";
pub const CLEANUP_INTERVAL_ENV: &str = "TINYLINK_CLEANUP_INTERVAL_SECS";
pub const SYNC_VIEWS_INTERVAL_ENV: &str = "TINYLINK_SYNC_VIEWS_INTERVAL_SECS";
pub const FILTER_REBUILD_INTERVAL_ENV: &str = "TINYLINK_FILTER_REBUILD_INTERVAL_SECS";
pub const JOB_TIMEOUT_ENV: &str = "TINYLINK_JOB_TIMEOUT_SECS";
pub const LOG_FORMAT_ENV: &str = "TINYLINK_LOG_FORMAT";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "tl:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "mysql")]
    Mysql,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::Mysql => write!(f, "mysql"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "redis")]
    Redis,
}

impl Display for CacheBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBackendArg::InMemory => write!(f, "in-memory"),
            CacheBackendArg::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tinylink-server")]
pub struct CLI {
    /// Prefix of the short URLs handed out.
    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::InMemory
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = MYSQL_DSN_ENV, required_if_eq("storage", "mysql"))]
    pub mysql_dsn: Option<String>,

    #[arg(long, env = MYSQL_MAX_CONNECTIONS_ENV, default_value_t = 10)]
    pub mysql_max_connections: u32,

    #[arg(
        long,
        env = CACHE_BACKEND_ENV,
        value_enum,
        default_value_t = CacheBackendArg::InMemory
    )]
    pub cache: CacheBackendArg,

    /// Entries held by the in-memory cache.
    #[arg(long, env = CACHE_CAPACITY_ENV, default_value_t = 10_000)]
    pub cache_capacity: u64,

    #[arg(long, env = REDIS_URL_ENV, required_if_eq("cache", "redis"))]
    pub redis_url: Option<String>,

    #[arg(long, env = REDIS_KEY_PREFIX_ENV, default_value = DEFAULT_REDIS_KEY_PREFIX)]
    pub redis_key_prefix: String,

    /// Lifetime of links created without an explicit duration.
    #[arg(
        long,
        env = DEFAULT_DURATION_HOURS_ENV,
        default_value_t = 24 * 30,
        value_parser = clap::value_parser!(i64).range(1..=24 * 365 * 100)
    )]
    pub default_duration_hours: i64,

    #[arg(
        long,
        env = CODE_LENGTH_ENV,
        default_value_t = 6,
        value_parser = clap::value_parser!(u8).range(3..=32)
    )]
    pub code_length: u8,

    /// Expected number of codes, used to size the existence filter.
    #[arg(long, env = FILTER_CAPACITY_ENV, default_value_t = 1_000_000)]
    pub filter_capacity: usize,

    #[arg(long, env = FILTER_ERROR_RATE_ENV, default_value_t = 0.001)]
    pub filter_error_rate: f64,

    #[arg(long, env = CLEANUP_INTERVAL_ENV, default_value_t = 60 * 60)]
    pub cleanup_interval_secs: u64,

    #[arg(long, env = SYNC_VIEWS_INTERVAL_ENV, default_value_t = 60)]
    pub sync_views_interval_secs: u64,

    #[arg(long, env = FILTER_REBUILD_INTERVAL_ENV, default_value_t = 24 * 60 * 60)]
    pub filter_rebuild_interval_secs: u64,

    /// Upper bound on one job run; also the job lock TTL.
    #[arg(long, env = JOB_TIMEOUT_ENV, default_value_t = 5 * 60)]
    pub job_timeout_secs: u64,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

impl CLI {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn sync_views_interval(&self) -> Duration {
        Duration::from_secs(self.sync_views_interval_secs.max(1))
    }

    pub fn filter_rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.filter_rebuild_interval_secs.max(1))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cli = CLI::try_parse_from(["tinylink-server"]).unwrap();

        assert_eq!(cli.storage, StorageBackendArg::InMemory);
        assert_eq!(cli.cache, CacheBackendArg::InMemory);
        assert_eq!(cli.default_duration_hours, 720);
        assert_eq!(cli.code_length, 6);
        assert_eq!(cli.filter_capacity, 1_000_000);
        assert_eq!(cli.cleanup_interval(), Duration::from_secs(3600));
        assert_eq!(cli.sync_views_interval(), Duration::from_secs(60));
        assert_eq!(cli.filter_rebuild_interval(), Duration::from_secs(86_400));
        assert_eq!(cli.job_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn mysql_backend_requires_dsn() {
        let err = CLI::try_parse_from(["tinylink-server", "--storage", "mysql"]);
        assert!(err.is_err());

        let cli = CLI::try_parse_from([
            "tinylink-server",
            "--storage",
            "mysql",
            "--mysql-dsn",
            "mysql://u:p@localhost/tinylink",
        ])
        .unwrap();
        assert_eq!(cli.storage, StorageBackendArg::Mysql);
    }

    #[test]
    fn redis_backend_requires_url() {
        assert!(CLI::try_parse_from(["tinylink-server", "--cache", "redis"]).is_err());
    }

    #[test]
    fn code_length_outside_short_code_bounds_is_rejected() {
        assert!(CLI::try_parse_from(["tinylink-server", "--code-length", "2"]).is_err());
        assert!(CLI::try_parse_from(["tinylink-server", "--code-length", "33"]).is_err());
    }
}
