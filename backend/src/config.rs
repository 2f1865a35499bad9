use std::time::Duration;

use clap::Parser;

/// Sensor measurement ingest service.
///
/// Every option can also be set through its environment variable or a `.env` file.
#[derive(Parser, Debug, Clone)]
#[command(name = "backend", version, about, long_about = None)]
pub struct Config {
    /// SQLite database file
    #[arg(long, env = "DATABASE_URL", default_value = "data.db")]
    pub database_url: String,

    /// Address the HTTP server binds to
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1")]
    pub bind: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Maximum number of pooled database connections
    #[arg(
        long,
        env = "DB_POOL_SIZE",
        default_value_t = 4,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub pool_size: u32,

    /// Seconds to wait for a pooled connection or a locked database
    #[arg(long, env = "DB_TIMEOUT_SECS", default_value_t = 5)]
    pub db_timeout_secs: u64,

    /// HTTP worker threads (defaults to the number of CPUs)
    #[arg(long, env = "HTTP_WORKERS")]
    pub workers: Option<usize>,
}

impl Config {
    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_secs)
    }
}
