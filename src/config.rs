//! Process configuration, loaded once at startup from the environment the
//! same way the teacher's `main.rs` reads `SERVER_URL`/`DATABASE_URL`.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Default `min_interval` for a Job Status Subscription when a client
    /// doesn't request one explicitly.
    pub job_status_min_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL is not set in .env file");
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let job_status_min_interval = env::var("JOB_STATUS_MIN_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(1));

        Self {
            database_url,
            bind_addr,
            job_status_min_interval,
        }
    }
}
