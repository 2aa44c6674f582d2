//! Process configuration: flags with environment fallbacks.

use anyhow::{Result, bail};
use clap::Parser;

const DEFAULT_TOKEN_SECRET: &str = "bonusgate-dev-secret";

#[derive(Debug, Clone, Parser)]
#[command(name = "bonusgate", version, about = "Loyalty bonus accrual gateway")]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(short = 'a', long, env = "RUN_ADDRESS", default_value = "0.0.0.0:8080")]
    pub run_address: String,

    /// PostgreSQL connection DSN
    #[arg(short = 'd', long, env = "DATABASE_URI")]
    pub database_uri: String,

    /// Base URL of the external scoring service
    #[arg(short = 'r', long, env = "ACCRUAL_SYSTEM_ADDRESS")]
    pub accrual_address: String,

    /// Seconds between poll attempts per worker
    #[arg(short = 'p', long, env = "ACCRUAL_POLL_INTERVAL", default_value_t = 2)]
    pub poll_interval: u64,

    /// Number of accrual workers
    #[arg(short = 'w', long, env = "ACCRUAL_WORKERS", default_value_t = 3)]
    pub workers: usize,

    /// Secret used to sign auth tokens
    #[arg(
        long,
        env = "TOKEN_SECRET",
        default_value = DEFAULT_TOKEN_SECRET,
        hide_env_values = true
    )]
    pub token_secret: String,

    /// Argon2 time cost for password hashing
    #[arg(long, env = "HASH_TIME_COST", default_value_t = 2)]
    pub hash_time_cost: u32,

    /// Log level (trace/debug/info/warn/error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Directory for the rolling log file
    #[arg(long, env = "LOG_DIR", default_value = "./logs")]
    pub log_dir: String,

    /// Rolling log file name
    #[arg(long, env = "LOG_FILE", default_value = "bonusgate.log")]
    pub log_file: String,
}

impl Config {
    /// Validates the configuration at startup; any failure is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.run_address.trim().is_empty() {
            bail!("run address must not be empty");
        }
        if self.database_uri.trim().is_empty() {
            bail!("database DSN must not be empty");
        }
        if self.accrual_address.trim().is_empty() {
            bail!("accrual system address must not be empty");
        }
        if self.poll_interval == 0 {
            bail!("poll interval must be > 0");
        }
        if self.workers == 0 {
            bail!("worker count must be >= 1");
        }
        if self.hash_time_cost == 0 {
            bail!("hash time cost must be >= 1");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            bail!(
                "invalid log level '{}': must be one of {:?}",
                self.log_level,
                valid_levels
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            run_address: "0.0.0.0:8080".to_string(),
            database_uri: "postgres://localhost/bonusgate".to_string(),
            accrual_address: "http://localhost:8081".to_string(),
            poll_interval: 2,
            workers: 3,
            token_secret: DEFAULT_TOKEN_SECRET.to_string(),
            hash_time_cost: 2,
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "bonusgate.log".to_string(),
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = sample();
        config.poll_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = sample();
        config.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_log_level() {
        let mut config = sample();
        config.log_level = "shout".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn flags_parse_with_short_names() {
        let config = Config::try_parse_from([
            "bonusgate",
            "-a",
            "127.0.0.1:9090",
            "-d",
            "postgres://localhost/bonusgate",
            "-r",
            "http://localhost:8081",
            "-p",
            "5",
            "-w",
            "8",
        ])
        .unwrap();

        assert_eq!(config.run_address, "127.0.0.1:9090");
        assert_eq!(config.poll_interval, 5);
        assert_eq!(config.workers, 8);
        assert_eq!(config.log_level, "info");
    }
}
