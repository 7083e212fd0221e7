use std::env;
use std::time::Duration;

use thiserror::Error;

const DEV_JWT_SECRET: &str = "dev_secret_change_in_production";
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters in production")]
    WeakJwtSecret,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub is_dev: bool,
    pub crawler: CrawlerConfig,
}

/// Settings for the background crawl workers.
#[derive(Clone, Debug)]
pub struct CrawlerConfig {
    pub enabled: bool,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub max_attempts: i32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            enabled: true,
            concurrency: 2,
            poll_interval: Duration::from_millis(2_000),
            max_attempts: crate::queue::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let is_dev = env::var("APP_ENV").as_deref() != Ok("production");

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if secret.len() >= MIN_JWT_SECRET_LEN || is_dev => secret,
            Ok(_) => return Err(ConfigError::WeakJwtSecret),
            Err(_) if is_dev => DEV_JWT_SECRET.to_string(),
            Err(_) => return Err(ConfigError::Missing("JWT_SECRET")),
        };

        let defaults = CrawlerConfig::default();
        let crawler = CrawlerConfig {
            enabled: parse_var("CRAWLER_ENABLED", defaults.enabled)?,
            concurrency: parse_var("CRAWLER_CONCURRENCY", defaults.concurrency)?,
            poll_interval: Duration::from_millis(parse_var(
                "CRAWLER_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            max_attempts: parse_var("CRAWLER_MAX_ATTEMPTS", defaults.max_attempts)?,
        };

        if crawler.concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "CRAWLER_CONCURRENCY",
                value: "0".into(),
            });
        }
        if crawler.max_attempts < 1 {
            return Err(ConfigError::Invalid {
                name: "CRAWLER_MAX_ATTEMPTS",
                value: crawler.max_attempts.to_string(),
            });
        }

        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            jwt_secret,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: parse_var("SERVER_PORT", 8080)?,
            is_dev,
            crawler,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}
