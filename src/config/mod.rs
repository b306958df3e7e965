use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::str::FromStr;

pub const DEFAULT_VARIANT_WIDTHS: &str = "512,256,16";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_mode: String,
    pub database_url: String,
    pub run_migrations: bool,
    pub s3_endpoint: String,
    pub s3_public_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: String,
    pub queue_endpoint: String,
    pub queue_region: String,
    pub queue_name: String,
    pub dead_letter_queue_name: Option<String>,
    pub max_deliveries: u32,
    pub worker_lanes: usize,
    pub variant_widths: Vec<u32>,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub upload_max_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let app_mode = env_or("APP_MODE", "api");

        let s3_region = env_or("S3_REGION", "fr-par");
        let queue_region = std::env::var("QUEUE_REGION").unwrap_or_else(|_| s3_region.clone());

        let worker_lanes: usize = env_or_parse("WORKER_LANES", "2")?;
        if worker_lanes == 0 {
            return Err(anyhow!("invalid WORKER_LANES: must be at least 1"));
        }
        let max_deliveries: u32 = env_or_parse("MAX_DELIVERIES", "5")?;
        if max_deliveries == 0 {
            return Err(anyhow!("invalid MAX_DELIVERIES: must be at least 1"));
        }

        Ok(Self {
            http_addr,
            app_mode,
            database_url: env_or_err("DATABASE_URL")?,
            run_migrations: env_or_parse("RUN_MIGRATIONS", "true")?,
            s3_endpoint: env_or_err("S3_ENDPOINT")?,
            s3_public_endpoint: std::env::var("S3_PUBLIC_ENDPOINT").ok(),
            s3_region,
            s3_bucket: env_or_err("S3_BUCKET")?,
            queue_endpoint: env_or_err("QUEUE_ENDPOINT")?,
            queue_region,
            queue_name: env_or_err("QUEUE_NAME")?,
            dead_letter_queue_name: std::env::var("DEAD_LETTER_QUEUE_NAME")
                .ok()
                .filter(|name| !name.trim().is_empty()),
            max_deliveries,
            worker_lanes,
            variant_widths: parse_widths(&env_or("VARIANT_WIDTHS", DEFAULT_VARIANT_WIDTHS))
                .map_err(|err| anyhow!("invalid VARIANT_WIDTHS: {}", err))?,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            upload_max_bytes: env_or_parse("UPLOAD_MAX_BYTES", "10485760")?,
        })
    }

    /// Base URL that object URLs are rendered against.
    pub fn object_url_base(&self) -> &str {
        self.s3_public_endpoint
            .as_deref()
            .unwrap_or(&self.s3_endpoint)
    }
}

/// Parses a comma separated list of target widths, keeping the given order
/// and dropping repeats.
pub fn parse_widths(raw: &str) -> Result<Vec<u32>> {
    let mut widths = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let width: u32 = part
            .parse()
            .map_err(|err| anyhow!("{:?} is not a width: {}", part, err))?;
        if width == 0 {
            return Err(anyhow!("widths must be greater than 0"));
        }
        if !widths.contains(&width) {
            widths.push(width);
        }
    }
    if widths.is_empty() {
        return Err(anyhow!("at least one width is required"));
    }
    Ok(widths)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}
