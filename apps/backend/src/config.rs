use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_PORT_FILE: &str = "backend_port.txt";
pub const DEFAULT_MODEL_NAME: &str = "en_core_web_sm";
const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// Application configuration loaded from environment variables.
/// Every field has a default so the frontend can launch the backend bare.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    /// Discovery file the frontend polls for the bound port.
    pub port_file: PathBuf,
    pub model_name: String,
    pub model_dir: PathBuf,
    pub allowed_origins: Vec<String>,
    pub shutdown_grace: Duration,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let host = parse_host(&env_or("BACKEND_HOST", "127.0.0.1"))?;

        let grace_secs = env_or("SHUTDOWN_GRACE_SECS", "10")
            .parse::<u64>()
            .context("SHUTDOWN_GRACE_SECS must be a whole number of seconds")?;

        Ok(Config {
            host,
            port_file: PathBuf::from(env_or("BACKEND_PORT_FILE", DEFAULT_PORT_FILE)),
            model_name: env_or("MODEL_NAME", DEFAULT_MODEL_NAME),
            model_dir: PathBuf::from(env_or("MODEL_DIR", "models")),
            allowed_origins: parse_origins(&env_or("ALLOWED_ORIGINS", DEFAULT_ORIGINS))?,
            shutdown_grace: Duration::from_secs(grace_secs),
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// The service is reachable from this machine only.
pub fn parse_host(raw: &str) -> Result<IpAddr> {
    let host = raw
        .trim()
        .parse::<IpAddr>()
        .context("BACKEND_HOST must be a valid IP address")?;
    if !host.is_loopback() {
        bail!("BACKEND_HOST must be a loopback address, got {host}");
    }
    Ok(host)
}

/// Splits a comma-separated origin list. The wildcard is rejected because the
/// service allows credentials, and browsers refuse `*` with credentials.
pub fn parse_origins(raw: &str) -> Result<Vec<String>> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();

    if origins.is_empty() {
        bail!("ALLOWED_ORIGINS must list at least one origin");
    }
    if let Some(bad) = origins.iter().find(|o| o.as_str() == "*") {
        bail!("ALLOWED_ORIGINS may not contain '{bad}' when credentials are allowed");
    }
    if let Some(bad) = origins
        .iter()
        .find(|o| !(o.starts_with("http://") || o.starts_with("https://")))
    {
        bail!("ALLOWED_ORIGINS entry '{bad}' must start with http:// or https://");
    }

    Ok(origins)
}
