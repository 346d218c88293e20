use std::env;
use std::time::Duration;

use crate::constants::{
    DEFAULT_DISCORD_API_BASE, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_PLATFORM_NAME,
    DEFAULT_STORAGE_TIMEOUT_SECS,
};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub db_auto_create: bool,
    pub db_max_connections: u32,
    pub storage_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub discord_api_base: String,
    pub discord_client_id: String,
    pub discord_client_secret: String,
    pub discord_redirect_uri: String,
    pub platform_name: String,
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| "Invalid SERVER_PORT")?;

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/rolelink.db".to_string());

        let db_auto_create = parse_bool(
            &env::var("DB_AUTO_CREATE").unwrap_or_else(|_| "true".to_string()),
        )
        .ok_or("Invalid DB_AUTO_CREATE")?;

        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| "Invalid DB_MAX_CONNECTIONS")?;

        let storage_timeout_secs = env::var("STORAGE_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_STORAGE_TIMEOUT_SECS.to_string())
            .parse()
            .map_err(|_| "Invalid STORAGE_TIMEOUT_SECS")?;

        let http_timeout_secs = env::var("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_HTTP_TIMEOUT_SECS.to_string())
            .parse()
            .map_err(|_| "Invalid HTTP_TIMEOUT_SECS")?;

        let discord_api_base = env::var("DISCORD_API_BASE")
            .unwrap_or_else(|_| DEFAULT_DISCORD_API_BASE.to_string());

        let discord_client_id =
            env::var("DISCORD_CLIENT_ID").map_err(|_| "DISCORD_CLIENT_ID must be set")?;
        let discord_client_secret = env::var("DISCORD_CLIENT_SECRET")
            .map_err(|_| "DISCORD_CLIENT_SECRET must be set")?;
        let discord_redirect_uri =
            env::var("DISCORD_REDIRECT_URI").map_err(|_| "DISCORD_REDIRECT_URI must be set")?;

        let platform_name =
            env::var("PLATFORM_NAME").unwrap_or_else(|_| DEFAULT_PLATFORM_NAME.to_string());

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Ok(Config {
            server_host,
            server_port,
            database_url,
            db_auto_create,
            db_max_connections,
            storage_timeout_secs,
            http_timeout_secs,
            discord_api_base,
            discord_client_id,
            discord_client_secret,
            discord_redirect_uri,
            platform_name,
            environment,
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
