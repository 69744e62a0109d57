use anyhow::{Context, Result};
use std::{env, path::PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub jwt: JwtConfig,
    pub answer_service_url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiry_seconds: i64,
}

impl Config {
    /// Build the configuration from the process environment.
    /// `.env` is expected to have been loaded already.
    pub fn from_env() -> Result<Self> {
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".into());
        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home_dir).join(".parley").join("parley.db"));

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("Failed to parse PORT")?,
            database_path,
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
                expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                    .unwrap_or_else(|_| "18000".to_string())
                    .parse()
                    .context("Failed to parse JWT_EXPIRY_SECONDS")?,
            },
            answer_service_url: env::var("ANSWER_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:5001/ask".to_string()),
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
