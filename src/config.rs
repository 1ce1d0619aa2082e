use anyhow::{Context, Result};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_ALLOWED_ORIGIN: &str =
    "https://frontend-gemini-extractor-3j33srzoo-anirutsolraks-projects.vercel.app/";
const DEFAULT_ALLOWED_SUFFIX: &str = "vercel.app";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub cors: CorsConfig,
    pub index_html: PathBuf,
}

/// Origins accepted by the CORS layer.
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    pub allowed_prefixes: Vec<String>,
    pub allowed_suffixes: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let list = |name: &str, default: &str| {
            split_list(&var(name).unwrap_or_else(|| default.to_string()))
        };

        Ok(Self {
            host: var("HOST")
                .unwrap_or_else(|| "0.0.0.0".to_string())
                .parse()
                .context("HOST must be a valid IP address")?,
            port: match var("PORT") {
                Some(port) => port.parse().context("PORT must be a valid number")?,
                None => DEFAULT_PORT,
            },
            gemini_api_key: var("GEMINI_API_KEY").filter(|key| !key.trim().is_empty()),
            gemini_model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_base_url: var("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            cors: CorsConfig {
                allowed_prefixes: list("CORS_ALLOWED_ORIGINS", DEFAULT_ALLOWED_ORIGIN),
                allowed_suffixes: list("CORS_ALLOWED_SUFFIXES", DEFAULT_ALLOWED_SUFFIX),
            },
            index_html: var("INDEX_HTML")
                .unwrap_or_else(|| "index.html".to_string())
                .into(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl CorsConfig {
    pub fn allows(&self, origin: &str) -> bool {
        self.allowed_prefixes.iter().any(|p| origin.starts_with(p.as_str()))
            || self.allowed_suffixes.iter().any(|s| origin.ends_with(s.as_str()))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
