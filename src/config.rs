use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_PERPLEXITY_API_URL: &str = "https://api.perplexity.ai/chat/completions";
pub const DEFAULT_PERPLEXITY_MODEL: &str = "sonar-deep-research";
pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Deployment environment: `development`, `test` or `production`
    pub environment: String,
    pub cors_allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[derive(Clone, Deserialize)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Budget for the whole call, all retries included
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub max_domain_filters: usize,
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }
}

// Keeps the API key out of startup logs
impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_base_ms", &self.retry_backoff_base_ms)
            .field("max_domain_filters", &self.max_domain_filters)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackend {
    /// Per-client timestamp log, exact sliding window
    SlidingWindow,
    /// GCRA via the governor crate
    Governor,
}

impl FromStr for RateLimitBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sliding_window" | "sliding-window" | "memory" => Ok(Self::SlidingWindow),
            "governor" => Ok(Self::Governor),
            other => bail!("Unknown rate limit backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
    pub backend: RateLimitBackend,
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared key expected in `X-API-Key`; `None` disables the check
    pub api_key: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .finish()
    }
}

/// Show the first and last three characters of a secret
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 6 {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 6), tail)
    } else {
        "***".to_string()
    }
}

/// Resolves secrets from mounted files in production and from the
/// environment everywhere.
#[derive(Debug, Clone)]
pub struct SecretLoader {
    production: bool,
    secrets_dir: PathBuf,
}

impl SecretLoader {
    pub fn new(production: bool, secrets_dir: impl Into<PathBuf>) -> Self {
        Self {
            production,
            secrets_dir: secrets_dir.into(),
        }
    }

    /// Look up `name`: in production `<dir>/<name>` then `<dir>/<name>.json`
    /// (`{"value": ...}`), then the environment lookup.
    pub fn get<F>(&self, name: &str, lookup: &F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.production {
            if let Some(value) = read_secret_file(&self.secrets_dir, name) {
                debug!(secret = name, "Loaded secret from mounted file");
                return Some(value);
            }
            warn!(
                secret = name,
                dir = %self.secrets_dir.display(),
                "Secret not found in secrets directory, falling back to environment"
            );
        }
        lookup(name).filter(|v| !v.is_empty())
    }
}

fn read_secret_file(dir: &Path, name: &str) -> Option<String> {
    let plain = dir.join(name);
    if let Ok(contents) = std::fs::read_to_string(&plain) {
        let value = contents.trim().to_string();
        if !value.is_empty() {
            return Some(value);
        }
    }

    let json_path = dir.join(format!("{}.json", name));
    let contents = std::fs::read_to_string(&json_path).ok()?;
    match serde_json::from_str::<serde_json::Value>(&contents) {
        Ok(json) => json
            .get("value")
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        Err(e) => {
            warn!(secret = name, "Secret JSON file is malformed: {}", e);
            None
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        if environment != "production" {
            dotenvy::dotenv().ok();
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());
        let production = environment == "production";
        let secrets = SecretLoader::new(
            production,
            lookup("SECRETS_DIR").unwrap_or_else(|| DEFAULT_SECRETS_DIR.to_string()),
        );

        let api_key = secrets.get("PERPLEXITY_API_KEY", &lookup).unwrap_or_default();
        if api_key.is_empty() && environment != "test" {
            bail!("PERPLEXITY_API_KEY must be set");
        }

        let rate_limit = RateLimitConfig {
            requests: parse_or(&lookup, "RATE_LIMIT_REQUESTS", 20)?,
            window_secs: parse_or(&lookup, "RATE_LIMIT_WINDOW_SECONDS", 60)?,
            sweep_interval_secs: parse_or(&lookup, "RATE_LIMIT_SWEEP_SECONDS", 60)?,
            backend: parse_or(&lookup, "RATE_LIMIT_BACKEND", RateLimitBackend::SlidingWindow)?,
        };
        if rate_limit.requests == 0 || rate_limit.window_secs == 0 {
            bail!("RATE_LIMIT_REQUESTS and RATE_LIMIT_WINDOW_SECONDS must be positive");
        }

        let upstream = UpstreamConfig {
            api_key,
            api_url: lookup("PERPLEXITY_API_URL")
                .unwrap_or_else(|| DEFAULT_PERPLEXITY_API_URL.to_string()),
            model: lookup("PERPLEXITY_MODEL")
                .unwrap_or_else(|| DEFAULT_PERPLEXITY_MODEL.to_string()),
            max_tokens: parse_or(&lookup, "MAX_TOKEN_LIMIT", 8000)?,
            request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECONDS", 120)?,
            max_retries: parse_or(&lookup, "MAX_RETRIES", 3)?,
            retry_backoff_base_ms: parse_or(&lookup, "RETRY_BACKOFF_BASE_MS", 2000)?,
            max_domain_filters: parse_or(&lookup, "MAX_DOMAIN_FILTERS", 10)?,
        };
        if upstream.max_retries == 0 {
            bail!("MAX_RETRIES must be at least 1");
        }

        Ok(Self {
            server: ServerConfig {
                port: parse_or(&lookup, "PORT", 8080)?,
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                environment,
                cors_allowed_origins: lookup("ALLOWED_ORIGINS")
                    .unwrap_or_else(|| "https://sciflow.example.com".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            upstream,
            rate_limit,
            auth: AuthConfig {
                api_key: secrets.get("SCIFLOW_API_KEY", &lookup),
            },
        })
    }
}

impl Default for Config {
    /// Test-environment defaults: no provider key, auth disabled
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8080,
                host: "127.0.0.1".to_string(),
                environment: "test".to_string(),
                cors_allowed_origins: Vec::new(),
            },
            upstream: UpstreamConfig {
                api_key: String::new(),
                api_url: DEFAULT_PERPLEXITY_API_URL.to_string(),
                model: DEFAULT_PERPLEXITY_MODEL.to_string(),
                max_tokens: 8000,
                request_timeout_secs: 120,
                max_retries: 3,
                retry_backoff_base_ms: 2000,
                max_domain_filters: 10,
            },
            rate_limit: RateLimitConfig {
                requests: 20,
                window_secs: 60,
                sweep_interval_secs: 60,
                backend: RateLimitBackend::SlidingWindow,
            },
            auth: AuthConfig { api_key: None },
        }
    }
}
