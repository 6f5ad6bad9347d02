use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing::info;

use chatai_llm::openrouter::DEFAULT_URL;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub openrouter_url: String,
    pub openrouter_api_key: String,
    pub token_ttl_days: i64,
    pub expose_otp: bool,
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let openrouter_api_key = lookup("OPENROUTER_API_KEY")
            .filter(|key| !key.is_empty())
            .context("OPENROUTER_API_KEY is not set")?;

        Ok(Self {
            host: lookup("CHATAI_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "CHATAI_PORT", 3000)?,
            db_path: lookup("CHATAI_DB_PATH").unwrap_or_else(|| "chatai.db".into()).into(),
            jwt_secret,
            openrouter_url: lookup("OPENROUTER_URL").unwrap_or_else(|| DEFAULT_URL.into()),
            openrouter_api_key,
            token_ttl_days: parse_or(&lookup, "CHATAI_TOKEN_TTL_DAYS", 30)?,
            expose_otp: parse_or(&lookup, "CHATAI_EXPOSE_OTP", true)?,
            static_dir: lookup("CHATAI_STATIC_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {} value '{}': {}", key, raw, e)),
        None => {
            info!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}
