use std::path::PathBuf;

use anyhow::{Context, bail};
use pinwall_db::DEFAULT_FALLBACK_OWNER_ID;

/// Admin keys copied from sample env files. Refused at startup.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me", "change-me-to-a-random-string", "dev-admin-key"];

/// Origins every deployment accepts, before `PINWALL_ALLOWED_ORIGINS` is merged in.
const DEFAULT_ORIGINS: &[&str] = &["http://localhost:8080", "http://localhost:3000"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub admin_api_key: String,
    pub allowed_origins: Vec<String>,
    pub owner_fallback_id: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let admin_api_key = lookup("PINWALL_ADMIN_API_KEY").unwrap_or_default();
        if admin_api_key.is_empty() || PLACEHOLDER_SECRETS.contains(&admin_api_key.as_str()) {
            bail!("PINWALL_ADMIN_API_KEY is unset or still a placeholder");
        }

        let host = lookup("PINWALL_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("PINWALL_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PINWALL_PORT must be a port number")?;
        let db_path: PathBuf = lookup("PINWALL_DB_PATH")
            .unwrap_or_else(|| "pinwall.db".into())
            .into();
        let owner_fallback_id = match lookup("PINWALL_OWNER_FALLBACK_ID") {
            Some(v) => v
                .trim()
                .parse()
                .context("PINWALL_OWNER_FALLBACK_ID must be an integer")?,
            None => DEFAULT_FALLBACK_OWNER_ID,
        };
        let allowed_origins = merge_origins(lookup("PINWALL_ALLOWED_ORIGINS").as_deref());

        Ok(Self {
            host,
            port,
            db_path,
            admin_api_key,
            allowed_origins,
            owner_fallback_id,
        })
    }
}

/// Defaults first, then the configured list. Blank entries and trailing
/// slashes are dropped; duplicates keep their first position.
fn merge_origins(configured: Option<&str>) -> Vec<String> {
    let extra = configured.unwrap_or_default().split(',');
    let mut origins: Vec<String> = Vec::new();
    for origin in DEFAULT_ORIGINS.iter().copied().chain(extra) {
        let origin = origin.trim().trim_end_matches('/');
        if !origin.is_empty() && !origins.iter().any(|o| o == origin) {
            origins.push(origin.to_string());
        }
    }
    origins
}
