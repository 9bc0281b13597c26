use std::env;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;

use crate::service::mailer::SENDGRID_URL;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub server_addr: String,

    // Template encryption
    pub secret_key: String,
    pub encryption_key_id: String,
    /// Decrypt-only `(key_id, secret)` pairs kept after a rotation.
    pub retired_keys: Vec<(String, String)>,

    // Mail
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_url: String,
    pub mail_from: String,

    pub log_level: String,
    pub log_dir: String,
    pub export_tick_secs: u64,

    // Device provisioning
    pub provisioning_token: Option<String>,
    pub default_timezone: String,
    pub credential_cache_ttl_secs: u64,

    // Rate limiting
    pub rate_register_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{} must be set", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} has an invalid value {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

/// `v1:secret1,v0:secret0`
fn parse_retired_keys(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once(':')
                .filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
                .map(|(id, secret)| (id.to_string(), secret.to_string()))
                .ok_or_else(|| anyhow!("RETIRED_KEYS entry must look like id:secret"))
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            secret_key: required("SECRET_KEY")?,
            encryption_key_id: optional("ENCRYPTION_KEY_ID").unwrap_or_else(|| "v1".to_string()),
            retired_keys: optional("RETIRED_KEYS")
                .map(|raw| parse_retired_keys(&raw))
                .transpose()?
                .unwrap_or_default(),

            sendgrid_api_key: optional("SENDGRID_API_KEY"),
            sendgrid_url: optional("SENDGRID_URL").unwrap_or_else(|| SENDGRID_URL.to_string()),
            mail_from: optional("MAIL_FROM").unwrap_or_else(|| "noreply@kioskapp.com".to_string()),

            log_level: optional("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_dir: optional("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            export_tick_secs: parsed("EXPORT_TICK_SECS", 60)?,

            provisioning_token: optional("PROVISIONING_TOKEN"),
            default_timezone: optional("DEFAULT_TIMEZONE")
                .unwrap_or_else(|| "America/Toronto".to_string()),
            credential_cache_ttl_secs: parsed("CREDENTIAL_CACHE_TTL_SECS", 600)?,

            rate_register_per_min: parsed("RATE_REGISTER_PER_MIN", 30)?,
            rate_protected_per_min: parsed("RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: optional("API_PREFIX").unwrap_or_else(|| "/api".to_string()),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "memory://".into(),
            server_addr: "127.0.0.1:0".into(),
            secret_key: "test master secret".into(),
            encryption_key_id: "v1".into(),
            retired_keys: vec![],
            sendgrid_api_key: None,
            sendgrid_url: SENDGRID_URL.into(),
            mail_from: "noreply@kioskapp.com".into(),
            log_level: "debug".into(),
            log_dir: "logs".into(),
            export_tick_secs: 60,
            provisioning_token: None,
            default_timezone: "America/Toronto".into(),
            credential_cache_ttl_secs: 600,
            rate_register_per_min: 1000,
            rate_protected_per_min: 1000,
            api_prefix: "/api".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retired_keys_parse() {
        let keys = parse_retired_keys("v1:old-secret, v0:older").unwrap();
        assert_eq!(
            keys,
            vec![
                ("v1".to_string(), "old-secret".to_string()),
                ("v0".to_string(), "older".to_string())
            ]
        );
        assert!(parse_retired_keys("v1").is_err());
        assert!(parse_retired_keys("v1:").is_err());
        assert!(parse_retired_keys("").unwrap().is_empty());
    }
}
