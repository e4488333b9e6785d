use anyhow::{Result, anyhow};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub upstream: Upstream,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub challenge: Challenge,
    pub remember_me: RememberMe,
    #[serde(default)]
    pub users: Users,
    pub log: Log,
}

/// Configuration value that must not show up in logs.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

#[derive(Debug, Deserialize)]
pub struct Upstream {
    pub cluster_url: String,
    pub client_id: String,
    pub client_secret: Secret,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_challenge_key_set")]
    pub challenge_key_set: String,
    #[serde(default = "default_consent_key_set")]
    pub consent_key_set: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub key_expiration_secs: u64,
    pub client_expiration_secs: u64,
    pub client_negative_expiration_secs: u64,
    pub cleanup_interval_secs: u64,
    pub max_staleness_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Cache {
            key_expiration_secs: 3600,
            client_expiration_secs: 600,
            client_negative_expiration_secs: 60,
            cleanup_interval_secs: 30,
            max_staleness_secs: 600,
            fetch_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Challenge {
    pub backend: String, // "memory" or "redis"
    pub redis_url: Secret,
    pub key_prefix: String,
    pub max_ttl_secs: u64,
}

impl Default for Challenge {
    fn default() -> Self {
        Challenge {
            backend: "memory".to_string(),
            redis_url: Secret::default(),
            key_prefix: "idp:challenge".to_string(),
            max_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RememberMe {
    #[serde(default = "default_memory_backend")]
    pub backend: String, // "memory" or "mysql"
    #[serde(default)]
    pub mysql_url: Secret,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
    pub pepper: Secret,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

#[derive(Deserialize)]
pub struct UserEntry {
    pub user: String,
    pub password_hash: String,
}

impl fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserEntry")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Users {
    pub backend: String, // "memory"
    pub entries: Vec<UserEntry>,
}

impl Default for Users {
    fn default() -> Self {
        Users {
            backend: default_memory_backend(),
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_challenge_key_set() -> String {
    "consent.challenge".to_string()
}

fn default_consent_key_set() -> String {
    "consent.endpoint".to_string()
}

fn default_memory_backend() -> String {
    "memory".to_string()
}

fn default_ttl_days() -> i64 {
    30
}

fn default_cookie_name() -> String {
    "remember_me".to_string()
}

impl Upstream {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Cache {
    pub fn key_expiration(&self) -> Duration {
        Duration::from_secs(self.key_expiration_secs)
    }

    pub fn client_expiration(&self) -> Duration {
        Duration::from_secs(self.client_expiration_secs)
    }

    pub fn client_negative_expiration(&self) -> Duration {
        Duration::from_secs(self.client_negative_expiration_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::from_secs(self.max_staleness_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Challenge {
    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}

/// Same as [`parse_settings`] for TOML already in memory.
pub fn parse_settings_str(toml: &str) -> Result<Settings> {
    let settings: Settings = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
