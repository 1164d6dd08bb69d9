//! Config - 設定の読み込み
//!
//! 優先順位（後勝ち）:
//! 1. 組み込みのデフォルト値
//! 2. TOML ファイル（`memoir.toml` など）
//! 3. `.env`（dotenvy）と `MEMOIR_*` 環境変数
//!
//! 読み込み後に `validate` で整合性を検査し、不正な設定では起動しません。

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::validate_recipient;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: `{value}`")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoirConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Absent means no real transport; only dry runs are possible.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    /// Send a short confirmation to the recipient when a capsule is created.
    #[serde(default)]
    pub send_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
}

fn default_interval_secs() -> u64 { 60 }
fn default_claim_ttl_secs() -> u64 { 300 }
fn default_send_timeout_secs() -> u64 { 30 }
fn default_max_concurrent_sends() -> usize { 4 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            claim_ttl_secs: default_claim_ttl_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            max_concurrent_sends: default_max_concurrent_sends(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.interval_secs must be > 0".into()));
        }
        if self.max_concurrent_sends == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent_sends must be > 0".into(),
            ));
        }
        if self.send_timeout_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.send_timeout_secs must be > 0".into()));
        }
        // 送信中に claim が失効すると別 worker が同じ capsule を送れてしまう
        if self.send_timeout_secs >= self.claim_ttl_secs {
            return Err(ConfigError::Invalid(format!(
                "scheduler.send_timeout_secs ({}) must be shorter than scheduler.claim_ttl_secs ({})",
                self.send_timeout_secs, self.claim_ttl_secs
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file path, or `:memory:` for a throwaway store.
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String { "memoir.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Sender address.
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// false: plain connection (local relays only).
    #[serde(default = "bool_true")]
    pub starttls: bool,
}

fn default_smtp_host() -> String { "localhost".into() }
fn default_smtp_port() -> u16 { 587 }
fn bool_true() -> bool { true }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            from: String::new(),
            display_name: None,
            starttls: true,
        }
    }
}

// password を出さない
impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("from", &self.from)
            .field("display_name", &self.display_name)
            .field("starttls", &self.starttls)
            .finish()
    }
}

impl SmtpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("smtp.host must not be empty".into()));
        }
        validate_recipient(&self.from)
            .map_err(|e| ConfigError::Invalid(format!("smtp.from: {e}")))?;
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::Invalid(
                "smtp.username and smtp.password must be set together".into(),
            ));
        }
        Ok(())
    }
}

impl MemoirConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read `path` (if given and present), then `.env`, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => Self::default(),
        };

        let _ = dotenvy::dotenv();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// TOML file only. A missing file yields the defaults.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `MEMOIR_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "MEMOIR_INTERVAL_SECS", &mut self.scheduler.interval_secs)?;
        override_parsed(&lookup, "MEMOIR_CLAIM_TTL_SECS", &mut self.scheduler.claim_ttl_secs)?;
        override_parsed(&lookup, "MEMOIR_SEND_TIMEOUT_SECS", &mut self.scheduler.send_timeout_secs)?;
        override_parsed(
            &lookup,
            "MEMOIR_MAX_CONCURRENT_SENDS",
            &mut self.scheduler.max_concurrent_sends,
        )?;
        override_parsed(&lookup, "MEMOIR_DB_PATH", &mut self.store.path)?;
        override_parsed(&lookup, "MEMOIR_SEND_CONFIRMATION", &mut self.send_confirmation)?;

        // SMTP_HOST があればセクションが無くても SMTP を有効にする
        if let Some(host) = lookup("MEMOIR_SMTP_HOST") {
            self.smtp.get_or_insert_with(SmtpConfig::default).host = host;
        }
        if let Some(smtp) = self.smtp.as_mut() {
            override_parsed(&lookup, "MEMOIR_SMTP_PORT", &mut smtp.port)?;
            override_parsed(&lookup, "MEMOIR_SMTP_FROM", &mut smtp.from)?;
            override_parsed(&lookup, "MEMOIR_SMTP_STARTTLS", &mut smtp.starttls)?;
            if let Some(username) = lookup("MEMOIR_SMTP_USERNAME") {
                smtp.username = Some(username);
            }
            if let Some(password) = lookup("MEMOIR_SMTP_PASSWORD") {
                smtp.password = Some(password);
            }
            if let Some(display_name) = lookup("MEMOIR_SMTP_DISPLAY_NAME") {
                smtp.display_name = Some(display_name);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        if self.store.path.trim().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".into()));
        }
        if let Some(smtp) = &self.smtp {
            smtp.validate()?;
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw })?;
    }
    Ok(())
}
