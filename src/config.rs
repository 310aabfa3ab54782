//! Configuration loading and validation.
//!
//! Loads `config.toml` from `--config`, `$LEADGATE_CONFIG`, or
//! `~/.leadgate/config.toml`. Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::ExecutionMode;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "LEADGATE_CONFIG";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution token lifetimes and sweeping.
    pub tokens: TokensConfig,
    /// Dedupe window.
    pub idempotency: IdempotencyConfig,
    /// Rehearsal/live controls.
    pub safety: SafetyConfig,
    /// Database location.
    pub storage: StorageConfig,
    /// Audit event sink.
    pub audit: AuditConfig,
    /// Outbound providers keyed by name (`sms`, `email`, `voice`, `calendar`, `crm`).
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// An explicitly named file must exist; the default location may be
    /// absent, in which case defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// merged configuration is invalid.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// [`Config::load`] with a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => match env(CONFIG_PATH_ENV) {
                Some(p) => (PathBuf::from(p), true),
                None => (config_dir()?.join("config.toml"), false),
            },
        };

        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::info!("no config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to read config at {}: {e}",
                    path.display()
                ))
            }
        };

        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrong types.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("LEADGATE_KILL_SWITCH") {
            match parse_flag(&v) {
                Some(flag) => self.safety.kill_switch = flag,
                None => tracing::warn!(
                    var = "LEADGATE_KILL_SWITCH",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("LEADGATE_DEFAULT_MODE") {
            match v.parse::<ExecutionMode>() {
                Ok(mode) => self.safety.default_mode = mode,
                Err(_) => tracing::warn!(
                    var = "LEADGATE_DEFAULT_MODE",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("LEADGATE_DATABASE") {
            self.storage.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("LEADGATE_TOKEN_TTL_MINUTES") {
            match v.parse() {
                Ok(n) => self.tokens.default_ttl_minutes = n,
                Err(_) => tracing::warn!(
                    var = "LEADGATE_TOKEN_TTL_MINUTES",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Check values that deserialize fine but cannot work.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.tokens.default_ttl_minutes == 0 {
            anyhow::bail!("tokens.default_ttl_minutes must be greater than zero");
        }
        if self.tokens.sweep_interval_secs == 0 {
            anyhow::bail!("tokens.sweep_interval_secs must be greater than zero");
        }
        if self.idempotency.ttl_hours == 0 {
            anyhow::bail!("idempotency.ttl_hours must be greater than zero");
        }
        for (name, provider) in &self.providers {
            let url = url::Url::parse(&provider.base_url)
                .with_context(|| format!("providers.{name}.base_url is not a valid URL"))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("providers.{name}.base_url must use http or https");
            }
            if provider.timeout_secs == 0 {
                anyhow::bail!("providers.{name}.timeout_secs must be greater than zero");
            }
        }
        Ok(())
    }

    /// Database file, defaulting to `~/.leadgate/leadgate.db`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("leadgate.db")),
        }
    }

    /// Log directory for the long-running sweeper, defaulting to `~/.leadgate/logs`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn logs_dir(&self) -> Result<PathBuf> {
        match &self.storage.logs_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("logs")),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Tokens ──────────────────────────────────────────────────────

/// Execution token settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    /// Lifetime of a token when the plan does not override it.
    pub default_ttl_minutes: u64,
    /// How often the sweeper removes expired tokens.
    pub sweep_interval_secs: u64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            default_ttl_minutes: 10,
            sweep_interval_secs: 300,
        }
    }
}

impl TokensConfig {
    /// Default token lifetime.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_minutes.saturating_mul(60))
    }

    /// Sweeper period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ── Idempotency ─────────────────────────────────────────────────

/// Dedupe settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// How long a successful result stays replayable.
    pub ttl_hours: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

impl IdempotencyConfig {
    /// Replay window.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }
}

// ── Safety ──────────────────────────────────────────────────────

/// Rehearsal/live controls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Mode used when a caller does not request one (`REHEARSAL` or `LIVE`).
    pub default_mode: ExecutionMode,
    /// Start with the kill switch engaged.
    pub kill_switch: bool,
    /// Tenants allowed to run live; `"*"` admits all.
    pub live_tenants: Vec<String>,
    /// Targets live execution may touch.
    pub allowlist: AllowlistConfig,
}

/// Per-type live target allowlist.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AllowlistConfig {
    /// E.164 numbers for SMS and voice.
    pub phone_numbers: Vec<String>,
    /// Email addresses.
    pub emails: Vec<String>,
    /// Calendar ids.
    pub calendar_ids: Vec<String>,
    /// CRM location ids.
    pub crm_location_ids: Vec<String>,
}

// ── Storage / audit ─────────────────────────────────────────────

/// Filesystem locations for persistent state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub database_path: Option<PathBuf>,
    /// Directory for rotated JSON logs.
    pub logs_dir: Option<PathBuf>,
}

/// Audit event sink.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Append execution events as JSON lines to this file. Events go to
    /// `tracing` only when unset.
    pub events_path: Option<PathBuf>,
}

// ── Providers ───────────────────────────────────────────────────

/// One outbound provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// API root; operations are resolved relative to it.
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Request timeout.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    30
}

/// Resolve the default config directory (`~/.leadgate/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".leadgate"))
}
