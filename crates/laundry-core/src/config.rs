//! Bot configuration.
//!
//! Loaded from a YAML file (every section optional) and then overridden by
//! environment variables, which may come from a `.env` file. Secrets are
//! normally supplied through the environment only.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use laundry_proto::ChatTarget;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::registry::BankLayout;
use crate::telemetry::TopicScheme;

/// Largest bank the status image has room for.
pub const MAX_MACHINES: u32 = 50;

const MASK: &str = "********";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaundryConfig {
    pub machines: MachinesConfig,
    pub ticker: TickerConfig,
    pub telemetry: TelemetryConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachinesConfig {
    pub washers: u32,
    pub dryers: u32,
}

impl Default for MachinesConfig {
    fn default() -> Self {
        Self {
            washers: 10,
            dryers: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerConfig {
    pub interval_secs: u64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Topic prefix, possibly several levels deep.
    pub topic_prefix: String,
    /// Payloads meaning "cycle finished", matched case-insensitively.
    pub finished_markers: Vec<String>,
    /// MQTT broker. Without one the telemetry link is disabled.
    pub broker_host: Option<String>,
    pub broker_port: u16,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "laundry".to_string(),
            finished_markers: vec!["F".to_string(), "FINISHED".to_string()],
            broker_host: None,
            broker_port: 8883,
            tls: true,
            username: None,
            password: None,
            client_id: "laundry-bot".to_string(),
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    /// Chat that receives the tracked status message.
    pub chat_id: Option<i64>,
    /// Forum topic within `chat_id`.
    pub thread_id: Option<i32>,
    pub delivery_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            thread_id: Some(2),
            delivery_timeout_secs: 5,
        }
    }
}

impl LaundryConfig {
    /// Reads the file (a missing file yields defaults), applies the process
    /// environment and `.env`, then validates.
    pub fn load(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::from_file(path)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses the YAML file without environment overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Overrides file values with `BOT_TOKEN`, `MQTT_SERVER`, `MQTT_USER`,
    /// `MQTT_PASS` and `LAUNDRY_CHAT_ID`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(token) = get("BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(host) = get("MQTT_SERVER") {
            self.telemetry.broker_host = Some(host);
        }
        if let Some(user) = get("MQTT_USER") {
            self.telemetry.username = Some(user);
        }
        if let Some(pass) = get("MQTT_PASS") {
            self.telemetry.password = Some(pass);
        }
        if let Some(raw) = get("LAUNDRY_CHAT_ID") {
            let chat_id = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "LAUNDRY_CHAT_ID",
                value: raw.clone(),
            })?;
            self.telegram.chat_id = Some(chat_id);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, count) in [
            ("machines.washers", self.machines.washers),
            ("machines.dryers", self.machines.dryers),
        ] {
            if !(1..=MAX_MACHINES).contains(&count) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 1 and {MAX_MACHINES}, got {count}"
                )));
            }
        }
        if self.ticker.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "ticker.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.telegram.delivery_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "telegram.delivery_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.telemetry.topic_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid(
                "telemetry.topic_prefix must not be empty".to_string(),
            ));
        }
        if self
            .telemetry
            .finished_markers
            .iter()
            .all(|m| m.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "telemetry.finished_markers must name at least one marker".to_string(),
            ));
        }
        Ok(())
    }

    pub fn layout(&self) -> BankLayout {
        BankLayout::new(self.machines.washers, self.machines.dryers)
    }

    pub fn topic_scheme(&self) -> TopicScheme {
        let markers = self
            .telemetry
            .finished_markers
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        TopicScheme::new(self.telemetry.topic_prefix.clone(), markers)
    }

    /// Where the first status message goes, if anywhere.
    pub fn default_target(&self) -> Option<ChatTarget> {
        self.telegram
            .chat_id
            .map(|chat_id| ChatTarget::new(chat_id, self.telegram.thread_id))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.ticker.interval_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.delivery_timeout_secs)
    }

    /// A copy safe to print: secrets replaced by a fixed mask.
    #[must_use]
    pub fn masked(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| MASK.to_string());
        let mut out = self.clone();
        out.telegram.bot_token = mask(&self.telegram.bot_token);
        out.telemetry.password = mask(&self.telemetry.password);
        out
    }
}

impl fmt::Display for LaundryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.masked();
        let or_unset = |v: &Option<String>| v.clone().unwrap_or_else(|| "(unset)".to_string());

        writeln!(
            f,
            "machines        {} washers, {} dryers",
            shown.machines.washers, shown.machines.dryers
        )?;
        writeln!(f, "ticker          every {}s", shown.ticker.interval_secs)?;
        writeln!(
            f,
            "topics          {}/<class>/<slot> (finished: {})",
            shown.telemetry.topic_prefix.trim_matches('/'),
            shown.telemetry.finished_markers.join(", ")
        )?;
        match &shown.telemetry.broker_host {
            Some(host) => writeln!(
                f,
                "broker          {host}:{} ({}, client {})",
                shown.telemetry.broker_port,
                if shown.telemetry.tls { "tls" } else { "plain" },
                shown.telemetry.client_id
            )?,
            None => writeln!(f, "broker          (unset, telemetry disabled)")?,
        }
        writeln!(
            f,
            "broker login    {} / {}",
            or_unset(&shown.telemetry.username),
            or_unset(&shown.telemetry.password)
        )?;
        writeln!(
            f,
            "bot token       {}",
            or_unset(&shown.telegram.bot_token)
        )?;
        match self.default_target() {
            Some(target) => writeln!(f, "status chat     {target}")?,
            None => writeln!(f, "status chat     (unset)")?,
        }
        write!(
            f,
            "delivery        {}s timeout",
            shown.telegram.delivery_timeout_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = LaundryConfig::default();
        assert_eq!(config.layout(), BankLayout::new(10, 10));
        assert_eq!(config.tick_interval(), Duration::from_secs(30));
        assert_eq!(config.delivery_timeout(), Duration::from_secs(5));
        assert_eq!(config.telemetry.broker_port, 8883);
        assert_eq!(config.telegram.thread_id, Some(2));
        assert_eq!(config.topic_scheme(), TopicScheme::default());
        assert_eq!(config.default_target(), None);
        config.validate().unwrap();
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LaundryConfig::from_file(&dir.path().join("laundry.yml")).unwrap();
        assert_eq!(config, LaundryConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("laundry.yml");
        std::fs::write(
            &path,
            "machines:\n  dryers: 6\ntelemetry:\n  topic_prefix: laundry/laundry\ntelegram:\n  chat_id: -1001234\n",
        )
        .unwrap();

        let config = LaundryConfig::from_file(&path).unwrap();
        assert_eq!(config.layout(), BankLayout::new(10, 6));
        assert_eq!(config.topic_scheme().subscription(), "laundry/laundry/+/+");
        assert_eq!(
            config.default_target(),
            Some(ChatTarget::new(-1_001_234, Some(2)))
        );
        assert_eq!(config.ticker.interval_secs, 30);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("laundry.yml");
        std::fs::write(&path, "machines: [not, a, map]\n").unwrap();
        assert!(matches!(
            LaundryConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = LaundryConfig::parse("telegram:\n  bot_token: from-file\n").unwrap();
        config
            .apply_env(env(&[
                ("BOT_TOKEN", "from-env"),
                ("MQTT_SERVER", "broker.example.org"),
                ("MQTT_USER", "bot"),
                ("MQTT_PASS", "hunter2"),
                ("LAUNDRY_CHAT_ID", "-42"),
            ]))
            .unwrap();

        assert_eq!(config.telegram.bot_token.as_deref(), Some("from-env"));
        assert_eq!(
            config.telemetry.broker_host.as_deref(),
            Some("broker.example.org")
        );
        assert_eq!(config.telemetry.username.as_deref(), Some("bot"));
        assert_eq!(config.telemetry.password.as_deref(), Some("hunter2"));
        assert_eq!(config.telegram.chat_id, Some(-42));
    }

    #[test]
    fn blank_environment_values_are_ignored() {
        let mut config = LaundryConfig::parse("telegram:\n  bot_token: from-file\n").unwrap();
        config.apply_env(env(&[("BOT_TOKEN", "  ")])).unwrap();
        assert_eq!(config.telegram.bot_token.as_deref(), Some("from-file"));
    }

    #[test]
    fn bad_chat_id_in_environment_is_rejected() {
        let mut config = LaundryConfig::default();
        let err = config
            .apply_env(env(&[("LAUNDRY_CHAT_ID", "general")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: "LAUNDRY_CHAT_ID",
                ..
            }
        ));
    }

    #[test]
    fn validation_rejects_out_of_bounds_values() {
        let cases = [
            "machines:\n  washers: 0\n",
            "machines:\n  dryers: 51\n",
            "ticker:\n  interval_secs: 0\n",
            "telegram:\n  delivery_timeout_secs: 0\n",
            "telemetry:\n  topic_prefix: /\n",
            "telemetry:\n  finished_markers: []\n",
        ];
        for yaml in cases {
            let config = LaundryConfig::parse(yaml).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "{yaml}"
            );
        }
    }

    #[test]
    fn masked_copy_hides_secrets() {
        let mut config = LaundryConfig::default();
        config.telegram.bot_token = Some("123:abc".to_string());
        config.telemetry.password = Some("hunter2".to_string());
        config.telemetry.username = Some("bot".to_string());

        let masked = config.masked();
        assert_eq!(masked.telegram.bot_token.as_deref(), Some(MASK));
        assert_eq!(masked.telemetry.password.as_deref(), Some(MASK));
        assert_eq!(masked.telemetry.username.as_deref(), Some("bot"));

        let shown = config.to_string();
        assert!(!shown.contains("123:abc"));
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("10 washers, 10 dryers"));
    }
}
