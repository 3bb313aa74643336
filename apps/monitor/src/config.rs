use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use client_core::{
    config::{DEFAULT_HOST, DEFAULT_POLL_METHODS, DEFAULT_PORT},
    ConnectionConfig, Endpoint, MonitorConfig, RetryConfig,
};
use serde::Deserialize;
use shared::tables::StaticTables;
use tracing::warn;

const DEFAULT_SETTINGS_FILE: &str = "monitor.toml";
/// Lower bound on the reconnect delay; a zero delay would retry in a tight loop.
const MIN_RECONNECT_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    Fixed,
    Exponential,
}

impl ReconnectStrategy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub reconnect_delay_ms: u64,
    pub reconnect_strategy: ReconnectStrategy,
    /// Upper bound for the exponential strategy.
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: Option<u32>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_methods: Vec<String>,
    pub tables_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            reconnect_delay_ms: 5000,
            reconnect_strategy: ReconnectStrategy::Fixed,
            reconnect_max_delay_ms: 60_000,
            reconnect_max_attempts: None,
            connect_timeout_ms: 3000,
            request_timeout_ms: 10_000,
            poll_interval_ms: 1000,
            poll_methods: DEFAULT_POLL_METHODS.iter().map(|m| m.to_string()).collect(),
            tables_path: None,
            log_level: "info".into(),
        }
    }
}

/// Defaults, then the settings file, then the environment. An explicit
/// `config_path` must exist; the default `monitor.toml` is optional.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match config_path {
        Some(path) => read_settings_file(path)?,
        None if Path::new(DEFAULT_SETTINGS_FILE).exists() => {
            read_settings_file(Path::new(DEFAULT_SETTINGS_FILE))?
        }
        None => Settings::default(),
    };
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("invalid settings file '{}'", path.display()))
}

/// Applies environment overrides looked up through `var`. Values that do
/// not parse are ignored.
pub fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("PHD_HOST") {
        settings.host = v;
    }
    if let Some(v) = var("APP__HOST") {
        settings.host = v;
    }

    for key in ["PHD_PORT", "APP__PORT"] {
        if let Some(parsed) = var(key).and_then(|v| v.parse::<u16>().ok()) {
            settings.port = parsed;
        }
    }

    let millis = [
        ("APP__RECONNECT_DELAY_MS", &mut settings.reconnect_delay_ms),
        (
            "APP__RECONNECT_MAX_DELAY_MS",
            &mut settings.reconnect_max_delay_ms,
        ),
        ("APP__CONNECT_TIMEOUT_MS", &mut settings.connect_timeout_ms),
        ("APP__REQUEST_TIMEOUT_MS", &mut settings.request_timeout_ms),
        ("APP__POLL_INTERVAL_MS", &mut settings.poll_interval_ms),
    ];
    for (key, slot) in millis {
        if let Some(parsed) = var(key).and_then(|v| v.parse::<u64>().ok()) {
            *slot = parsed;
        }
    }

    if let Some(strategy) = var("APP__RECONNECT_STRATEGY").and_then(|v| ReconnectStrategy::parse(&v))
    {
        settings.reconnect_strategy = strategy;
    }
    if let Some(parsed) = var("APP__RECONNECT_MAX_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
        settings.reconnect_max_attempts = Some(parsed);
    }

    if let Some(v) = var("APP__POLL_METHODS") {
        settings.poll_methods = v
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = var("APP__TABLES_PATH") {
        settings.tables_path = Some(PathBuf::from(v));
    }
    if let Some(v) = var("APP__LOG_LEVEL") {
        settings.log_level = v;
    }
}

impl Settings {
    pub fn to_monitor_config(&self) -> MonitorConfig {
        if self.reconnect_delay_ms < MIN_RECONNECT_DELAY_MS {
            warn!(
                configured = self.reconnect_delay_ms,
                used = MIN_RECONNECT_DELAY_MS,
                "reconnect delay raised to the minimum"
            );
        }
        let delay = Duration::from_millis(self.reconnect_delay_ms.max(MIN_RECONNECT_DELAY_MS));
        let retry = match self.reconnect_strategy {
            ReconnectStrategy::Fixed => RetryConfig::Fixed { delay },
            ReconnectStrategy::Exponential => RetryConfig::Exponential {
                base: delay,
                cap: Duration::from_millis(self.reconnect_max_delay_ms).max(delay),
                max_attempts: self.reconnect_max_attempts,
            },
        };
        MonitorConfig {
            connection: ConnectionConfig {
                endpoint: Endpoint {
                    host: self.host.clone(),
                    port: self.port,
                },
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                retry,
            },
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_methods: self.poll_methods.clone(),
        }
    }

    /// The user's tables when `tables_path` is set, the built-in ones otherwise.
    pub fn load_tables(&self) -> anyhow::Result<StaticTables> {
        match &self.tables_path {
            Some(path) => StaticTables::load(path)
                .with_context(|| format!("failed to load binding tables '{}'", path.display())),
            None => Ok(StaticTables::defaults()),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
