use breaker::BreakerConfig;
use config::{ConfigError, TargetConfig, TargetRegistry};
use notifier::TelegramConfig;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::scheduler::SchedulePolicy;

fn default_database_url() -> String {
    "sqlite://watcher.db".to_string()
}

fn default_explorer_url() -> String {
    client::ETHERSCAN_V2_URL.to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

const fn default_tick_secs() -> u64 {
    60
}

const fn default_notify_delay_secs() -> u64 {
    5 * 60
}

const fn default_cache_ttl_secs() -> u64 {
    4 * 60
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Explorer API endpoint and keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    #[serde(default = "default_explorer_url")]
    pub base_url: String,
    /// Primary API key
    #[serde(default)]
    pub primary_key: String,
    /// Fallback API key
    #[serde(default)]
    pub secondary_key: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            base_url: default_explorer_url(),
            primary_key: String::new(),
            secondary_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Scheduling policy and timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub policy: SchedulePolicy,
    /// Seconds between scheduler ticks
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Seconds between a fetch and the fan-out it triggers (per-target policy)
    #[serde(default = "default_notify_delay_secs")]
    pub notify_delay_secs: u64,
    /// Lifetime of cached balances in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulePolicy::default(),
            tick_secs: default_tick_secs(),
            notify_delay_secs: default_notify_delay_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl SchedulerConfig {
    pub const fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub const fn notify_delay(&self) -> Duration {
        Duration::from_secs(self.notify_delay_secs)
    }

    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Top-level watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database url
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Target used by subscriptions that name none
    pub default_target: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Port of the Prometheus exporter, disabled when absent
    #[serde(default)]
    pub metrics_port: Option<u16>,

    #[serde(default)]
    pub explorer: ExplorerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Telegram delivery, log-only when absent
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    /// Monitored targets (partners)
    pub targets: Vec<TargetConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;

        Ok(config)
    }

    /// Build the target registry.
    pub fn registry(&self) -> Result<TargetRegistry, ConfigError> {
        TargetRegistry::new(self.targets.clone(), self.default_target.clone())
    }

    /// Check settings that span several sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let registry = self.registry()?;

        if self.scheduler.tick_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_secs must be positive".into()));
        }

        // A cache hit must never hide an overdue check.
        if let Some(min_minutes) = registry.min_interval_minutes() {
            let min_interval = u64::from(min_minutes) * 60;
            if self.scheduler.cache_ttl_secs >= min_interval {
                return Err(ConfigError::Invalid(format!(
                    "scheduler.cache_ttl_secs ({}) must be shorter than the smallest check interval ({}s)",
                    self.scheduler.cache_ttl_secs, min_interval
                )));
            }
        }

        self.breaker.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Replace secrets with values from the environment or CLI, when given.
    pub fn apply_overrides(
        &mut self,
        primary_key: Option<String>,
        secondary_key: Option<String>,
        bot_token: Option<String>,
    ) {
        if let Some(key) = primary_key {
            self.explorer.primary_key = key;
        }
        if let Some(key) = secondary_key {
            self.explorer.secondary_key = Some(key);
        }
        if let Some(token) = bot_token {
            self.telegram
                .get_or_insert_with(|| TelegramConfig {
                    api_url: notifier::telegram::TELEGRAM_API_URL.to_string(),
                    bot_token: String::new(),
                    admin_chat_id: None,
                    timeout_secs: default_timeout_secs(),
                })
                .bot_token = token;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        default_target = "main"

        [explorer]
        primary_key = "PRIMARY"
        secondary_key = "SECONDARY"

        [scheduler]
        policy = "per_target"
        tick_secs = 1800

        [breaker]
        failure_threshold = 4

        [[targets]]
        name = "main"
        wallet = "0x1111111111111111111111111111111111111111"
        contract = "0x55d398326f99059fF775485246999027B3197955"

        [[targets]]
        name = "fast"
        wallet = "0x2222222222222222222222222222222222222222"
        contract = "0x55d398326f99059fF775485246999027B3197955"
        min_interval_minutes = 5
    "#;

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.scheduler.policy, SchedulePolicy::PerTarget);
        assert_eq!(config.scheduler.notify_delay_secs, 300);
        assert_eq!(config.breaker.failure_threshold, 4);
        assert_eq!(config.breaker.escalation_threshold, 3);
        assert_eq!(config.database_url, "sqlite://watcher.db");
        assert!(config.telegram.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_cache_ttl_must_undercut_min_interval() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        // "fast" accepts 5 minute intervals.
        config.scheduler.cache_ttl_secs = 300;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.scheduler.cache_ttl_secs = 299;
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.apply_overrides(Some("ENV_KEY".into()), None, Some("123:abc".into()));
        assert_eq!(config.explorer.primary_key, "ENV_KEY");
        assert_eq!(config.explorer.secondary_key.as_deref(), Some("SECONDARY"));
        assert_eq!(config.telegram.unwrap().bot_token, "123:abc");
    }
}
