use serde::Deserialize;
use std::collections::BTreeMap;

use crate::models::{Metric, RuleConfig, Severity};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default = "default_caches")]
    pub caches: BTreeMap<String, CacheConfig>,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub sample_interval_ms: u64,
    /// How often to log request/alert totals at INFO level.
    pub stats_log_interval_secs: u64,
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,
    #[serde(default = "default_response_time_capacity")]
    pub response_time_capacity: usize,
    /// Filesystem watched by the diskSpace rule.
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
}

fn default_sample_capacity() -> usize {
    100
}

fn default_response_time_capacity() -> usize {
    1000
}

fn default_disk_path() -> String {
    ".".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// JSON rule set applied on top of `rules` at startup.
    pub rules_file: Option<String>,
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleEntry>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            rules_file: None,
            rules: default_rules(),
        }
    }
}

fn default_history_capacity() -> usize {
    500
}

/// One `[[alerts.rules]]` table. Order of entries is evaluation order.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleEntry {
    pub name: String,
    #[serde(flatten)]
    pub rule: RuleConfig,
}

fn rule(
    name: &str,
    metric: Metric,
    threshold: f64,
    cooldown_ms: u64,
    multiplier: f64,
) -> RuleEntry {
    RuleEntry {
        name: name.into(),
        rule: RuleConfig::new(metric, threshold)
            .cooldown_ms(cooldown_ms)
            .severity(Severity::Warning)
            .critical_multiplier(multiplier),
    }
}

/// Built-in rule set used when the config names no rules.
pub fn default_rules() -> Vec<RuleEntry> {
    vec![
        rule("cpu", Metric::Cpu, 80.0, 300_000, 1.1),
        rule("memory", Metric::Memory, 85.0, 300_000, 1.1),
        rule("responseTime", Metric::ResponseTime, 2000.0, 180_000, 2.5),
        rule("errorRate", Metric::ErrorRate, 5.0, 180_000, 3.0),
        rule("diskSpace", Metric::DiskSpace, 90.0, 600_000, 1.05),
        RuleEntry {
            name: "requestsPerMinute".into(),
            rule: RuleConfig::new(Metric::RequestsPerMinute, 1000.0)
                .cooldown_ms(300_000)
                .critical_multiplier(1.2)
                .enabled(false),
        },
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

pub const DEFAULT_CACHE: &str = "default";

/// Built-in instances; each is present even when `[caches]` names only some of them.
pub fn default_caches() -> BTreeMap<String, CacheConfig> {
    [
        (DEFAULT_CACHE, 300, 60),
        ("products", 600, 120),
        ("settings", 1800, 300),
    ]
    .into_iter()
    .map(|(name, ttl, sweep)| {
        (
            name.to_string(),
            CacheConfig {
                default_ttl_secs: ttl,
                sweep_interval_secs: sweep,
            },
        )
    })
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Append-only alert log; omitted disables the channel.
    pub log_path: Option<String>,
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    pub email: Option<EmailConfig>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
            email: None,
        }
    }
}

impl NotificationsConfig {
    /// Longest any configured channel may take to deliver one alert.
    pub fn delivery_timeout(&self) -> std::time::Duration {
        let email = self.email.as_ref().map_or(0, |e| e.timeout_secs);
        std::time::Duration::from_secs(self.webhook_timeout_secs.max(email))
    }
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_email_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_email_timeout_secs() -> u64 {
    15
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let mut config: AppConfig = toml::from_str(s)?;
        for (name, defaults) in default_caches() {
            config.caches.entry(name).or_insert(defaults);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.monitoring.sample_interval_ms > 0,
            "monitoring.sample_interval_ms must be > 0, got {}",
            self.monitoring.sample_interval_ms
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.monitoring.sample_capacity > 0,
            "monitoring.sample_capacity must be > 0, got {}",
            self.monitoring.sample_capacity
        );
        anyhow::ensure!(
            self.monitoring.response_time_capacity > 0,
            "monitoring.response_time_capacity must be > 0, got {}",
            self.monitoring.response_time_capacity
        );
        anyhow::ensure!(
            self.alerts.history_capacity > 0,
            "alerts.history_capacity must be > 0, got {}",
            self.alerts.history_capacity
        );
        for entry in &self.alerts.rules {
            anyhow::ensure!(!entry.name.is_empty(), "alerts.rules: name must be non-empty");
            anyhow::ensure!(
                entry.rule.threshold.is_finite(),
                "alerts.rules.{}.threshold must be a finite number",
                entry.name
            );
            anyhow::ensure!(
                entry.rule.critical_multiplier.is_finite() && entry.rule.critical_multiplier > 0.0,
                "alerts.rules.{}.critical_multiplier must be > 0, got {}",
                entry.name,
                entry.rule.critical_multiplier
            );
        }
        for (name, cache) in &self.caches {
            anyhow::ensure!(
                cache.default_ttl_secs > 0,
                "caches.{}.default_ttl_secs must be > 0, got {}",
                name,
                cache.default_ttl_secs
            );
            anyhow::ensure!(
                cache.sweep_interval_secs > 0,
                "caches.{}.sweep_interval_secs must be > 0, got {}",
                name,
                cache.sweep_interval_secs
            );
        }
        if let Some(url) = &self.notifications.webhook_url {
            anyhow::ensure!(
                url.starts_with("http://") || url.starts_with("https://"),
                "notifications.webhook_url must be an http(s) URL, got {}",
                url
            );
        }
        anyhow::ensure!(
            self.notifications.webhook_timeout_secs > 0,
            "notifications.webhook_timeout_secs must be > 0, got {}",
            self.notifications.webhook_timeout_secs
        );
        if let Some(email) = &self.notifications.email {
            anyhow::ensure!(
                !email.smtp_host.is_empty(),
                "notifications.email.smtp_host must be non-empty"
            );
            anyhow::ensure!(
                !email.to.is_empty(),
                "notifications.email.to must be non-empty"
            );
        }
        Ok(())
    }
}
