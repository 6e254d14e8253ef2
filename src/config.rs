use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{Product, validate_catalog};

const DEFAULT_CONFIG_FILE: &str = "config/default";
const ENV_PREFIX: &str = "PRICEWATCH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub storage: StorageConfig,
    pub scraper: ScraperConfig,
    pub network: NetworkConfig,
    pub email: EmailConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub check_interval_secs: u64,
    pub max_concurrent_fetches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub prices_file: PathBuf,
    pub alerts_log: PathBuf,
    pub email_marker_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub page_timeout_secs: u64,
    pub selector_timeout_secs: u64,
    pub user_agent: String,
    pub chrome_path: Option<String>,
    pub headless: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub probe_address: String,
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    Tls,
    StartTls,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: Option<String>,
    pub recipient: String,
    pub security: SmtpSecurity,
    pub timeout_secs: u64,
    /// Minimum spacing between two successful batch emails.
    pub send_interval_secs: u64,
    pub flush_interval_secs: u64,
    pub max_failures: u32,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<PathBuf>,
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl ScraperConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_secs)
    }
}

impl NetworkConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl EmailConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Sender falls back to the SMTP login, as most providers require.
    pub fn sender(&self) -> &str {
        self.from_address.as_deref().unwrap_or(&self.username)
    }
}

impl AppConfig {
    /// Layers built-in defaults, `config/default.*`, an optional explicit file
    /// and `PRICEWATCH__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let s = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from an inline TOML document on top of the defaults.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let s = Self::defaults()?
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("monitor.check_interval_secs", 60)?
            .set_default("monitor.max_concurrent_fetches", 5)?
            .set_default("storage.prices_file", "data/prices.json")?
            .set_default("storage.alerts_log", "data/alerts.log")?
            .set_default("storage.email_marker_file", "data/last_email.txt")?
            .set_default("scraper.page_timeout_secs", 60)?
            .set_default("scraper.selector_timeout_secs", 15)?
            .set_default("scraper.user_agent", "Mozilla/5.0 (X11; Linux x86_64) pricewatch/0.1")?
            .set_default("scraper.headless", true)?
            .set_default("network.probe_address", "8.8.8.8:53")?
            .set_default("network.probe_timeout_secs", 5)?
            .set_default("email.enabled", false)?
            .set_default("email.smtp_host", "")?
            .set_default("email.smtp_port", 587)?
            .set_default("email.username", "")?
            .set_default("email.password", "")?
            .set_default("email.recipient", "")?
            .set_default("email.security", "starttls")?
            .set_default("email.timeout_secs", 30)?
            .set_default("email.send_interval_secs", 3600)?
            .set_default("email.flush_interval_secs", 60)?
            .set_default("email.max_failures", 5)?
            .set_default("email.queue_capacity", 100)?
            .set_default("logging.level", "info")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.check_interval_secs == 0 {
            return Err(ConfigError::Message(
                "monitor.check_interval_secs must be greater than 0".into(),
            ));
        }

        if self.monitor.max_concurrent_fetches == 0 {
            return Err(ConfigError::Message(
                "monitor.max_concurrent_fetches must be greater than 0".into(),
            ));
        }

        if self.scraper.page_timeout_secs == 0 || self.scraper.selector_timeout_secs == 0 {
            return Err(ConfigError::Message("scraper timeouts must be greater than 0".into()));
        }

        if self.network.probe_address.trim().is_empty() {
            return Err(ConfigError::Message("network.probe_address must not be empty".into()));
        }

        if self.email.flush_interval_secs == 0 {
            return Err(ConfigError::Message(
                "email.flush_interval_secs must be greater than 0".into(),
            ));
        }

        if self.email.queue_capacity == 0 {
            return Err(ConfigError::Message("email.queue_capacity must be greater than 0".into()));
        }

        if self.email.max_failures == 0 {
            return Err(ConfigError::Message("email.max_failures must be greater than 0".into()));
        }

        if self.email.enabled {
            if self.email.smtp_host.trim().is_empty() {
                return Err(ConfigError::Message(
                    "email.smtp_host is required when email is enabled".into(),
                ));
            }
            if self.email.smtp_port == 0 {
                return Err(ConfigError::Message("SMTP port must be greater than 0".into()));
            }
            if self.email.recipient.trim().is_empty() {
                return Err(ConfigError::Message(
                    "email.recipient is required when email is enabled".into(),
                ));
            }
            if self.email.sender().trim().is_empty() {
                return Err(ConfigError::Message(
                    "email.from_address or email.username is required".into(),
                ));
            }
        }

        validate_catalog(&self.products).map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(())
    }
}
