//! Handles settings for the application. Configuration is written in
//! `settings.toml` (or the file named by `HOMEBOT_SETTINGS`) and can be
//! overridden by `HOMEBOT__SECTION__KEY` environment variables.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use engine::{ChapterKey, ProviderConfig, SyncOptions, provider::DEFAULT_BASE_URL};
use serde::Deserialize;

const SETTINGS_ENV: &str = "HOMEBOT_SETTINGS";
const DEFAULT_SETTINGS: &str = "settings";

#[derive(Debug, Deserialize)]
pub struct App {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
pub struct Telegram {
    pub token: String,
    /// Base64 credential store, see `homebot_admin credentials`.
    pub credentials: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Provider {
    pub base_url: String,
    pub pace_ms: u64,
    pub rate_limit_backoff_secs: u64,
    pub keep_alive_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub receipt_timeout_secs: u64,
}

impl Default for Provider {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            pace_ms: 1_000,
            rate_limit_backoff_secs: 10,
            keep_alive_secs: 60,
            confirmation_timeout_secs: 60,
            receipt_timeout_secs: 10,
        }
    }
}

impl From<&Provider> for ProviderConfig {
    fn from(provider: &Provider) -> Self {
        Self {
            base_url: provider.base_url.clone(),
            pace: Duration::from_millis(provider.pace_ms),
            rate_limit_backoff: Duration::from_secs(provider.rate_limit_backoff_secs),
            keep_alive: Duration::from_secs(provider.keep_alive_secs),
            confirmation_timeout: Duration::from_secs(provider.confirmation_timeout_secs),
            receipt_timeout: Duration::from_secs(provider.receipt_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub overlap_days: u32,
    pub receipts: bool,
    pub chapters: Vec<ChapterKey>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            overlap_days: 7,
            receipts: true,
            chapters: ChapterKey::ALL.to_vec(),
        }
    }
}

impl From<&SyncSettings> for SyncOptions {
    fn from(sync: &SyncSettings) -> Self {
        Self {
            chapters: sync.chapters.clone(),
            receipts: sync.receipts,
            overlap: chrono::Duration::days(i64::from(sync.overlap_days)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: App,
    pub database: Database,
    pub telegram: Option<Telegram>,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let path = std::env::var(SETTINGS_ENV).unwrap_or_else(|_| DEFAULT_SETTINGS.to_string());
        let settings = Config::builder()
            .add_source(File::with_name(&path))
            .add_source(
                Environment::with_prefix("HOMEBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use config::FileFormat;

    use super::*;

    fn parse(raw: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let settings = parse("database = \"memory\"");

        assert!(matches!(settings.database, Database::Memory));
        assert!(settings.telegram.is_none());
        assert_eq!(settings.app.level, "info");

        let provider = ProviderConfig::from(&settings.provider);
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(provider.pace, Duration::from_secs(1));

        let sync = SyncOptions::from(&settings.sync);
        assert_eq!(sync.overlap, chrono::Duration::hours(168));
        assert_eq!(sync.chapters, ChapterKey::ALL);
    }

    #[test]
    fn sections_are_read() {
        let settings = parse(
            r#"
            [app]
            level = "debug"

            [database]
            sqlite = "data/homebot.db"

            [telegram]
            token = "123:abc"
            credentials = "config/credentials"

            [provider]
            pace_ms = 250
            receipt_timeout_secs = 5

            [sync]
            overlap_days = 3
            receipts = false
            chapters = ["trading_operations"]
            "#,
        );

        assert!(matches!(settings.database, Database::Sqlite(ref path) if path == "data/homebot.db"));
        assert_eq!(settings.telegram.unwrap().token, "123:abc");

        let provider = ProviderConfig::from(&settings.provider);
        assert_eq!(provider.pace, Duration::from_millis(250));
        assert_eq!(provider.receipt_timeout, Duration::from_secs(5));
        assert_eq!(provider.keep_alive, Duration::from_secs(60));

        let sync = SyncOptions::from(&settings.sync);
        assert_eq!(sync.overlap, chrono::Duration::days(3));
        assert!(!sync.receipts);
        assert_eq!(sync.chapters, [ChapterKey::TradingOperations]);
    }
}
