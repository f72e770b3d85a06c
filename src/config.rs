use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

pub const MIN_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 20;
pub const DELETE_BATCH_SIZE: usize = 25;

const APP_DIR: &str = "save-to-ink";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Tenant used by the command line client.
    #[serde(default = "default_account")]
    pub account: String,

    #[serde(default)]
    pub send_enabled: bool,
    pub sender_email: Option<String>,
    pub destination_email: Option<String>,
    pub mailjet_api_key: Option<String>,
    pub mailjet_api_secret: Option<String>,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Settings handed to an [`ArticleStore`](crate::db::ArticleStore) backend at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub min_page_size: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Upper bound on records removed per backend request by `delete_by_account`.
    pub delete_batch_size: usize,
    /// Extra attempts for a delete batch that failed with a retryable error.
    pub delete_batch_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            min_page_size: 1,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            delete_batch_size: DELETE_BATCH_SIZE,
            delete_batch_retries: 3,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_page_size == 0 {
            return Err(AppError::Config("min_page_size must be at least 1".into()));
        }
        if self.min_page_size > self.max_page_size {
            return Err(AppError::Config(format!(
                "min_page_size ({}) exceeds max_page_size ({})",
                self.min_page_size, self.max_page_size
            )));
        }
        if !(self.min_page_size..=self.max_page_size).contains(&self.default_page_size) {
            return Err(AppError::Config(format!(
                "default_page_size ({}) must be within {}..={}",
                self.default_page_size, self.min_page_size, self.max_page_size
            )));
        }
        if self.delete_batch_size == 0 {
            return Err(AppError::Config("delete_batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_account() -> String {
    "local".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            account: default_account(),
            send_enabled: false,
            sender_email: None,
            destination_email: None,
            mailjet_api_key: None,
            mailjet_api_secret: None,
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Reads the config file (writing defaults on first run), applies
    /// environment overrides and validates the result.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Secrets and deployment switches may come from the environment instead of the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k).filter(|v| !v.is_empty()));

        if let Some(v) = first(&["SAVE_TO_INK_DB_PATH"]) {
            self.db_path = v;
        }
        if let Some(v) = first(&["SAVE_TO_INK_ACCOUNT"]) {
            self.account = v;
        }
        if let Some(v) = first(&["SAVE_TO_INK_SEND_ENABLED"]) {
            self.send_enabled = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = first(&["SAVE_TO_INK_SENDER_EMAIL"]) {
            self.sender_email = Some(v);
        }
        if let Some(v) = first(&["SAVE_TO_INK_DEST_EMAIL"]) {
            self.destination_email = Some(v);
        }
        if let Some(v) = first(&["MAILJET_API_KEY", "MJ_APIKEY_PUBLIC"]) {
            self.mailjet_api_key = Some(v);
        }
        if let Some(v) = first(&["MAILJET_API_SECRET", "MJ_APIKEY_PRIVATE"]) {
            self.mailjet_api_secret = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;

        if self.account.trim().is_empty() {
            return Err(AppError::Config("account must not be empty".into()));
        }

        if self.send_enabled {
            let missing: Vec<&str> = [
                ("sender_email", &self.sender_email),
                ("destination_email", &self.destination_email),
                ("mailjet_api_key", &self.mailjet_api_key),
                ("mailjet_api_secret", &self.mailjet_api_secret),
            ]
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
            .map(|(name, _)| *name)
            .collect();

            if !missing.is_empty() {
                return Err(AppError::Config(format!(
                    "sending is enabled but settings are missing: {}",
                    missing.join(", ")
                )));
            }
        }
        Ok(())
    }
}
