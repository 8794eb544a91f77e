use std::path::{Path, PathBuf};

use krc_adapters::DEFAULT_CAFE_BASE;
use krc_core::Category;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("category registry {path}: {message}")]
    Registry { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub database_url: String,
    pub cafe_base_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub reports_dir: Option<PathBuf>,
    pub fixtures_dir: Option<PathBuf>,
    pub categories_file: PathBuf,
    /// Receives each non-empty run delta as JSON.
    pub webhook_url: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds and validates a config from any key lookup; blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let http_timeout_secs = match get("KRC_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "KRC_HTTP_TIMEOUT_SECS",
                message: format!("{raw:?} is not a whole number of seconds"),
            })?,
            None => 20,
        };

        let config = Self {
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            cafe_base_url: get("KRC_CAFE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CAFE_BASE.to_string()),
            user_agent: get("KRC_USER_AGENT").unwrap_or_else(|| "krc-bot/0.1".to_string()),
            http_timeout_secs,
            scheduler_enabled: get("KRC_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: get("KRC_SYNC_CRON").unwrap_or_else(|| "0 */15 * * * *".to_string()),
            reports_dir: get("KRC_REPORTS_DIR").map(PathBuf::from),
            fixtures_dir: get("KRC_FIXTURES_DIR").map(PathBuf::from),
            categories_file: get("KRC_CATEGORIES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("categories.yaml")),
            webhook_url: get("KRC_WEBHOOK_URL"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        if !is_http_url(&self.cafe_base_url) {
            return Err(ConfigError::Invalid {
                key: "KRC_CAFE_BASE_URL",
                message: format!("{:?} is not an http(s) url", self.cafe_base_url),
            });
        }
        if let Some(url) = &self.webhook_url {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid {
                    key: "KRC_WEBHOOK_URL",
                    message: format!("{url:?} is not an http(s) url"),
                });
            }
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "KRC_HTTP_TIMEOUT_SECS",
                message: "must be at least 1".to_string(),
            });
        }
        if self.sync_cron.trim().is_empty() {
            return Err(ConfigError::Missing("KRC_SYNC_CRON"));
        }
        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryConfig {
    pub category: Category,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub listing_url: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryRegistry {
    pub categories: Vec<CategoryConfig>,
}

impl CategoryRegistry {
    pub fn all_enabled() -> Self {
        Self {
            categories: Category::ALL
                .into_iter()
                .map(|category| CategoryConfig {
                    category,
                    enabled: true,
                    listing_url: None,
                })
                .collect(),
        }
    }

    pub fn from_yaml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Registry {
            path: origin.display().to_string(),
            message: e.to_string(),
        })
    }

    /// A missing file means "every category, default urls".
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_yaml(&text, path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::all_enabled()),
            Err(err) => Err(ConfigError::Registry {
                path: path.display().to_string(),
                message: err.to_string(),
            }),
        }
    }

    pub fn enabled(&self) -> Vec<Category> {
        let mut out: Vec<Category> = self
            .categories
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.category)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn listing_overrides(&self) -> impl Iterator<Item = (Category, &str)> + '_ {
        self.categories
            .iter()
            .filter_map(|c| c.listing_url.as_deref().map(|url| (c.category, url)))
    }
}
