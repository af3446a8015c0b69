use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub newscatcher: NewsCatcherConfig,
    #[serde(default)]
    pub recommender: RecommenderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Upstream news provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsCatcherConfig {
    /// Value sent in the `x-api-token` header
    #[serde(default)]
    pub api_key: Option<String>,
    /// Search endpoint, e.g. "https://v3-api.newscatcherapi.com/api/search"
    #[serde(default)]
    pub base_url: Option<String>,
    /// Days back from today covered by every search. Not user-supplied so
    /// cache keys stay stable.
    #[serde(default = "default_search_window_days")]
    pub search_window_days: i64,
    /// Countries always appended to the requested one
    #[serde(default = "default_extra_countries")]
    pub extra_countries: Vec<String>,
    /// Page size for category fetches
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Request timeout in seconds
    #[serde(default = "default_news_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for NewsCatcherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            search_window_days: default_search_window_days(),
            extra_countries: default_extra_countries(),
            page_size: default_page_size(),
            request_timeout_secs: default_news_timeout(),
        }
    }
}

/// Recommendation and semantic search service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommenderConfig {
    #[serde(default)]
    pub recommend_url: Option<String>,
    #[serde(default)]
    pub cached_recommend_url: Option<String>,
    #[serde(default)]
    pub search_url: Option<String>,
    /// The recommender recomputes on demand and can be very slow
    #[serde(default = "default_recommender_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            recommend_url: None,
            cached_recommend_url: None,
            search_url: None,
            request_timeout_secs: default_recommender_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a successful category fetch
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Lifetime of a failed category fetch (negative cache)
    #[serde(default = "default_failure_ttl")]
    pub failure_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            failure_ttl_secs: default_failure_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Notification dispatch interval in seconds (0 = disabled)
    #[serde(default = "default_notification_interval")]
    pub notification_interval_secs: u64,
    /// Expired account sweep interval in seconds (0 = disabled)
    #[serde(default = "default_deletion_sweep_interval")]
    pub deletion_sweep_interval_secs: u64,
    /// Days an account stays pending before the sweep deletes it
    #[serde(default = "default_deletion_grace_days")]
    pub deletion_grace_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            notification_interval_secs: default_notification_interval(),
            deletion_sweep_interval_secs: default_deletion_sweep_interval(),
            deletion_grace_days: default_deletion_grace_days(),
        }
    }
}

impl SchedulerConfig {
    pub fn deletion_grace(&self) -> chrono::Duration {
        chrono::Duration::days(self.deletion_grace_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// HTTP relay that accepts JSON messages. Mail is only logged when unset.
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            from_address: default_from_address(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Seeded article corpus. Defaults to `<data_dir>/NewsData.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsdesk")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_search_window_days() -> i64 {
    10
}

fn default_extra_countries() -> Vec<String> {
    ["EG", "CA", "FR", "GB", "DE"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_page_size() -> u32 {
    100
}

fn default_news_timeout() -> u64 {
    30
}

fn default_recommender_timeout() -> u64 {
    1200 // 20 minutes
}

fn default_cache_ttl() -> u64 {
    5 * 24 * 60 * 60 // 5 days
}

fn default_failure_ttl() -> u64 {
    5 * 60 // 5 minutes
}

fn default_notification_interval() -> u64 {
    300 // 5 minutes
}

fn default_deletion_sweep_interval() -> u64 {
    86400 // 24 hours
}

fn default_deletion_grace_days() -> i64 {
    14
}

fn default_from_address() -> String {
    "no-reply@newsdesk.local".to_string()
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

fn require<'a>(value: &'a Option<String>, name: &str) -> crate::Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(crate::Error::Config(format!("{} is not configured", name))),
    }
}

impl AppConfig {
    /// Load configuration from file or return defaults
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self) -> crate::Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Fail fast when a key or endpoint the daemon cannot run without is absent.
    pub fn validate(&self) -> crate::Result<()> {
        require(&self.newscatcher.api_key, "newscatcher.api_key")?;
        require(&self.newscatcher.base_url, "newscatcher.base_url")?;
        require(&self.recommender.recommend_url, "recommender.recommend_url")?;
        require(
            &self.recommender.cached_recommend_url,
            "recommender.cached_recommend_url",
        )?;
        require(&self.recommender.search_url, "recommender.search_url")?;
        Ok(())
    }

    /// Get the configuration file path
    /// Always uses ~/.config/newsdesk/config.toml on all platforms
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("newsdesk")
            .join("config.toml")
    }

    /// Get the database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("newsdesk.db")
    }

    /// Get the Unix socket path for IPC
    pub fn socket_path(&self) -> PathBuf {
        self.data_dir().join("newsdesk.sock")
    }

    /// Get the seeded corpus path
    pub fn corpus_path(&self) -> PathBuf {
        match &self.corpus.path {
            Some(path) => expand_tilde(path),
            None => self.data_dir().join("NewsData.json"),
        }
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }
}
