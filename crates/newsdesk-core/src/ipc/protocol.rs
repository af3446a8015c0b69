//! IPC Protocol definitions for daemon-client communication
//!
//! Uses JSON-RPC style request/response format over Unix socket.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::news::{Article, EntryState, DEFAULT_COUNTRY, DEFAULT_LANGUAGE};
use crate::scheduler::ScheduledJob;
use crate::storage::DeletionOutcome;

/// JSON-RPC style request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// JSON-RPC style response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Uuid, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// Error codes
pub const ERR_PARSE: i32 = -32700;
pub const ERR_INVALID_REQUEST: i32 = -32600;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;
pub const ERR_NOT_FOUND: i32 = -32004;
pub const ERR_UNAVAILABLE: i32 = -32003;

// Method names
pub mod methods {
    pub const PING: &str = "ping";
    pub const STATUS: &str = "status";

    // News methods
    pub const NEWS_BY_CATEGORY: &str = "news.by_category";
    pub const NEWS_GET: &str = "news.get";
    pub const NEWS_ALL: &str = "news.all";
    pub const NEWS_CATEGORIES: &str = "news.categories";
    pub const NEWS_SEARCH: &str = "news.search";
    pub const NEWS_INVALIDATE: &str = "news.invalidate";

    // Recommendation methods
    pub const RECOMMENDATION_LATEST: &str = "recommendation.latest";
    pub const RECOMMENDATION_RECOMMEND: &str = "recommendation.recommend";
    pub const SEARCH: &str = "search";

    // Account methods
    pub const ACCOUNT_REQUEST_DELETION: &str = "account.request_deletion";
    pub const ACCOUNT_RESOLVE_DELETION: &str = "account.resolve_deletion";
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}

fn default_page() -> u32 {
    1
}

fn default_search_page_size() -> u32 {
    100
}

// Parameter structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryParams {
    pub category: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_country")]
    pub country: String,
}

/// Multi-category search straight against the news provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSearchParams {
    pub categories: Vec<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_search_page_size")]
    pub page_size: u32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_country")]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateParams {
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleIdParams {
    pub user_id: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllNewsParams {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub page_number: u32,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestParams {
    pub user_id: String,
    #[serde(default)]
    pub page_number: i64,
    #[serde(default)]
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendParams {
    pub user_id: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdParams {
    pub user_id: String,
}

// Response structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_secs: u64,
    pub cached_categories: usize,
    #[serde(default)]
    pub jobs: Vec<ScheduledJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleListResponse {
    pub articles: Vec<Article>,
}

/// Articles of one category plus the state of its cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryNewsResponse {
    pub articles: Vec<Article>,
    pub cache_state: EntryState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleResponse {
    pub article: Option<Article>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryListResponse {
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionResponse {
    pub outcome: DeletionOutcome,
}
