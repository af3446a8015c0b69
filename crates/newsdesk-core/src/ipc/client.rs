//! IPC Client for connecting to daemon
//!
//! Provides a type-safe interface for communicating with the daemon.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::*;
use crate::news::Article;
use crate::storage::DeletionOutcome;
use crate::{Error, Result};

/// Client for communicating with the daemon
#[derive(Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Check if daemon is running by sending a ping
    pub async fn ping(&self) -> Result<bool> {
        match self.call(methods::PING, serde_json::Value::Null).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let result = self.call(methods::STATUS, serde_json::Value::Null).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Cached articles of one category, with the state of its cache entry
    pub async fn news_by_category(
        &self,
        category: &str,
        language: Option<&str>,
        country: Option<&str>,
    ) -> Result<CategoryNewsResponse> {
        let mut params = serde_json::json!({ "category": category });
        if let Some(language) = language {
            params["language"] = serde_json::json!(language);
        }
        if let Some(country) = country {
            params["country"] = serde_json::json!(country);
        }
        let result = self.call(methods::NEWS_BY_CATEGORY, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Drop the cached entries of a category; returns how many were removed
    pub async fn invalidate(&self, category: &str) -> Result<usize> {
        let params = serde_json::json!({ "category": category });
        let result = self.call(methods::NEWS_INVALIDATE, params).await?;
        let response: InvalidateResponse = serde_json::from_value(result)?;
        Ok(response.removed)
    }

    /// Uncached search across several categories at the news provider
    pub async fn search_news(
        &self,
        categories: &[String],
        page: u32,
        page_size: u32,
        language: Option<&str>,
        country: Option<&str>,
    ) -> Result<Vec<Article>> {
        let mut params = serde_json::json!({
            "categories": categories,
            "page": page,
            "page_size": page_size
        });
        if let Some(language) = language {
            params["language"] = serde_json::json!(language);
        }
        if let Some(country) = country {
            params["country"] = serde_json::json!(country);
        }
        let result = self.call(methods::NEWS_SEARCH, params).await?;
        let response: ArticleListResponse = serde_json::from_value(result)?;
        Ok(response.articles)
    }

    pub async fn get_article(&self, user_id: &str, id: &str) -> Result<Option<Article>> {
        let params = serde_json::json!({ "user_id": user_id, "id": id });
        let result = self.call(methods::NEWS_GET, params).await?;
        let response: ArticleResponse = serde_json::from_value(result)?;
        Ok(response.article)
    }

    /// Balanced corpus page
    pub async fn all_news(
        &self,
        categories: &[String],
        page_number: u32,
        page_size: Option<u32>,
    ) -> Result<Vec<Article>> {
        let params = serde_json::to_value(AllNewsParams {
            categories: categories.to_vec(),
            page_number,
            page_size,
        })?;
        let result = self.call(methods::NEWS_ALL, params).await?;
        let response: ArticleListResponse = serde_json::from_value(result)?;
        Ok(response.articles)
    }

    pub async fn categories(&self) -> Result<Vec<String>> {
        let result = self
            .call(methods::NEWS_CATEGORIES, serde_json::Value::Null)
            .await?;
        let response: CategoryListResponse = serde_json::from_value(result)?;
        Ok(response.categories)
    }

    pub async fn latest_recommendations(
        &self,
        user_id: &str,
        page_number: i64,
        page_size: Option<usize>,
    ) -> Result<Vec<Article>> {
        let params = serde_json::json!({
            "user_id": user_id,
            "page_number": page_number,
            "page_size": page_size
        });
        let result = self.call(methods::RECOMMENDATION_LATEST, params).await?;
        let response: ArticleListResponse = serde_json::from_value(result)?;
        Ok(response.articles)
    }

    pub async fn recommend(&self, user_id: &str, topics: &[String]) -> Result<Vec<Article>> {
        let params = serde_json::json!({ "user_id": user_id, "topics": topics });
        let result = self.call(methods::RECOMMENDATION_RECOMMEND, params).await?;
        let response: ArticleListResponse = serde_json::from_value(result)?;
        Ok(response.articles)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Article>> {
        let params = serde_json::json!({ "query": query });
        let result = self.call(methods::SEARCH, params).await?;
        let response: ArticleListResponse = serde_json::from_value(result)?;
        Ok(response.articles)
    }

    pub async fn request_deletion(&self, user_id: &str) -> Result<()> {
        let params = serde_json::json!({ "user_id": user_id });
        self.call(methods::ACCOUNT_REQUEST_DELETION, params).await?;
        Ok(())
    }

    pub async fn resolve_deletion(&self, user_id: &str) -> Result<DeletionOutcome> {
        let params = serde_json::json!({ "user_id": user_id });
        let result = self.call(methods::ACCOUNT_RESOLVE_DELETION, params).await?;
        let response: DeletionResponse = serde_json::from_value(result)?;
        Ok(response.outcome)
    }

    /// Send a request and receive a response
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Other(format!(
                "Failed to connect to daemon at {}: {}. Is the daemon running?",
                self.socket_path.display(),
                e
            ))
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request = Request::new(method).with_params(params);
        let request_json = serde_json::to_string(&request)?;

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut response_line = String::new();
        reader.read_line(&mut response_line).await?;

        let response: Response = serde_json::from_str(&response_line)?;

        if let Some(error) = response.error {
            return Err(Error::Other(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        response.result.ok_or_else(|| Error::Other("Empty response".to_string()))
    }
}

/// Check if daemon is reachable
pub async fn is_daemon_running(socket_path: &std::path::Path) -> bool {
    let client = DaemonClient::new(socket_path.to_path_buf());
    client.ping().await.unwrap_or(false)
}
