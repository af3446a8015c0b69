use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::merge::dedup_by_title;
use crate::config::AppConfig;
use crate::news::client::truncate_payload;
use crate::news::Article;
use crate::{Error, Result};

/// Per-user recommendations computed by an external service
#[async_trait]
pub trait RecommendationSource: Send + Sync {
    /// Compute fresh recommendations for the given topics
    async fn recommend(&self, topics: &[String], user_id: &str) -> Result<Vec<Article>>;

    /// The user's most recently computed recommendation list
    async fn latest(&self, user_id: &str) -> Result<Vec<Article>>;
}

#[derive(Debug, Serialize)]
struct RecommendRequest<'a> {
    topics: &'a [String],
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RecommendResponse {
    #[serde(default, alias = "Recommendations", alias = "RECOMMENDATIONS")]
    recommendations: Vec<Article>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default, alias = "Results", alias = "RESULTS")]
    results: Vec<Article>,
}

fn build_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn required_url(value: &Option<String>, name: &str) -> Result<String> {
    value
        .clone()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{} is not configured", name)))
}

/// Read a response body, mapping non-2xx statuses to `UpstreamUnavailable`
async fn read_body(response: reqwest::Response, service: &str) -> Result<String> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::UpstreamUnavailable(format!(
            "HTTP {} from {}",
            status, service
        )));
    }
    Ok(response.text().await?)
}

/// Deserialize a payload, logging the raw body on mismatch
fn decode<T: serde::de::DeserializeOwned>(body: &str, context: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        tracing::error!(
            error = %e,
            payload = %truncate_payload(body),
            "Failed to deserialize {}",
            context
        );
        Error::Deserialization {
            context: context.to_string(),
            message: e.to_string(),
        }
    })
}

/// HTTP client for the recommendation service
pub struct RecommendationClient {
    client: Client,
    recommend_url: String,
    cached_recommend_url: String,
}

impl RecommendationClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let rec = &config.recommender;
        Ok(Self {
            client: build_client(rec.request_timeout_secs)?,
            recommend_url: required_url(&rec.recommend_url, "recommender.recommend_url")?,
            cached_recommend_url: required_url(
                &rec.cached_recommend_url,
                "recommender.cached_recommend_url",
            )?,
        })
    }
}

#[async_trait]
impl RecommendationSource for RecommendationClient {
    async fn recommend(&self, topics: &[String], user_id: &str) -> Result<Vec<Article>> {
        let response = self
            .client
            .post(&self.recommend_url)
            .json(&RecommendRequest { topics, user_id })
            .send()
            .await?;
        let body = read_body(response, "recommendation service").await?;
        let parsed: RecommendResponse = decode(&body, "recommendation response")?;
        Ok(parsed
            .recommendations
            .into_iter()
            .map(Article::normalize)
            .collect())
    }

    async fn latest(&self, user_id: &str) -> Result<Vec<Article>> {
        let response = self
            .client
            .get(&self.cached_recommend_url)
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        let body = read_body(response, "cached recommendations").await?;
        let parsed: Option<Vec<Article>> = decode(&body, "cached recommendations")?;
        Ok(parsed
            .unwrap_or_default()
            .into_iter()
            .map(Article::normalize)
            .collect())
    }
}

/// HTTP client for the semantic search service
pub struct SearchClient {
    client: Client,
    search_url: String,
}

impl SearchClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let rec = &config.recommender;
        Ok(Self {
            client: build_client(rec.request_timeout_secs)?,
            search_url: required_url(&rec.search_url, "recommender.search_url")?,
        })
    }

    /// Search articles by free text; results are de-duplicated by title
    pub async fn search(&self, query: &str) -> Result<Vec<Article>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("search query is empty".into()));
        }

        let response = self
            .client
            .post(&self.search_url)
            .json(&SearchRequest { query })
            .send()
            .await?;
        let body = read_body(response, "search service").await?;
        let parsed: SearchResponse = decode(&body, "search response")?;
        Ok(dedup_by_title(
            parsed.results.into_iter().map(Article::normalize).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommend_response_field_case() {
        let parsed: RecommendResponse =
            decode(r#"{"Recommendations": [{"Title": "x", "_id": "1"}]}"#, "test").unwrap();
        assert_eq!(parsed.recommendations.len(), 1);
        assert_eq!(parsed.recommendations[0].id.as_deref(), Some("1"));

        let parsed: RecommendResponse = decode(r#"{}"#, "test").unwrap();
        assert!(parsed.recommendations.is_empty());
    }

    #[test]
    fn test_decode_failure_is_deserialization_error() {
        let err = decode::<Vec<Article>>(r#"{"unexpected": true}"#, "cached recommendations")
            .unwrap_err();
        match err {
            Error::Deserialization { context, .. } => assert_eq!(context, "cached recommendations"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_request_body_shape() {
        let topics = vec!["Tech".to_string()];
        let body = serde_json::to_value(RecommendRequest {
            topics: &topics,
            user_id: "u1",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"topics": ["Tech"], "user_id": "u1"}));
    }

    #[test]
    fn test_clients_require_urls() {
        let config = AppConfig::default();
        assert!(matches!(RecommendationClient::new(&config), Err(Error::Config(_))));
        assert!(matches!(SearchClient::new(&config), Err(Error::Config(_))));
    }
}
