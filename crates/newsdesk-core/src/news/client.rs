use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use url::Url;

use super::models::{Article, NewsApiResponse};
use crate::config::AppConfig;
use crate::{Error, Result};

const API_TOKEN_HEADER: &str = "x-api-token";
const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 500;
const PAYLOAD_LOG_LIMIT: usize = 2048;

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_COUNTRY: &str = "us";

/// Parameters of a multi-category search against the provider
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub categories: Vec<String>,
    pub page: u32,
    pub page_size: u32,
    pub language: String,
    pub country: String,
}

impl SearchQuery {
    pub fn new(categories: Vec<String>) -> Self {
        Self {
            categories,
            page: 1,
            page_size: 100,
            language: DEFAULT_LANGUAGE.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
        }
    }
}

/// Source of articles from the external news provider
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Fetch the current article window for one category
    async fn fetch_category(&self, category: &str, language: &str, country: &str)
        -> Result<Vec<Article>>;

    /// Search several categories at once with explicit paging
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Article>>;

    /// Look a single article up by its provider id
    async fn fetch_by_id(&self, id: &str) -> Result<Option<Article>>;
}

/// HTTP client for the NewsCatcher search API
pub struct NewsCatcherClient {
    client: Client,
    base_url: String,
    api_key: String,
    window_days: i64,
    extra_countries: Vec<String>,
    page_size: u32,
}

impl NewsCatcherClient {
    /// Create a client from configuration. Missing credentials are a startup error.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let news = &config.newscatcher;
        let api_key = news
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("newscatcher.api_key is not configured".into()))?;
        let base_url = news
            .base_url
            .clone()
            .ok_or_else(|| Error::Config("newscatcher.base_url is not configured".into()))?;
        Url::parse(&base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(news.request_timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            window_days: news.search_window_days,
            extra_countries: news.extra_countries.clone(),
            page_size: news.page_size,
        })
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let token = HeaderValue::from_str(&self.api_key)
            .map_err(|e| Error::Config(format!("Invalid API token: {}", e)))?;
        headers.insert(API_TOKEN_HEADER, token);
        Ok(headers)
    }

    fn countries(&self, country: &str) -> String {
        let mut all = vec![country.trim().to_uppercase()];
        for extra in &self.extra_countries {
            let extra = extra.to_uppercase();
            if !all.contains(&extra) {
                all.push(extra);
            }
        }
        all.join(",")
    }

    /// Build the search URL for a query string over the configured window ending `today`
    pub fn search_url(
        &self,
        q: &str,
        today: NaiveDate,
        language: &str,
        country: &str,
        page_size: u32,
        page: u32,
    ) -> Result<Url> {
        let (from, to) = date_range(today, self.window_days);
        let url = Url::parse_with_params(
            &self.base_url,
            &[
                ("q", q.to_string()),
                ("from_", from),
                ("to_", to),
                ("lang", language.to_string()),
                ("countries", self.countries(country)),
                ("page_size", page_size.to_string()),
                ("page", page.to_string()),
            ],
        )?;
        Ok(url)
    }

    /// Build the lookup-by-id URL (`{base_url}_by_link?ids=<id>`)
    pub fn by_id_url(&self, id: &str) -> Result<Url> {
        let base = format!("{}_by_link", self.base_url.trim_end_matches('/'));
        Ok(Url::parse_with_params(&base, &[("ids", id)])?)
    }

    /// GET with retry and exponential backoff on rate limiting
    async fn get_with_retry(&self, url: &Url) -> Result<String> {
        let mut last_error = None;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        for attempt in 0..MAX_RETRIES {
            tracing::debug!("News request attempt {} for {}", attempt + 1, url.path());

            match self
                .client
                .get(url.clone())
                .headers(self.build_headers()?)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE
                    {
                        tracing::warn!(
                            "News provider returned {}, retrying after {}ms...",
                            status,
                            delay_ms
                        );
                        last_error = Some(Error::UpstreamUnavailable(format!("HTTP {}", status)));
                    } else if !status.is_success() {
                        return Err(Error::UpstreamUnavailable(format!(
                            "HTTP {} from news provider",
                            status
                        )));
                    } else {
                        return Ok(response.text().await?);
                    }
                }
                Err(e) => {
                    tracing::warn!("News request failed (attempt {}): {}", attempt + 1, e);
                    last_error = Some(Error::Http(e));
                }
            }

            if attempt < MAX_RETRIES - 1 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::UpstreamUnavailable(format!("No response after {} attempts", MAX_RETRIES))
        }))
    }
}

#[async_trait]
impl NewsSource for NewsCatcherClient {
    async fn fetch_category(
        &self,
        category: &str,
        language: &str,
        country: &str,
    ) -> Result<Vec<Article>> {
        let url = self.search_url(
            category.trim(),
            Utc::now().date_naive(),
            language,
            country,
            self.page_size,
            1,
        )?;
        let body = self.get_with_retry(&url).await?;
        let articles = parse_news_response(&body)?.into_articles();
        tracing::info!(category, count = articles.len(), "Fetched category from news provider");
        Ok(articles)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Article>> {
        let q = query.categories.join(" OR ");
        let url = self.search_url(
            &q,
            Utc::now().date_naive(),
            &query.language,
            &query.country,
            query.page_size,
            query.page,
        )?;
        let body = self.get_with_retry(&url).await?;
        let articles = parse_news_response(&body)?.into_articles();
        tracing::info!(count = articles.len(), "Returning searched articles");
        Ok(articles)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<Article>> {
        let url = self.by_id_url(id)?;
        let body = self.get_with_retry(&url).await?;
        let article = parse_news_response(&body)?.into_articles().into_iter().next();
        if article.is_none() {
            tracing::warn!("No article found for ID: {}", id);
        }
        Ok(article)
    }
}

/// `(from, to)` in `yyyy-mm-dd`, covering `window_days` back from `today`
pub fn date_range(today: NaiveDate, window_days: i64) -> (String, String) {
    let from = today - chrono::Duration::days(window_days);
    (
        from.format("%Y-%m-%d").to_string(),
        today.format("%Y-%m-%d").to_string(),
    )
}

/// Parse a provider payload, logging the raw body when it does not match
pub fn parse_news_response(body: &str) -> Result<NewsApiResponse> {
    serde_json::from_str(body).map_err(|e| {
        tracing::error!(
            error = %e,
            payload = %truncate_payload(body),
            "Failed to deserialize news provider response"
        );
        Error::Deserialization {
            context: "news provider response".to_string(),
            message: e.to_string(),
        }
    })
}

pub(crate) fn truncate_payload(body: &str) -> &str {
    match body.char_indices().nth(PAYLOAD_LOG_LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> NewsCatcherClient {
        let mut config = AppConfig::default();
        config.newscatcher.api_key = Some("token".into());
        config.newscatcher.base_url = Some("https://news.example/api/search".into());
        NewsCatcherClient::new(&config).unwrap()
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = AppConfig::default();
        let err = NewsCatcherClient::new(&config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_date_range_window() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        let (from, to) = date_range(today, 10);
        assert_eq!(from, "2025-02-23");
        assert_eq!(to, "2025-03-05");
    }

    #[test]
    fn test_search_url_parameters() {
        let client = test_client();
        let today = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        let url = client
            .search_url("Tech OR Sports", today, "en", "us", 100, 2)
            .unwrap();

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("q".into(), "Tech OR Sports".into())));
        assert!(pairs.contains(&("from_".into(), "2025-02-23".into())));
        assert!(pairs.contains(&("to_".into(), "2025-03-05".into())));
        assert!(pairs.contains(&("lang".into(), "en".into())));
        assert!(pairs.contains(&("countries".into(), "US,EG,CA,FR,GB,DE".into())));
        assert!(pairs.contains(&("page_size".into(), "100".into())));
        assert!(pairs.contains(&("page".into(), "2".into())));
    }

    #[test]
    fn test_countries_are_not_duplicated() {
        let client = test_client();
        assert_eq!(client.countries("gb"), "GB,EG,CA,FR,DE");
    }

    #[test]
    fn test_by_id_url() {
        let client = test_client();
        let url = client.by_id_url("abc123").unwrap();
        assert_eq!(url.as_str(), "https://news.example/api/search_by_link?ids=abc123");
    }

    #[test]
    fn test_parse_bad_payload_is_deserialization_error() {
        let err = parse_news_response("<html>gateway timeout</html>").unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
        assert!(err.is_upstream());
    }

    #[test]
    fn test_truncate_payload() {
        let body = "x".repeat(PAYLOAD_LOG_LIMIT + 10);
        assert_eq!(truncate_payload(&body).len(), PAYLOAD_LOG_LIMIT);
        assert_eq!(truncate_payload("short"), "short");
    }
}
