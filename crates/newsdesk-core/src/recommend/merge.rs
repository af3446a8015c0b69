use std::collections::HashSet;
use std::sync::Arc;

use super::client::RecommendationSource;
use crate::news::{Article, NewsSource};
use crate::{Error, Result};

/// Keep the first article of every title
pub fn dedup_by_title(articles: Vec<Article>) -> Vec<Article> {
    let mut seen = HashSet::new();
    articles
        .into_iter()
        .filter(|a| seen.insert(a.title.clone()))
        .collect()
}

/// Page window over a recommendation list.
///
/// Without a page size, or with a page number below 1, the list comes back
/// whole and untouched. A paged window is de-duplicated by title after
/// slicing, so it can hold fewer than `page_size` articles. A window that
/// starts past any addressable offset is empty.
pub fn paginate_latest(
    articles: Vec<Article>,
    page_number: i64,
    page_size: Option<usize>,
) -> Vec<Article> {
    let page_size = match page_size {
        Some(size) if page_number > 0 => size,
        _ => return articles,
    };

    let Some(offset) = usize::try_from(page_number - 1)
        .ok()
        .and_then(|page| page.checked_mul(page_size))
    else {
        return Vec::new();
    };

    let window = articles
        .into_iter()
        .skip(offset)
        .take(page_size)
        .collect();
    dedup_by_title(window)
}

/// Joins a user's recommendation list with direct provider lookups
pub struct RecommendationMerge {
    recommendations: Arc<dyn RecommendationSource>,
    news: Arc<dyn NewsSource>,
}

impl RecommendationMerge {
    pub fn new(recommendations: Arc<dyn RecommendationSource>, news: Arc<dyn NewsSource>) -> Self {
        Self {
            recommendations,
            news,
        }
    }

    /// Find an article by id, preferring the user's recommendation list and
    /// falling back to the provider. Lookup failures are logged, never raised.
    pub async fn find_article(&self, user_id: &str, id: &str) -> Option<Article> {
        match self.recommendations.latest(user_id).await {
            Ok(list) => {
                if let Some(article) = list.into_iter().find(|a| a.id.as_deref() == Some(id)) {
                    return Some(article.normalize());
                }
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Recommendations unavailable, using provider lookup");
            }
        }

        match self.news.fetch_by_id(id).await {
            Ok(Some(article)) => Some(article.normalize()),
            Ok(None) => {
                tracing::warn!("Article with id {} not found", id);
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Error fetching article {} from provider", id);
                None
            }
        }
    }

    /// The user's latest recommendations, optionally paged
    pub async fn latest_page(
        &self,
        user_id: &str,
        page_number: i64,
        page_size: Option<usize>,
    ) -> Result<Vec<Article>> {
        let all = self.recommendations.latest(user_id).await?;
        Ok(paginate_latest(all, page_number, page_size))
    }

    /// Ask the service for fresh recommendations on the given topics
    pub async fn recommend(&self, topics: &[String], user_id: &str) -> Result<Vec<Article>> {
        if topics.is_empty() {
            return Err(Error::InvalidInput("At least one topic is required".into()));
        }
        self.recommendations.recommend(topics, user_id).await
    }
}
