//! Balanced, paginated reads over the seeded article corpus.
//!
//! This path is independent of the live category cache: the corpus is a
//! JSON file loaded from disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::models::Article;
use crate::{Error, Result};

/// Upper bound of articles kept per topic before paging
pub const MAX_PER_TOPIC: usize = 10;

/// Keep at most [`MAX_PER_TOPIC`] articles per topic.
///
/// Topics are emitted as contiguous groups in order of first appearance,
/// each group keeping the corpus order of its articles.
pub fn balance_by_topic(articles: Vec<Article>) -> Vec<Article> {
    let mut groups: Vec<Vec<Article>> = Vec::new();
    let mut index: HashMap<Option<String>, usize> = HashMap::new();

    for article in articles {
        let slot = *index.entry(article.topic.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        if groups[slot].len() < MAX_PER_TOPIC {
            groups[slot].push(article);
        }
    }

    groups.into_iter().flatten().collect()
}

/// Balance, then page, then filter the page to `categories`.
///
/// Without a page size, or with page 0, the whole balanced set is returned
/// unfiltered. Filtering happens after slicing, so a page can come back
/// short or empty even when matching articles exist on later pages.
pub fn fetch_and_balance(
    corpus: &[Article],
    categories: &[String],
    page_number: u32,
    page_size: Option<u32>,
) -> Vec<Article> {
    let balanced = balance_by_topic(corpus.to_vec());

    let page_size = match page_size {
        Some(size) if page_number > 0 => size as usize,
        _ => return balanced,
    };

    balanced
        .into_iter()
        .skip((page_number as usize - 1).saturating_mul(page_size))
        .take(page_size)
        .filter(|a| a.topic_in(categories))
        .collect()
}

/// Full balanced set restricted to the given topic names
pub fn articles_in_categories(corpus: &[Article], names: &[String]) -> Vec<Article> {
    balance_by_topic(corpus.to_vec())
        .into_iter()
        .filter(|a| a.topic_in(names))
        .collect()
}

/// The seeded corpus on disk
#[derive(Debug, Clone)]
pub struct NewsCorpus {
    path: PathBuf,
}

impl NewsCorpus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and normalize every article in the corpus file
    pub async fn load(&self) -> Result<Vec<Article>> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        let articles: Option<Vec<Article>> =
            serde_json::from_str(&json).map_err(|e| Error::Deserialization {
                context: format!("corpus {}", self.path.display()),
                message: e.to_string(),
            })?;
        Ok(articles
            .unwrap_or_default()
            .into_iter()
            .map(Article::normalize)
            .collect())
    }

    /// Balanced page of the corpus. Read failures are logged and yield nothing.
    pub async fn all_news(
        &self,
        categories: &[String],
        page_number: u32,
        page_size: Option<u32>,
    ) -> Vec<Article> {
        match self.load().await {
            Ok(corpus) => {
                let articles = fetch_and_balance(&corpus, categories, page_number, page_size);
                tracing::info!("Number of articles fetched from corpus: {}", articles.len());
                articles
            }
            Err(e) => {
                tracing::error!("Error reading corpus {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Balanced corpus articles belonging to any of `names`
    pub async fn articles_by_categories(&self, names: &[String]) -> Vec<Article> {
        let articles = self.all_news(names, 0, None).await;
        articles.into_iter().filter(|a| a.topic_in(names)).collect()
    }
}
