use serde::{Deserialize, Deserializer, Serialize};

pub const UNKNOWN_AUTHOR: &str = "Unknown author";
pub const UNKNOWN_AUTHORS: &str = "Unknown authors";
pub const UNKNOWN_ACCOUNT: &str = "Unknown account";

/// A news article as returned by the provider or the recommender.
///
/// Field names arrive in several spellings depending on which service
/// produced the payload. Decoding matches them case-insensitively and also
/// accepts `_id`, `publishedAt`/`published_at` and `excerpt`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Article {
    pub id: Option<String>,
    pub title: Option<String>,
    pub topic: Option<String>,
    pub country: Option<String>,
    pub author: Option<String>,
    pub authors: Vec<String>,
    #[serde(rename = "published_date")]
    pub published_at: Option<String>,
    pub link: Option<String>,
    pub content: Option<String>,
    pub description: Option<String>,
    pub media: Option<String>,
    pub twitter_account: Option<String>,
    pub domain_url: Option<String>,
}

/// Wire shape of [`Article`] once keys are folded to their canonical names
#[derive(Default, Deserialize)]
#[serde(default)]
struct ArticleFields {
    id: Option<String>,
    title: Option<String>,
    topic: Option<String>,
    country: Option<String>,
    author: Option<String>,
    #[serde(deserialize_with = "authors_list")]
    authors: Vec<String>,
    published_date: Option<String>,
    link: Option<String>,
    content: Option<String>,
    description: Option<String>,
    media: Option<String>,
    twitter_account: Option<String>,
    domain_url: Option<String>,
}

impl From<ArticleFields> for Article {
    fn from(f: ArticleFields) -> Self {
        Self {
            id: f.id,
            title: f.title,
            topic: f.topic,
            country: f.country,
            author: f.author,
            authors: f.authors,
            published_at: f.published_date,
            link: f.link,
            content: f.content,
            description: f.description,
            media: f.media,
            twitter_account: f.twitter_account,
            domain_url: f.domain_url,
        }
    }
}

fn canonical_field(key: &str) -> String {
    let lower = key.to_lowercase();
    match lower.as_str() {
        "_id" => "id".to_string(),
        "publishedat" | "published_at" => "published_date".to_string(),
        "excerpt" => "description".to_string(),
        _ => lower,
    }
}

impl<'de> Deserialize<'de> for Article {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;

        // A null spelling never hides a non-null one
        let mut folded = serde_json::Map::new();
        for (key, value) in raw {
            let key = canonical_field(&key);
            if folded.get(&key).map_or(true, serde_json::Value::is_null) {
                folded.insert(key, value);
            }
        }

        serde_json::from_value::<ArticleFields>(serde_json::Value::Object(folded))
            .map(Article::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Accept `null`, a single string or a list for the authors field.
fn authors_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Authors {
        One(String),
        Many(Vec<Option<String>>),
    }

    let raw: Option<Authors> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None => Vec::new(),
        Some(Authors::One(s)) => s
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
        Some(Authors::Many(list)) => list
            .into_iter()
            .flatten()
            .filter(|a| !a.trim().is_empty())
            .collect(),
    })
}

impl Article {
    /// Fill author fields with sentinels so downstream code never sees them missing.
    pub fn normalize(mut self) -> Self {
        if self.author.as_deref().map_or(true, |a| a.trim().is_empty()) {
            self.author = Some(UNKNOWN_AUTHOR.to_string());
        }
        if self.twitter_account.is_none() {
            self.twitter_account = Some(UNKNOWN_ACCOUNT.to_string());
        }
        if self.authors.is_empty() {
            self.authors.push(UNKNOWN_AUTHORS.to_string());
        }
        self
    }

    /// Case-insensitive containment test against the article topic
    pub fn topic_contains(&self, category: &str) -> bool {
        let needle = category.trim().to_lowercase();
        self.topic
            .as_deref()
            .map(|t| t.to_lowercase().contains(&needle))
            .unwrap_or(false)
    }

    /// Exact topic membership, as used by corpus filtering
    pub fn topic_in(&self, categories: &[String]) -> bool {
        self.topic
            .as_deref()
            .map(|t| categories.iter().any(|c| c == t))
            .unwrap_or(false)
    }
}

/// Search response envelope of the news provider
#[derive(Debug, Default, Deserialize)]
pub struct NewsApiResponse {
    #[serde(default, alias = "Articles")]
    pub articles: Option<Vec<Article>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_hits: Option<u64>,
}

impl NewsApiResponse {
    /// Normalized articles, empty when the provider returned none
    pub fn into_articles(self) -> Vec<Article> {
        self.articles
            .unwrap_or_default()
            .into_iter()
            .map(Article::normalize)
            .collect()
    }
}

/// The fixed set of categories offered to users
pub const CATEGORIES: &[&str] = &[
    "Business",
    "Economics",
    "Entertainment",
    "Finance",
    "Health",
    "Politics",
    "Science",
    "Sports",
    "Tech",
    "Crime",
    "Lifestyle",
    "Automotive",
    "Travel",
    "Weather",
    "General",
];
