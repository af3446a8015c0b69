use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::news::Article;

/// Soft-deletion state of an account.
///
/// A timestamp is only ever carried alongside the pending flag, including
/// when the value is deserialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DeletionColumns")]
pub struct DeletionRequest {
    is_pending: bool,
    requested_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct DeletionColumns {
    #[serde(default)]
    is_pending: bool,
    #[serde(default)]
    requested_at: Option<DateTime<Utc>>,
}

impl From<DeletionColumns> for DeletionRequest {
    fn from(columns: DeletionColumns) -> Self {
        Self::from_columns(columns.is_pending, columns.requested_at)
    }
}

impl DeletionRequest {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn pending(at: DateTime<Utc>) -> Self {
        Self {
            is_pending: true,
            requested_at: Some(at),
        }
    }

    /// Rebuild from stored columns, dropping a timestamp without the flag
    pub(crate) fn from_columns(is_pending: bool, requested_at: Option<DateTime<Utc>>) -> Self {
        Self {
            is_pending,
            requested_at: requested_at.filter(|_| is_pending),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.is_pending
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    /// Pending with a known timestamp and at least `grace` old at `now`
    pub fn is_expired(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match (self.is_pending, self.requested_at) {
            (true, Some(at)) => now - at >= grace,
            _ => false,
        }
    }
}

/// Result of checking a pending deletion when the user comes back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionOutcome {
    /// No deletion was requested
    NotPending,
    /// The request was inside the grace window and has been withdrawn
    Cancelled,
    /// The grace window has passed; the account counts as deleted
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub user_name: String,
    pub email: Option<String>,
    pub deletion: DeletionRequest,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_name: user_name.into(),
            email,
            deletion: DeletionRequest::none(),
            created_at: Utc::now(),
        }
    }
}

pub const NO_TITLE: &str = "No title available";
pub const NO_URL: &str = "No url available";
pub const NO_TOPIC: &str = "No topic available";
pub const NO_EXCERPT: &str = "No excerpt available";
pub const NO_ARTICLE_ID: &str = "No Id available";

/// A record that a user was told about an article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub article_id: String,
    pub title: String,
    pub url: String,
    pub topic: String,
    pub excerpt: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Build a notification for `article`, filling placeholders for missing fields
    pub fn for_article(user_id: &str, article: &Article, now: DateTime<Utc>) -> Self {
        fn or_placeholder(value: &Option<String>, placeholder: &str) -> String {
            value.clone().unwrap_or_else(|| placeholder.to_string())
        }

        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            article_id: or_placeholder(&article.id, NO_ARTICLE_ID),
            title: or_placeholder(&article.title, NO_TITLE),
            url: or_placeholder(&article.domain_url, NO_URL),
            topic: or_placeholder(&article.topic, NO_TOPIC),
            excerpt: or_placeholder(&article.description, NO_EXCERPT),
            created_at: now,
        }
    }
}
