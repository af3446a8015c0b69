use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::models::Notification;
use super::Database;
use crate::Result;

/// Persistence for sent notifications
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn save(&self, notification: &Notification) -> Result<()>;
}

/// Repository for notification history
pub struct NotificationRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct NotificationRow {
    id: String,
    user_id: String,
    article_id: String,
    title: String,
    url: String,
    topic: String,
    excerpt: String,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: Uuid::parse_str(&row.id).unwrap_or_default(),
            user_id: row.user_id,
            article_id: row.article_id,
            title: row.title,
            url: row.url,
            topic: row.topic,
            excerpt: row.excerpt,
            created_at: row.created_at,
        }
    }
}

impl<'a> NotificationRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Notifications of a user, newest first
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Notification>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, article_id, title, url, topic, excerpt, created_at
            FROM notifications
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(Notification::from).collect())
    }
}

#[async_trait]
impl<'a> NotificationStore for NotificationRepository<'a> {
    async fn save(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, article_id, title, url, topic, excerpt, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(notification.id.to_string())
        .bind(&notification.user_id)
        .bind(&notification.article_id)
        .bind(&notification.title)
        .bind(&notification.url)
        .bind(&notification.topic)
        .bind(&notification.excerpt)
        .bind(notification.created_at)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::news::Article;
    use crate::storage::{User, UserRepository};

    #[tokio::test]
    async fn test_save_and_list_newest_first() {
        let db = Database::new_in_memory().await.unwrap();
        let user = User::new("ada", None);
        UserRepository::new(&db).create(&user).await.unwrap();
        let repo = NotificationRepository::new(&db);

        let article = Article {
            id: Some("a1".into()),
            title: Some("First".into()),
            ..Default::default()
        };
        let earlier = Utc::now() - Duration::minutes(5);
        let first = Notification::for_article(&user.id, &article, earlier);
        let second = Notification::for_article(&user.id, &article, Utc::now());
        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();

        let listed = repo.list_for_user(&user.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].title, "First");
        assert!(repo.list_for_user("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_requires_existing_user() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = NotificationRepository::new(&db);
        let n = Notification::for_article("ghost", &Article::default(), Utc::now());
        assert!(repo.save(&n).await.is_err());
    }
}
