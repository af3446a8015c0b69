use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

use super::models::{DeletionOutcome, DeletionRequest, User};
use super::Database;
use crate::{Error, Result};

/// Read/write access to user accounts as needed by the background jobs
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn all_users(&self) -> Result<Vec<User>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    /// Preferred category names, in the order the user picked them
    async fn preferred_categories(&self, user_id: &str) -> Result<Vec<String>>;

    async fn update(&self, user: &User) -> Result<()>;

    /// Remove the account. Returns false when it did not exist.
    async fn delete(&self, user_id: &str) -> Result<bool>;

    /// Users flagged for deletion with a known request time
    async fn pending_deletions(&self) -> Result<Vec<User>>;
}

/// Repository for user accounts
pub struct UserRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    user_name: String,
    email: Option<String>,
    is_pending_deletion: i32,
    deletion_requested_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            user_name: row.user_name,
            email: row.email,
            deletion: DeletionRequest::from_columns(
                row.is_pending_deletion != 0,
                row.deletion_requested_at,
            ),
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str =
    "id, user_name, email, is_pending_deletion, deletion_requested_at, created_at";

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new account
    pub async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, user_name, email, is_pending_deletion, deletion_requested_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.user_name)
        .bind(&user.email)
        .bind(user.deletion.is_pending() as i32)
        .bind(user.deletion.requested_at())
        .bind(user.created_at)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Replace the user's preferred categories
    pub async fn set_preferred_categories(&self, user_id: &str, categories: &[String]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM user_categories WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for (position, category) in categories.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO user_categories (user_id, category, position) VALUES (?, ?, ?)",
            )
            .bind(user_id)
            .bind(category)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Flag the account for deletion as of `now`
    pub async fn request_deletion(&self, user_id: &str, now: DateTime<Utc>) -> Result<User> {
        let mut user = self
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        user.deletion = DeletionRequest::pending(now);
        self.update(&user).await?;

        tracing::info!(user_id, "Account deletion requested");
        Ok(user)
    }

    /// Settle a pending deletion when the user returns.
    ///
    /// Inside the grace window the request is withdrawn. Once the window has
    /// passed the account is treated as gone and left for the sweep.
    pub async fn resolve_pending_deletion(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<DeletionOutcome> {
        let mut user = self
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        if !user.deletion.is_pending() || user.deletion.requested_at().is_none() {
            return Ok(DeletionOutcome::NotPending);
        }

        if user.deletion.is_expired(now, grace) {
            tracing::warn!(user_id, "Account pending deletion period expired");
            return Ok(DeletionOutcome::Expired);
        }

        user.deletion = DeletionRequest::none();
        self.update(&user).await?;

        tracing::info!(user_id, "Deletion request cancelled");
        Ok(DeletionOutcome::Cancelled)
    }
}

#[async_trait]
impl<'a> UserDirectory for UserRepository<'a> {
    async fn all_users(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users ORDER BY created_at ASC",
            USER_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(User::from))
    }

    async fn preferred_categories(&self, user_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT category FROM user_categories WHERE user_id = ? ORDER BY position ASC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET user_name = ?, email = ?, is_pending_deletion = ?, deletion_requested_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.user_name)
        .bind(&user.email)
        .bind(user.deletion.is_pending() as i32)
        .bind(user.deletion.requested_at())
        .bind(&user.id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::UserNotFound(user.id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn pending_deletions(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE is_pending_deletion = 1 AND deletion_requested_at IS NOT NULL",
            USER_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(db: &Database, name: &str) -> User {
        let user = User::new(name, Some(format!("{}@example.com", name)));
        UserRepository::new(db).create(&user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let db = Database::new_in_memory().await.unwrap();
        let user = seeded(&db, "ada").await;
        let repo = UserRepository::new(&db);

        let found = repo.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(found.user_name, "ada");
        assert_eq!(found.email.as_deref(), Some("ada@example.com"));
        assert!(!found.deletion.is_pending());
        assert!(repo.find_by_id("nobody").await.unwrap().is_none());
        assert_eq!(repo.all_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preferred_categories_keep_order() {
        let db = Database::new_in_memory().await.unwrap();
        let user = seeded(&db, "ada").await;
        let repo = UserRepository::new(&db);

        let picked = vec!["Tech".to_string(), "Health".to_string(), "Sports".to_string()];
        repo.set_preferred_categories(&user.id, &picked).await.unwrap();
        assert_eq!(repo.preferred_categories(&user.id).await.unwrap(), picked);

        repo.set_preferred_categories(&user.id, &[]).await.unwrap();
        assert!(repo.preferred_categories(&user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_and_cancel_deletion() {
        let db = Database::new_in_memory().await.unwrap();
        let user = seeded(&db, "ada").await;
        let repo = UserRepository::new(&db);
        let now = Utc::now();

        repo.request_deletion(&user.id, now).await.unwrap();
        let pending = repo.pending_deletions().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].deletion.requested_at(), Some(now));

        let outcome = repo
            .resolve_pending_deletion(&user.id, now + Duration::days(3), Duration::days(14))
            .await
            .unwrap();
        assert_eq!(outcome, DeletionOutcome::Cancelled);
        assert!(repo.pending_deletions().await.unwrap().is_empty());

        let outcome = repo
            .resolve_pending_deletion(&user.id, now, Duration::days(14))
            .await
            .unwrap();
        assert_eq!(outcome, DeletionOutcome::NotPending);
    }

    #[tokio::test]
    async fn test_expired_deletion_is_not_cancelled() {
        let db = Database::new_in_memory().await.unwrap();
        let user = seeded(&db, "ada").await;
        let repo = UserRepository::new(&db);
        let now = Utc::now();

        repo.request_deletion(&user.id, now).await.unwrap();
        let outcome = repo
            .resolve_pending_deletion(&user.id, now + Duration::days(15), Duration::days(14))
            .await
            .unwrap();
        assert_eq!(outcome, DeletionOutcome::Expired);
        assert_eq!(repo.pending_deletions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_errors() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = UserRepository::new(&db);

        assert!(matches!(
            repo.request_deletion("ghost", Utc::now()).await,
            Err(Error::UserNotFound(_))
        ));
        assert!(!repo.delete("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_cascades_categories() {
        let db = Database::new_in_memory().await.unwrap();
        let user = seeded(&db, "ada").await;
        let repo = UserRepository::new(&db);
        repo.set_preferred_categories(&user.id, &["Tech".to_string()])
            .await
            .unwrap();

        assert!(repo.delete(&user.id).await.unwrap());
        assert!(repo.find_by_id(&user.id).await.unwrap().is_none());
        assert!(repo.preferred_categories(&user.id).await.unwrap().is_empty());
    }
}
