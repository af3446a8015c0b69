use super::Database;
use crate::Result;

/// Repository for the category lookup table
pub struct CategoryRepository<'a> {
    db: &'a Database,
}

impl<'a> CategoryRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert `names` when the table is empty. Returns how many were inserted.
    pub async fn seed_if_empty(&self, names: &[&str]) -> Result<usize> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM categories")
            .fetch_one(self.db.pool())
            .await?;
        if count.0 > 0 {
            return Ok(0);
        }

        let mut tx = self.db.pool().begin().await?;
        for name in names {
            sqlx::query("INSERT OR IGNORE INTO categories (name) VALUES (?)")
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!("Seeded {} categories", names.len());
        Ok(names.len())
    }

    /// Category names in insertion order
    pub async fn list(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM categories ORDER BY id ASC")
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
