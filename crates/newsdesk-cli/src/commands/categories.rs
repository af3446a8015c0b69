use anyhow::Result;

use newsdesk_core::{
    news::CATEGORIES,
    storage::{CategoryRepository, Database},
};

pub async fn run(db: &Database) -> Result<()> {
    let repo = CategoryRepository::new(db);
    repo.seed_if_empty(CATEGORIES).await?;

    let categories = repo.list().await?;
    println!("Categories ({}):\n", categories.len());
    for name in &categories {
        println!("  {}", name);
    }
    Ok(())
}
