use anyhow::{bail, Result};

use newsdesk_core::{ipc::DaemonClient, AppConfig};

use super::news::print_articles;

/// Search the provider across several categories, bypassing the cache
pub async fn run(
    config: &AppConfig,
    categories: &[String],
    page: u32,
    page_size: u32,
    language: Option<&str>,
    country: Option<&str>,
) -> Result<()> {
    if categories.is_empty() {
        bail!("Give at least one category to search");
    }

    let client = DaemonClient::new(config.socket_path());
    let articles = client
        .search_news(categories, page, page_size, language, country)
        .await?;

    if articles.is_empty() {
        println!("Nothing found for {}.", categories.join(", "));
        return Ok(());
    }

    println!("{} article(s) on page {}:\n", articles.len(), page);
    print_articles(&articles);
    Ok(())
}
