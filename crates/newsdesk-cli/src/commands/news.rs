use anyhow::Result;

use newsdesk_core::{
    ipc::DaemonClient,
    news::{Article, EntryState},
    AppConfig,
};

pub(crate) fn print_articles(articles: &[Article]) {
    for article in articles {
        println!(
            "  [{}] {}",
            article.topic.as_deref().unwrap_or("?"),
            article.title.as_deref().unwrap_or("(no title)")
        );
        if let Some(author) = &article.author {
            println!("    by {}", author);
        }
        if let Some(link) = article.link.as_ref().or(article.domain_url.as_ref()) {
            println!("    {}", link);
        }
    }
}

pub async fn run(
    config: &AppConfig,
    category: &str,
    language: Option<&str>,
    country: Option<&str>,
    refresh: bool,
) -> Result<()> {
    let client = DaemonClient::new(config.socket_path());
    if refresh {
        let removed = client.invalidate(category).await?;
        println!("Dropped {} cached entries for '{}'.", removed, category);
    }

    let news = client.news_by_category(category, language, country).await?;
    let articles = news.articles;

    if articles.is_empty() {
        if news.cache_state == EntryState::Failed {
            println!(
                "News provider unavailable for '{}', the daemon retries after the failure TTL.",
                category
            );
        } else {
            println!("No articles for '{}' right now.", category);
        }
        return Ok(());
    }

    println!("{} article(s) for '{}':\n", articles.len(), category);
    print_articles(&articles);
    Ok(())
}
