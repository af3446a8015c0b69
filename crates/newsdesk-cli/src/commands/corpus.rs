use anyhow::Result;

use newsdesk_core::{news::NewsCorpus, AppConfig};

use super::news::print_articles;

pub async fn run(
    config: &AppConfig,
    categories: &[String],
    page: u32,
    page_size: Option<u32>,
) -> Result<()> {
    let corpus = NewsCorpus::new(config.corpus_path());
    let articles = corpus.all_news(categories, page, page_size).await;

    if articles.is_empty() {
        println!("Nothing on this page of {}.", corpus.path().display());
        return Ok(());
    }

    println!("{} article(s):\n", articles.len());
    print_articles(&articles);
    Ok(())
}
