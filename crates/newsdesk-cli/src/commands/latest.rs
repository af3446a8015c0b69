use anyhow::Result;

use newsdesk_core::{ipc::DaemonClient, AppConfig};

use super::news::print_articles;

pub async fn run(
    config: &AppConfig,
    user_id: &str,
    page: i64,
    page_size: Option<usize>,
) -> Result<()> {
    let client = DaemonClient::new(config.socket_path());
    let articles = client
        .latest_recommendations(user_id, page, page_size)
        .await?;

    if articles.is_empty() {
        println!("No recommendations for {} yet.", user_id);
        return Ok(());
    }

    println!("Recommendations for {} ({}):\n", user_id, articles.len());
    print_articles(&articles);
    Ok(())
}
