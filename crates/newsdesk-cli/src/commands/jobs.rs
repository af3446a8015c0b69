use anyhow::Result;

use newsdesk_core::{
    scheduler::{run_deletion_sweep_once, run_notifications_once},
    storage::Database,
    AppConfig,
};

pub async fn notify(db: &Database, config: &AppConfig) -> Result<()> {
    println!("Sending notifications...");
    let tally = run_notifications_once(db, config).await?;
    println!(
        "Done: {} sent, {} skipped, {} failed",
        tally.sent, tally.skipped, tally.failed
    );
    Ok(())
}

pub async fn sweep(db: &Database, config: &AppConfig) -> Result<()> {
    println!(
        "Deleting accounts pending for {} day(s) or more...",
        config.scheduler.deletion_grace_days
    );
    let tally = run_deletion_sweep_once(db, config).await?;
    println!("Done: {} deleted, {} failed", tally.deleted, tally.failed);
    Ok(())
}
