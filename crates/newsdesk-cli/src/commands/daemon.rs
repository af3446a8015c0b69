use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use newsdesk_core::{
    ipc::{is_daemon_running as socket_reachable, DaemonClient, DaemonServer, DaemonState},
    scheduler::{
        deletion_sweep_job_from_config, notification_job_from_config, SchedulerEvent,
        SchedulerService,
    },
    storage::Database,
    AppConfig,
};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("newsdesk")
        .join("daemon.pid")
}

/// Check if daemon is running
fn is_daemon_running() -> Option<u32> {
    let pid_path = pid_file_path();
    if !pid_path.exists() {
        return None;
    }

    let mut file = fs::File::open(&pid_path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    let pid: u32 = contents.trim().parse().ok()?;

    let output = std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .output()
        .ok()?;
    if output.status.success() {
        return Some(pid);
    }

    // Process not running, clean up stale PID file
    let _ = fs::remove_file(&pid_path);
    None
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(&pid_path)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

async fn wait_for_signal() {
    let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            debug!("SIGTERM handler unavailable: {}", e);
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

/// Start the daemon
pub async fn start(db: Database, config: Arc<AppConfig>) -> Result<()> {
    if let Some(pid) = is_daemon_running() {
        println!("Daemon is already running (PID: {})", pid);
        return Ok(());
    }

    config
        .validate()
        .context("Fill in the missing settings in the config file")?;

    println!("Starting newsdesk daemon...");
    write_pid_file()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = signal_tx.send(true);
    });

    let state = DaemonState::from_config(db.clone(), &config)?;

    // Jobs share the daemon's cache so notification fallbacks warm it too
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let scheduler = SchedulerService::new()
        .with_job(Arc::new(notification_job_from_config(
            &db,
            &config,
            state.cache.clone(),
        )?))
        .with_job(Arc::new(deletion_sweep_job_from_config(&db, &config)))
        .with_event_sender(event_tx)
        .start(shutdown_rx.clone());

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SchedulerEvent::NotificationsSent { sent, skipped, failed } => {
                    info!(sent, skipped, failed, "Notification batch finished");
                }
                SchedulerEvent::AccountsDeleted { deleted, failed } => {
                    info!(deleted, failed, "Deletion sweep finished");
                }
                SchedulerEvent::Error { task, message } => {
                    info!(task = %task, "Job reported an error: {}", message);
                }
            }
        }
    });

    let state = Arc::new(state.with_jobs(scheduler.board()));
    let server = DaemonServer::new(state, config.socket_path());

    println!(
        "Daemon started (PID: {}). Press Ctrl+C or run 'newsdesk daemon stop' to stop.",
        std::process::id()
    );
    println!("  Socket: {}", config.socket_path().display());
    println!(
        "  Notification interval: {} seconds",
        config.scheduler.notification_interval_secs
    );
    println!(
        "  Deletion sweep interval: {} seconds",
        config.scheduler.deletion_sweep_interval_secs
    );

    // Serve until shutdown, then let the job loops finish their current tick
    let served = server.run(shutdown_rx).await;
    let _ = shutdown_tx.send(true);
    scheduler.join().await;

    remove_pid_file();
    println!("Daemon stopped.");

    served.map_err(Into::into)
}

/// Poll until `is_running` turns false or `timeout` passes. True once the process is gone.
async fn wait_for_exit(mut is_running: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_running() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}

/// Stop the daemon. It finishes any running job tick before exiting, so
/// this waits up to `timeout`; only `force` escalates to SIGKILL.
pub async fn stop(timeout: Duration, force: bool) -> Result<()> {
    let Some(pid) = is_daemon_running() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Stopping daemon (PID: {})...", pid);

    let output = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .output()?;

    if !output.status.success() {
        println!(
            "Failed to stop daemon. You may need to kill it manually: kill {}",
            pid
        );
        return Ok(());
    }

    if wait_for_exit(|| is_daemon_running().is_some(), timeout).await {
        println!("Daemon stopped successfully.");
    } else if force {
        let _ = std::process::Command::new("kill")
            .arg("-9")
            .arg(pid.to_string())
            .output();
        remove_pid_file();
        println!("Daemon forcefully terminated.");
    } else {
        println!(
            "Daemon is still finishing in-flight jobs after {}s. Check with 'newsdesk daemon status', or rerun with --force.",
            timeout.as_secs()
        );
    }

    Ok(())
}

/// Show daemon status
pub async fn status(config: &AppConfig) -> Result<()> {
    let Some(pid) = is_daemon_running() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Daemon is running (PID: {})", pid);
    println!("PID file: {}", pid_file_path().display());

    let socket = config.socket_path();
    if !socket_reachable(&socket).await {
        println!("Socket {} is not answering.", socket.display());
        return Ok(());
    }

    let status = DaemonClient::new(socket).status().await?;
    println!("Uptime: {} seconds", status.uptime_secs);
    println!("Cached categories: {}", status.cached_categories);
    for job in &status.jobs {
        let last = job
            .last_run_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {} every {}s, {} run(s), last {}{}",
            job.name,
            job.interval_secs,
            job.runs,
            last,
            job.last_error
                .as_ref()
                .map(|e| format!(" [ERROR: {}]", e))
                .unwrap_or_default()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_exit_returns_once_process_is_gone() {
        let mut polls = 0;
        let started = Instant::now();
        let exited = wait_for_exit(
            || {
                polls += 1;
                polls <= 3
            },
            Duration::from_secs(60),
        )
        .await;

        assert!(exited);
        assert_eq!(polls, 4);
        assert_eq!(started.elapsed(), 3 * STOP_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_exit_gives_up_after_timeout() {
        let started = Instant::now();
        let exited = wait_for_exit(|| true, Duration::from_secs(30)).await;

        assert!(!exited);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
    }
}
