use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::tasks::{NotificationTally, SweepTally};
use crate::Result;

/// What a single tick of a job accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobReport {
    Notifications(NotificationTally),
    Deletions(SweepTally),
}

/// Events emitted by the scheduler after each tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A notification batch finished
    NotificationsSent { sent: u32, skipped: u32, failed: u32 },
    /// A deletion sweep finished
    AccountsDeleted { deleted: u32, failed: u32 },
    /// A tick failed or panicked
    Error { task: String, message: String },
}

impl From<JobReport> for SchedulerEvent {
    fn from(report: JobReport) -> Self {
        match report {
            JobReport::Notifications(t) => SchedulerEvent::NotificationsSent {
                sent: t.sent,
                skipped: t.skipped,
                failed: t.failed,
            },
            JobReport::Deletions(t) => SchedulerEvent::AccountsDeleted {
                deleted: t.deleted,
                failed: t.failed,
            },
        }
    }
}

/// A unit of background work run on a fixed interval
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Pause between the end of one tick and the start of the next. Zero
    /// disables the job.
    fn interval(&self) -> Duration;

    async fn run_once(&self) -> Result<JobReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
}

/// Bookkeeping for one registered job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub name: String,
    pub interval_secs: u64,
    pub state: JobState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub runs: u64,
}

/// Shared, readable view of every job's bookkeeping
#[derive(Debug, Clone, Default)]
pub struct JobBoard {
    inner: Arc<RwLock<HashMap<String, ScheduledJob>>>,
}

impl JobBoard {
    /// Snapshot sorted by job name
    pub fn snapshot(&self) -> Vec<ScheduledJob> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut jobs: Vec<_> = map.values().cloned().collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    fn register(&self, name: &str, interval: Duration) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(
            name.to_string(),
            ScheduledJob {
                name: name.to_string(),
                interval_secs: interval.as_secs(),
                state: JobState::Idle,
                last_run_at: None,
                last_error: None,
                runs: 0,
            },
        );
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut ScheduledJob)) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(job) = map.get_mut(name) {
            f(job);
        }
    }
}

#[derive(Clone, Default)]
struct EventSink {
    tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl EventSink {
    fn send(&self, event: SchedulerEvent) {
        if let Some(ref tx) = self.tx {
            if tx.send(event).is_err() {
                warn!("Failed to send scheduler event: receiver dropped");
            }
        }
    }
}

/// Background scheduler that runs each registered job on its own loop
#[derive(Default)]
pub struct SchedulerService {
    jobs: Vec<Arc<dyn PeriodicJob>>,
    events: EventSink,
}

impl SchedulerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, job: Arc<dyn PeriodicJob>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Set the channel that receives a [`SchedulerEvent`] after every tick
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.events = EventSink { tx: Some(tx) };
        self
    }

    /// Spawn one loop per enabled job. Loops stop once `shutdown` turns true.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> SchedulerHandle {
        let board = JobBoard::default();
        let mut loops = JoinSet::new();

        for job in self.jobs {
            let interval = job.interval();
            if interval.is_zero() {
                info!(job = job.name(), "Job disabled (interval = 0)");
                continue;
            }

            board.register(job.name(), interval);
            loops.spawn(run_job_loop(
                job,
                board.clone(),
                self.events.clone(),
                shutdown.clone(),
            ));
        }

        info!("Scheduler started with {} job(s)", loops.len());
        SchedulerHandle { board, loops }
    }
}

async fn run_job_loop(
    job: Arc<dyn PeriodicJob>,
    board: JobBoard,
    events: EventSink,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = job.name().to_string();
    let interval = job.interval();

    'ticks: loop {
        if *shutdown.borrow() {
            break;
        }

        // Shutdown is not observed here: a started tick runs to completion
        run_tick(&name, &job, &board, &events).await;

        let pause = tokio::time::sleep(interval);
        tokio::pin!(pause);
        loop {
            tokio::select! {
                biased;

                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break 'ticks;
                    }
                }

                _ = &mut pause => break,
            }
        }
    }

    info!(job = %name, "Job loop stopped");
}

/// Run one tick in its own task so a panic is recorded instead of ending the loop
async fn run_tick(name: &str, job: &Arc<dyn PeriodicJob>, board: &JobBoard, events: &EventSink) {
    debug!(job = name, "Running scheduled job");
    board.update(name, |j| j.state = JobState::Running);

    let tick_job = job.clone();
    let outcome = match tokio::spawn(async move { tick_job.run_once().await }).await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_err) if join_err.is_panic() => Err(format!("job panicked: {}", join_err)),
        Err(join_err) => Err(join_err.to_string()),
    };

    let finished_at = Utc::now();
    board.update(name, |j| {
        j.state = JobState::Idle;
        j.last_run_at = Some(finished_at);
        j.runs += 1;
        j.last_error = outcome.as_ref().err().cloned();
    });

    match outcome {
        Ok(report) => events.send(report.into()),
        Err(message) => {
            error!(job = name, "Scheduled job failed: {}", message);
            events.send(SchedulerEvent::Error {
                task: name.to_string(),
                message,
            });
        }
    }
}

/// Running scheduler: job snapshots and a way to wait for the loops
pub struct SchedulerHandle {
    board: JobBoard,
    loops: JoinSet<()>,
}

impl SchedulerHandle {
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.board.snapshot()
    }

    /// Board that stays readable after the handle is consumed by [`join`](Self::join)
    pub fn board(&self) -> JobBoard {
        self.board.clone()
    }

    /// Wait for every job loop to finish
    pub async fn join(mut self) {
        while let Some(result) = self.loops.join_next().await {
            if let Err(e) = result {
                error!("Job loop ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}
