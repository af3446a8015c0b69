mod jobs;
mod service;
pub mod tasks;

pub use jobs::{
    deletion_sweep_job_from_config, notification_job_from_config, run_deletion_sweep_once,
    run_notifications_once, DeletionSweepJob, NotificationJob, DELETION_SWEEP_JOB,
    NOTIFICATION_JOB,
};
pub use service::{
    JobBoard, JobReport, JobState, PeriodicJob, ScheduledJob, SchedulerEvent, SchedulerHandle,
    SchedulerService,
};
pub use tasks::{send_notifications, sweep_expired_accounts, NotificationTally, SweepTally};
