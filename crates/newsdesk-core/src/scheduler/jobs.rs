use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::service::{JobReport, PeriodicJob};
use super::tasks::{
    send_notifications, sweep_expired_accounts, CandidateSources, NotificationTally, SweepTally,
};
use crate::config::AppConfig;
use crate::mail::{mailer_from_config, Mailer};
use crate::news::{CategoryCache, NewsCatcherClient, NewsCorpus, NewsSource};
use crate::recommend::{RecommendationClient, RecommendationMerge};
use crate::storage::{Database, NotificationRepository, UserRepository};
use crate::Result;

pub const NOTIFICATION_JOB: &str = "notifications";
pub const DELETION_SWEEP_JOB: &str = "deletion_sweep";

/// Periodically mails every user one article from their categories
pub struct NotificationJob {
    db: Database,
    corpus: NewsCorpus,
    cache: Option<Arc<CategoryCache>>,
    recommendations: Option<Arc<RecommendationMerge>>,
    mailer: Arc<dyn Mailer>,
    interval: Duration,
}

impl NotificationJob {
    pub fn new(db: Database, corpus: NewsCorpus, mailer: Arc<dyn Mailer>, interval: Duration) -> Self {
        Self {
            db,
            corpus,
            cache: None,
            recommendations: None,
            mailer,
            interval,
        }
    }

    /// Fall back to the live cache when the corpus has nothing for a user
    pub fn with_cache(mut self, cache: Arc<CategoryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Also draw from the user's latest recommendations
    pub fn with_recommendations(mut self, merge: Arc<RecommendationMerge>) -> Self {
        self.recommendations = Some(merge);
        self
    }

    async fn run(&self) -> Result<NotificationTally> {
        // One corpus read per tick
        let corpus = match self.corpus.load().await {
            Ok(articles) => articles,
            Err(e) => {
                tracing::warn!(path = %self.corpus.path().display(), error = %e, "Corpus unavailable for notifications");
                Vec::new()
            }
        };

        let sources = CandidateSources {
            corpus: &corpus,
            cache: self.cache.as_deref(),
            recommendations: self.recommendations.as_deref(),
        };

        send_notifications(
            &UserRepository::new(&self.db),
            &NotificationRepository::new(&self.db),
            &sources,
            self.mailer.as_ref(),
        )
        .await
    }
}

#[async_trait]
impl PeriodicJob for NotificationJob {
    fn name(&self) -> &str {
        NOTIFICATION_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<JobReport> {
        Ok(JobReport::Notifications(self.run().await?))
    }
}

/// Periodically removes accounts whose deletion grace period has passed
pub struct DeletionSweepJob {
    db: Database,
    grace: chrono::Duration,
    interval: Duration,
}

impl DeletionSweepJob {
    pub fn new(db: Database, grace: chrono::Duration, interval: Duration) -> Self {
        Self {
            db,
            grace,
            interval,
        }
    }

    async fn run(&self) -> Result<SweepTally> {
        sweep_expired_accounts(&UserRepository::new(&self.db), Utc::now(), self.grace).await
    }
}

#[async_trait]
impl PeriodicJob for DeletionSweepJob {
    fn name(&self) -> &str {
        DELETION_SWEEP_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<JobReport> {
        Ok(JobReport::Deletions(self.run().await?))
    }
}

/// Notification job wired from configuration.
///
/// Upstream sources that are not configured are left out rather than
/// failing, so a bare corpus setup still sends mail.
pub fn notification_job_from_config(
    db: &Database,
    config: &AppConfig,
    cache: Option<Arc<CategoryCache>>,
) -> Result<NotificationJob> {
    let mailer: Arc<dyn Mailer> = Arc::from(mailer_from_config(config)?);
    let mut job = NotificationJob::new(
        db.clone(),
        NewsCorpus::new(config.corpus_path()),
        mailer,
        Duration::from_secs(config.scheduler.notification_interval_secs),
    );

    let news: Option<Arc<dyn NewsSource>> = match NewsCatcherClient::new(config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!("News provider not configured: {}", e);
            None
        }
    };

    if let Some(cache) = cache {
        job = job.with_cache(cache);
    } else if let Some(ref news) = news {
        job = job.with_cache(Arc::new(CategoryCache::from_config(news.clone(), config)));
    }

    match (RecommendationClient::new(config), news) {
        (Ok(recommendations), Some(news)) => {
            job = job.with_recommendations(Arc::new(RecommendationMerge::new(
                Arc::new(recommendations),
                news,
            )));
        }
        (Err(e), _) => tracing::warn!("Recommendations not configured: {}", e),
        _ => {}
    }

    Ok(job)
}

pub fn deletion_sweep_job_from_config(db: &Database, config: &AppConfig) -> DeletionSweepJob {
    DeletionSweepJob::new(
        db.clone(),
        config.scheduler.deletion_grace(),
        Duration::from_secs(config.scheduler.deletion_sweep_interval_secs),
    )
}

/// Run a single notification batch outside the scheduler
pub async fn run_notifications_once(db: &Database, config: &AppConfig) -> Result<NotificationTally> {
    notification_job_from_config(db, config, None)?.run().await
}

/// Run a single deletion sweep outside the scheduler
pub async fn run_deletion_sweep_once(db: &Database, config: &AppConfig) -> Result<SweepTally> {
    deletion_sweep_job_from_config(db, config).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::mail::LogMailer;
    use crate::storage::{User, UserDirectory};

    #[tokio::test]
    async fn test_sweep_job_reports_deletions() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = UserRepository::new(&db);
        let user = User::new("old", None);
        repo.create(&user).await.unwrap();
        repo.request_deletion(&user.id, Utc::now() - ChronoDuration::days(15))
            .await
            .unwrap();

        let job = DeletionSweepJob::new(db.clone(), ChronoDuration::days(14), Duration::from_secs(60));
        assert_eq!(job.name(), DELETION_SWEEP_JOB);

        let report = job.run_once().await.unwrap();
        assert_eq!(
            report,
            JobReport::Deletions(SweepTally {
                deleted: 1,
                failed: 0
            })
        );
        assert!(repo.all_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notification_job_survives_missing_corpus() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = UserRepository::new(&db);
        let user = User::new("ada", Some("ada@example.com".into()));
        repo.create(&user).await.unwrap();
        repo.set_preferred_categories(&user.id, &["Tech".to_string()])
            .await
            .unwrap();

        let job = NotificationJob::new(
            db,
            NewsCorpus::new("/nonexistent/newsdesk/NewsData.json"),
            Arc::new(LogMailer),
            Duration::from_secs(300),
        );
        let report = job.run_once().await.unwrap();
        assert_eq!(
            report,
            JobReport::Notifications(NotificationTally {
                sent: 0,
                skipped: 1,
                failed: 0
            })
        );
    }

    #[tokio::test]
    async fn test_jobs_from_default_config() {
        let db = Database::new_in_memory().await.unwrap();
        let config = AppConfig::default();

        let notify = notification_job_from_config(&db, &config, None).unwrap();
        assert_eq!(notify.interval(), Duration::from_secs(300));
        assert!(notify.cache.is_none());
        assert!(notify.recommendations.is_none());

        let sweep = deletion_sweep_job_from_config(&db, &config);
        assert_eq!(sweep.interval(), Duration::from_secs(86_400));
        assert_eq!(sweep.grace, ChronoDuration::days(14));
    }
}
