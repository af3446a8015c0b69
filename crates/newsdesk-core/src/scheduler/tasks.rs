use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;

use crate::mail::Mailer;
use crate::news::corpus::articles_in_categories;
use crate::news::{Article, CategoryCache, DEFAULT_COUNTRY, DEFAULT_LANGUAGE};
use crate::recommend::RecommendationMerge;
use crate::storage::{Notification, NotificationStore, User, UserDirectory};
use crate::{Error, Result};

/// Outcome counts of one notification batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationTally {
    pub sent: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// Outcome counts of one deletion sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepTally {
    pub deleted: u32,
    pub failed: u32,
}

/// Where notification candidates come from.
///
/// The corpus is consulted first. The live cache is only asked when the
/// corpus has nothing for the user's categories.
pub struct CandidateSources<'a> {
    pub corpus: &'a [Article],
    pub cache: Option<&'a CategoryCache>,
    pub recommendations: Option<&'a RecommendationMerge>,
}

impl CandidateSources<'_> {
    async fn for_user(&self, user_id: &str, categories: &[String]) -> Vec<Article> {
        let mut pool = articles_in_categories(self.corpus, categories);

        if pool.is_empty() {
            if let Some(cache) = self.cache {
                for category in categories {
                    pool.extend(
                        cache
                            .get_by_category(category, DEFAULT_LANGUAGE, DEFAULT_COUNTRY)
                            .await,
                    );
                }
            }
        }

        if let Some(merge) = self.recommendations {
            match merge.latest_page(user_id, 0, None).await {
                Ok(latest) => pool.extend(latest.into_iter().filter(|a| a.topic_in(categories))),
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Skipping recommendations for notification");
                }
            }
        }

        pool
    }
}

enum Delivery {
    Sent,
    Skipped,
}

/// Send one random article from their preferred categories to every user.
///
/// A failure for one user is logged and counted; the batch carries on.
pub async fn send_notifications(
    users: &dyn UserDirectory,
    store: &dyn NotificationStore,
    sources: &CandidateSources<'_>,
    mailer: &dyn Mailer,
) -> Result<NotificationTally> {
    tracing::info!("Start sending notifications");

    let mut tally = NotificationTally::default();
    for user in users.all_users().await? {
        match notify_user(&user, users, store, sources, mailer).await {
            Ok(Delivery::Sent) => tally.sent += 1,
            Ok(Delivery::Skipped) => tally.skipped += 1,
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Error sending notification");
                tally.failed += 1;
            }
        }
    }

    tracing::info!(
        sent = tally.sent,
        skipped = tally.skipped,
        failed = tally.failed,
        "Finished sending notifications"
    );
    Ok(tally)
}

async fn notify_user(
    user: &User,
    users: &dyn UserDirectory,
    store: &dyn NotificationStore,
    sources: &CandidateSources<'_>,
    mailer: &dyn Mailer,
) -> Result<Delivery> {
    let categories = users.preferred_categories(&user.id).await?;
    if categories.is_empty() {
        tracing::debug!(user_id = %user.id, "No preferred categories, skipping");
        return Ok(Delivery::Skipped);
    }

    let candidates = sources.for_user(&user.id, &categories).await;
    let picked = {
        let mut rng = rand::thread_rng();
        candidates.choose(&mut rng).cloned()
    };
    let Some(article) = picked else {
        tracing::debug!(user_id = %user.id, "No candidate articles, skipping");
        return Ok(Delivery::Skipped);
    };

    let notification = Notification::for_article(&user.id, &article, Utc::now());
    store.save(&notification).await?;

    let address = users
        .find_by_id(&user.id)
        .await?
        .and_then(|u| u.email)
        .ok_or_else(|| Error::Mail(format!("user {} has no email address", user.id)))?;
    mailer.send_notification(&notification, &address).await?;

    tracing::info!(user_id = %user.id, article = %notification.article_id, "Notification sent");
    Ok(Delivery::Sent)
}

/// Delete every account whose deletion request is at least `grace` old at `now`
pub async fn sweep_expired_accounts(
    users: &dyn UserDirectory,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<SweepTally> {
    let mut tally = SweepTally::default();

    for user in users.pending_deletions().await? {
        if !user.deletion.is_expired(now, grace) {
            continue;
        }

        match users.delete(&user.id).await {
            Ok(true) => {
                tracing::info!(user_id = %user.id, "Deleted account after grace period");
                tally.deleted += 1;
            }
            Ok(false) => {
                tracing::warn!(user_id = %user.id, "Account already gone");
            }
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Failed to delete account");
                tally.failed += 1;
            }
        }
    }

    if tally.deleted > 0 {
        tracing::info!("Deletion sweep removed {} account(s)", tally.deleted);
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::mail::Email;
    use crate::news::{NewsSource, SearchQuery};
    use crate::recommend::RecommendationSource;
    use crate::storage::{Database, DeletionRequest, NotificationRepository, UserRepository};

    fn article(id: &str, topic: &str) -> Article {
        Article {
            id: Some(id.to_string()),
            title: Some(format!("title {}", id)),
            topic: Some(topic.to_string()),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<Email>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl Mailer for Outbox {
        async fn send_email(&self, email: &Email) -> Result<()> {
            if self.fail_for.as_deref() == Some(email.to.as_str()) {
                return Err(Error::Mail("relay refused".into()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    struct TopicSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NewsSource for TopicSource {
        async fn fetch_category(&self, category: &str, _: &str, _: &str) -> Result<Vec<Article>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![article("live", category)])
        }

        async fn search(&self, _query: &SearchQuery) -> Result<Vec<Article>> {
            Ok(Vec::new())
        }

        async fn fetch_by_id(&self, _id: &str) -> Result<Option<Article>> {
            Ok(None)
        }
    }

    struct Latest(Vec<Article>);

    #[async_trait]
    impl RecommendationSource for Latest {
        async fn recommend(&self, _: &[String], _: &str) -> Result<Vec<Article>> {
            Ok(Vec::new())
        }

        async fn latest(&self, _user_id: &str) -> Result<Vec<Article>> {
            Ok(self.0.clone())
        }
    }

    async fn user_with(db: &Database, name: &str, categories: &[&str]) -> User {
        let repo = UserRepository::new(db);
        let user = User::new(name, Some(format!("{}@example.com", name)));
        repo.create(&user).await.unwrap();
        let categories: Vec<String> = categories.iter().map(|c| c.to_string()).collect();
        repo.set_preferred_categories(&user.id, &categories)
            .await
            .unwrap();
        user
    }

    #[tokio::test]
    async fn test_user_without_categories_is_skipped_not_fatal() {
        let db = Database::new_in_memory().await.unwrap();
        let empty = user_with(&db, "empty", &[]).await;
        let tech = user_with(&db, "tech", &["Tech"]).await;

        let corpus = vec![article("c1", "Tech"), article("c2", "Sports")];
        let sources = CandidateSources {
            corpus: &corpus,
            cache: None,
            recommendations: None,
        };
        let outbox = Outbox::default();

        let tally = send_notifications(
            &UserRepository::new(&db),
            &NotificationRepository::new(&db),
            &sources,
            &outbox,
        )
        .await
        .unwrap();

        assert_eq!(tally, NotificationTally { sent: 1, skipped: 1, failed: 0 });
        let sent = outbox.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "tech@example.com");

        let repo = NotificationRepository::new(&db);
        assert!(repo.list_for_user(&empty.id).await.unwrap().is_empty());
        let saved = repo.list_for_user(&tech.id).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].article_id, "c1");
        assert_eq!(saved[0].topic, "Tech");
    }

    #[tokio::test]
    async fn test_mail_failure_counts_and_continues() {
        let db = Database::new_in_memory().await.unwrap();
        user_with(&db, "bad", &["Tech"]).await;
        user_with(&db, "good", &["Tech"]).await;

        let corpus = vec![article("c1", "Tech")];
        let sources = CandidateSources {
            corpus: &corpus,
            cache: None,
            recommendations: None,
        };
        let outbox = Outbox {
            fail_for: Some("bad@example.com".into()),
            ..Default::default()
        };

        let tally = send_notifications(
            &UserRepository::new(&db),
            &NotificationRepository::new(&db),
            &sources,
            &outbox,
        )
        .await
        .unwrap();

        assert_eq!(tally, NotificationTally { sent: 1, skipped: 0, failed: 1 });
        assert_eq!(outbox.sent.lock().unwrap()[0].to, "good@example.com");
    }

    #[tokio::test]
    async fn test_cache_fallback_and_recommendations() {
        let db = Database::new_in_memory().await.unwrap();
        let user = user_with(&db, "ada", &["Health"]).await;

        let source = Arc::new(TopicSource {
            calls: AtomicUsize::new(0),
        });
        let cache = CategoryCache::new(
            source.clone(),
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(5),
        );
        let merge = RecommendationMerge::new(
            Arc::new(Latest(vec![article("r1", "Health"), article("r2", "Sports")])),
            source.clone(),
        );
        let sources = CandidateSources {
            corpus: &[],
            cache: Some(&cache),
            recommendations: Some(&merge),
        };

        let pool = sources.for_user(&user.id, &["Health".to_string()]).await;
        let ids: Vec<_> = pool.iter().map(|a| a.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["live", "r1"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_candidates_is_skipped() {
        let db = Database::new_in_memory().await.unwrap();
        user_with(&db, "ada", &["Weather"]).await;

        let sources = CandidateSources {
            corpus: &[],
            cache: None,
            recommendations: None,
        };
        let outbox = Outbox::default();
        let tally = send_notifications(
            &UserRepository::new(&db),
            &NotificationRepository::new(&db),
            &sources,
            &outbox,
        )
        .await
        .unwrap();
        assert_eq!(tally, NotificationTally { sent: 0, skipped: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_sweep_respects_grace_window() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = UserRepository::new(&db);
        let now = Utc::now();

        let recent = user_with(&db, "recent", &[]).await;
        let expired = user_with(&db, "expired", &[]).await;
        let active = user_with(&db, "active", &[]).await;
        repo.request_deletion(&recent.id, now - Duration::days(13))
            .await
            .unwrap();
        repo.request_deletion(&expired.id, now - Duration::days(14) - Duration::hours(1))
            .await
            .unwrap();

        let tally = sweep_expired_accounts(&repo, now, Duration::days(14))
            .await
            .unwrap();
        assert_eq!(tally, SweepTally { deleted: 1, failed: 0 });

        assert!(repo.find_by_id(&expired.id).await.unwrap().is_none());
        assert!(repo.find_by_id(&recent.id).await.unwrap().is_some());
        assert!(repo.find_by_id(&active.id).await.unwrap().is_some());

        // The deleted account does not come back in the next sweep
        let pending: Vec<_> = repo
            .pending_deletions()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(pending, vec![recent.id.clone()]);
        let tally = sweep_expired_accounts(&repo, now, Duration::days(14))
            .await
            .unwrap();
        assert_eq!(tally.deleted, 0);
    }

    /// Directory whose deletes fail for one id
    struct FlakyDirectory {
        users: HashMap<String, User>,
        broken: String,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UserDirectory for FlakyDirectory {
        async fn all_users(&self) -> Result<Vec<User>> {
            Ok(self.users.values().cloned().collect())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
            Ok(self.users.get(id).cloned())
        }

        async fn preferred_categories(&self, _user_id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn update(&self, _user: &User) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, user_id: &str) -> Result<bool> {
            if user_id == self.broken {
                return Err(Error::Other("locked".into()));
            }
            self.deleted.lock().unwrap().push(user_id.to_string());
            Ok(true)
        }

        async fn pending_deletions(&self) -> Result<Vec<User>> {
            Ok(self.users.values().cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_one_failed_delete_does_not_stop_sweep() {
        let now = Utc::now();
        let mut users = HashMap::new();
        for name in ["a", "b", "c"] {
            let mut user = User::new(name, None);
            user.id = name.to_string();
            user.deletion = DeletionRequest::pending(now - Duration::days(20));
            users.insert(user.id.clone(), user);
        }
        let directory = FlakyDirectory {
            users,
            broken: "b".into(),
            deleted: Mutex::new(Vec::new()),
        };

        let tally = sweep_expired_accounts(&directory, now, Duration::days(14))
            .await
            .unwrap();
        assert_eq!(tally, SweepTally { deleted: 2, failed: 1 });

        let mut deleted = directory.deleted.lock().unwrap().clone();
        deleted.sort();
        assert_eq!(deleted, vec!["a", "c"]);
    }
}
