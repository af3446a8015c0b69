//! Outgoing mail.
//!
//! Messages go to an HTTP relay as JSON. Without a relay the daemon only
//! logs what it would have sent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::AppConfig;
use crate::storage::Notification;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    /// Render the message announcing `notification`
    pub fn for_notification(notification: &Notification, address: &str) -> Self {
        Self {
            to: address.to_string(),
            subject: format!("New in {}: {}", notification.topic, notification.title),
            body: format!(
                "{}\n\n{}\n\nRead more: {}",
                notification.title, notification.excerpt, notification.url
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, email: &Email) -> Result<()>;

    async fn send_notification(&self, notification: &Notification, address: &str) -> Result<()> {
        if address.trim().is_empty() {
            return Err(Error::Mail(format!(
                "user {} has no email address",
                notification.user_id
            )));
        }
        self.send_email(&Email::for_notification(notification, address))
            .await
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Delivers mail through an HTTP relay
pub struct RelayMailer {
    client: Client,
    relay_url: String,
    from_address: String,
}

impl RelayMailer {
    pub fn new(relay_url: impl Into<String>, from_address: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            relay_url: relay_url.into(),
            from_address: from_address.into(),
        })
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    async fn send_email(&self, email: &Email) -> Result<()> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(&RelayMessage {
                from: &self.from_address,
                to: &email.to,
                subject: &email.subject,
                body: &email.body,
            })
            .send()
            .await
            .map_err(|e| Error::Mail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Mail(format!("relay answered HTTP {}", status)));
        }

        tracing::debug!(to = %email.to, "Mail handed to relay");
        Ok(())
    }
}

/// Logs messages instead of sending them
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_email(&self, email: &Email) -> Result<()> {
        tracing::info!(to = %email.to, subject = %email.subject, "Mail (not sent, no relay configured)");
        Ok(())
    }
}

/// Pick the relay mailer when one is configured
pub fn mailer_from_config(config: &AppConfig) -> Result<Box<dyn Mailer>> {
    match config.mail.relay_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Ok(Box::new(RelayMailer::new(url, &config.mail.from_address)?)),
        None => Ok(Box::new(LogMailer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;

    use crate::news::Article;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<Email>>,
    }

    #[async_trait]
    impl Mailer for Outbox {
        async fn send_email(&self, email: &Email) -> Result<()> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn notification() -> Notification {
        let article = Article {
            title: Some("Chips".into()),
            topic: Some("Tech".into()),
            description: Some("Smaller and faster".into()),
            domain_url: Some("https://example.com/chips".into()),
            ..Default::default()
        };
        Notification::for_article("u1", &article, Utc::now())
    }

    #[tokio::test]
    async fn test_notification_email_content() {
        let outbox = Outbox::default();
        outbox
            .send_notification(&notification(), "ada@example.com")
            .await
            .unwrap();

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.com");
        assert_eq!(sent[0].subject, "New in Tech: Chips");
        assert!(sent[0].body.contains("Smaller and faster"));
        assert!(sent[0].body.contains("https://example.com/chips"));
    }

    #[tokio::test]
    async fn test_blank_address_is_mail_error() {
        let outbox = Outbox::default();
        let result = outbox.send_notification(&notification(), "  ").await;
        assert!(matches!(result, Err(Error::Mail(_))));
        assert!(outbox.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_mailer_without_relay() {
        let config = AppConfig::default();
        let mailer = mailer_from_config(&config).unwrap();
        assert!(mailer.send_notification(&notification(), "ada@example.com").await.is_ok());
    }
}
