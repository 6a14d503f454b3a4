// ============================
// authgate/src/mailer.rs
// ============================
//! Outgoing mail capability.
use crate::error::BoxError;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

/// A plain-text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text_body: String,
}

/// Delivers [`Email`]s on behalf of modules
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), BoxError>;
}

/// Writes mail to the log instead of delivering it
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), BoxError> {
        info!(
            to = %email.to,
            from = %email.from,
            subject = %email.subject,
            body = %email.text_body,
            "outgoing mail"
        );
        Ok(())
    }
}

/// Keeps every message in memory, for tests and previews
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: Email) -> Result<(), BoxError> {
        self.sent.lock().push(email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> Email {
        Email {
            to: "george@example.com".to_string(),
            from: "authgate@localhost".to_string(),
            subject: "Confirm New Account".to_string(),
            text_body: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_everything() {
        assert!(LogMailer.send(email()).await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_mailer_records() {
        let mailer = MemoryMailer::new();
        mailer.send(email()).await.unwrap();
        mailer.send(email()).await.unwrap();
        assert_eq!(mailer.sent().len(), 2);
        assert_eq!(mailer.sent()[0].to, "george@example.com");
    }
}
