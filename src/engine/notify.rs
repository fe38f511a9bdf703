//! Notification sink

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Outward notification channel (chat, webhook, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Writes notifications to the log
pub struct LogNotifier {
    tag: String,
}

impl LogNotifier {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        info!(bot = %self.tag, "📣 {}", message);
        Ok(())
    }
}
