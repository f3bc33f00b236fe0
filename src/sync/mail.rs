//! Retrieves a user's recent timetable mail and attachment metadata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::sync::outcome::{StepOutcome, call_with_timeout};

/// One mailbox attachment. Only lives for the duration of a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentRef {
    pub message_id: String,
    pub attachment_id: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub message_id: String,
    pub attachments: Vec<AttachmentRef>,
}

/// Mailbox backend.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Up to `max_results` matching messages, newest first.
    async fn list_recent(&self, user_id: &str, max_results: u32)
    -> anyhow::Result<Vec<MessageSummary>>;

    async fn download_attachment(
        &self,
        user_id: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Newest-first, single-pass view over the fetched messages.
///
/// Consuming it is the only way to read it; there is no rewind.
#[derive(Debug)]
pub struct RecentMessages {
    inner: std::vec::IntoIter<MessageSummary>,
}

impl RecentMessages {
    pub fn new(messages: Vec<MessageSummary>) -> Self {
        Self {
            inner: messages.into_iter(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// The first attachment of the newest message that has one.
    pub fn latest_attachment(self) -> Option<AttachmentRef> {
        self.flat_map(|m| m.attachments).next()
    }
}

impl Iterator for RecentMessages {
    type Item = MessageSummary;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

pub struct MailFetcher {
    source: Arc<dyn MailSource>,
    max_results: u32,
    timeout: Duration,
}

impl MailFetcher {
    pub fn new(source: Arc<dyn MailSource>, max_results: u32, timeout: Duration) -> Self {
        Self {
            source,
            max_results,
            timeout,
        }
    }

    /// An empty mailbox is a `Success` with no messages; only transport
    /// faults produce `Error`.
    pub async fn fetch_recent(&self, user_id: &str) -> StepOutcome<RecentMessages> {
        match call_with_timeout(
            "mail_fetch",
            self.timeout,
            self.source.list_recent(user_id, self.max_results),
        )
        .await
        {
            Ok(messages) => StepOutcome::Success(RecentMessages::new(messages)),
            Err(e) => StepOutcome::Error(e),
        }
    }
}
