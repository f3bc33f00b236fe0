//! Gmail backend for the mail fetch and attachment download steps.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use tracing::trace;

use crate::google::auth::TokenSource;
use crate::google::{GoogleApiError, send_json};
use crate::sync::mail::{AttachmentRef, MailSource, MessageSummary};

/// Gmail returns URL-safe base64 with or without padding.
const ATTACHMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Message detail requests kept in flight at once.
const DETAIL_CONCURRENCY: usize = 4;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageId>,
}

#[derive(Debug, Deserialize)]
struct MessageId {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    id: String,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

impl MessagePart {
    /// Depth-first walk collecting every named part backed by an attachment.
    fn collect_attachments(&self, message_id: &str, out: &mut Vec<AttachmentRef>) {
        if !self.filename.is_empty()
            && let Some(attachment_id) = self.body.as_ref().and_then(|b| b.attachment_id.as_ref())
        {
            out.push(AttachmentRef {
                message_id: message_id.to_owned(),
                attachment_id: attachment_id.clone(),
                filename: self.filename.clone(),
            });
        }
        for part in &self.parts {
            part.collect_attachments(message_id, out);
        }
    }
}

pub struct GmailClient {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
    query: String,
}

impl GmailClient {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        base_url: impl Into<String>,
        query: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Gmail HTTP client")?;
        Ok(Self {
            http,
            tokens,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            query: query.into(),
        })
    }

    async fn message(
        &self,
        token: &str,
        user_id: &str,
        message_id: &str,
    ) -> Result<MessageSummary, GoogleApiError> {
        let url = format!("{}/users/me/messages/{message_id}", self.base_url);
        let message: Message = send_json(
            self.http
                .get(&url)
                .bearer_auth(token)
                .query(&[("format", "full")]),
            user_id,
        )
        .await?;

        let mut attachments = Vec::new();
        if let Some(payload) = &message.payload {
            payload.collect_attachments(&message.id, &mut attachments);
        }
        Ok(MessageSummary {
            message_id: message.id,
            attachments,
        })
    }
}

impl GmailClient {
    async fn list_messages(
        &self,
        user_id: &str,
        max_results: u32,
    ) -> Result<Vec<MessageSummary>, GoogleApiError> {
        let token = self.tokens.access_token(user_id).await?;
        let url = format!("{}/users/me/messages", self.base_url);
        let max_results = max_results.to_string();
        let list: ListResponse = send_json(
            self.http.get(&url).bearer_auth(&token).query(&[
                ("q", self.query.as_str()),
                ("maxResults", max_results.as_str()),
            ]),
            user_id,
        )
        .await?;
        trace!(username = user_id, count = list.messages.len(), "Listed messages");

        // `buffered` keeps Gmail's newest-first order.
        let summaries: Vec<MessageSummary> = futures::stream::iter(list.messages)
            .map(|m| {
                let token = token.as_str();
                async move { self.message(token, user_id, &m.id).await }
            })
            .buffered(DETAIL_CONCURRENCY)
            .try_collect()
            .await?;
        Ok(summaries)
    }

    async fn fetch_attachment(
        &self,
        user_id: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, GoogleApiError> {
        let token = self.tokens.access_token(user_id).await?;
        let url = format!(
            "{}/users/me/messages/{message_id}/attachments/{attachment_id}",
            self.base_url
        );
        let body: AttachmentBody =
            send_json(self.http.get(&url).bearer_auth(&token), user_id).await?;
        let bytes = ATTACHMENT_ENGINE
            .decode(body.data.trim())
            .context("Attachment data is not valid base64")?;
        Ok(bytes)
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn list_recent(
        &self,
        user_id: &str,
        max_results: u32,
    ) -> anyhow::Result<Vec<MessageSummary>> {
        self.list_messages(user_id, max_results)
            .await
            .map_err(GoogleApiError::into_sync)
    }

    async fn download_attachment(
        &self,
        user_id: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> anyhow::Result<Vec<u8>> {
        self.fetch_attachment(user_id, message_id, attachment_id)
            .await
            .map_err(GoogleApiError::into_sync)
    }
}
