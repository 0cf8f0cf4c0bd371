//! Gmail API v1 backend.
//!
//! Unanswered = inbox threads with a message newer than the lookback window
//! whose most recent message was not sent by the mailbox owner.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::MailError;
use crate::mail::message::{Email, build_reply, parse_raw_email};
use crate::mail::{EmailService, MailProvider, MailboxConfig, status_error};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com";

/// Page size for the message list call.
const LIST_PAGE_SIZE: u32 = 100;

/// Upper bound on list pages walked per fetch.
const MAX_LIST_PAGES: usize = 5;

const SENT_LABEL: &str = "SENT";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStub {
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct ThreadDetail {
    #[serde(default)]
    messages: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadMessage {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    raw: String,
}

// ============================================================================
// Client
// ============================================================================

/// Gmail REST client bound to one mailbox.
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    access_token: SecretString,
    address: String,
    lookback_hours: u32,
}

impl GmailClient {
    pub fn new(http: reqwest::Client, config: &MailboxConfig) -> Self {
        Self {
            http,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            access_token: config.access_token.clone(),
            address: config.address.clone(),
            lookback_hours: config.lookback_hours,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/gmail/v1/users/me/{}",
            self.base_url.trim_end_matches('/'),
            path
        )
    }

    /// Gmail search query for recent inbound inbox mail.
    fn search_query(&self) -> String {
        let since = Utc::now() - chrono::Duration::hours(i64::from(self.lookback_hours));
        format!("in:inbox -from:me after:{}", since.timestamp())
    }

    /// List thread ids with recent inbound messages, newest first, deduplicated.
    async fn list_thread_ids(&self) -> Result<Vec<String>, MailError> {
        let query = self.search_query();
        let mut thread_ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut params: Vec<(&str, String)> = vec![
                ("q", query.clone()),
                ("maxResults", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(ref token) = page_token {
                params.push(("pageToken", token.clone()));
            }

            let resp = self
                .http
                .get(self.url("messages"))
                .bearer_auth(self.access_token.expose_secret())
                .query(&params)
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(status_error(EmailService::Gmail, resp).await);
            }

            let list: MessageListResponse = resp.json().await?;
            for stub in list.messages {
                let thread_id = if stub.thread_id.is_empty() {
                    stub.id
                } else {
                    stub.thread_id
                };
                if !thread_ids.contains(&thread_id) {
                    thread_ids.push(thread_id);
                }
            }

            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(thread_ids)
    }

    /// Newest message of a thread, or `None` if the owner replied last.
    async fn latest_unanswered(&self, thread_id: &str) -> Result<Option<Email>, MailError> {
        let resp = self
            .http
            .get(self.url(&format!("threads/{thread_id}")))
            .bearer_auth(self.access_token.expose_secret())
            .query(&[("format", "minimal")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(EmailService::Gmail, resp).await);
        }

        let thread: ThreadDetail = resp.json().await?;
        let Some(latest) = thread.messages.last() else {
            return Ok(None);
        };
        if latest.label_ids.iter().any(|l| l == SENT_LABEL) {
            return Ok(None);
        }

        let email = self.fetch_raw(&latest.id, thread_id).await?;
        if email.sender_address() == self.address.to_lowercase() {
            return Ok(None);
        }
        Ok(Some(email))
    }

    async fn fetch_raw(&self, message_id: &str, thread_id: &str) -> Result<Email, MailError> {
        let resp = self
            .http
            .get(self.url(&format!("messages/{message_id}")))
            .bearer_auth(self.access_token.expose_secret())
            .query(&[("format", "raw")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(EmailService::Gmail, resp).await);
        }

        let message: RawMessage = resp.json().await?;
        let bytes = decode_url_safe_base64(&message.raw).ok_or_else(|| MailError::Malformed {
            id: message_id.to_string(),
            reason: "raw payload is not base64url".to_string(),
        })?;
        parse_raw_email(message_id, thread_id, &bytes)
    }

    /// JSON payload shared by `drafts.create` and `messages.send`.
    fn reply_payload(&self, original: &Email, reply: &str) -> Result<serde_json::Value, MailError> {
        let raw = build_reply(&self.address, original, reply)?;
        Ok(serde_json::json!({
            "raw": URL_SAFE.encode(raw),
            "threadId": original.thread_id,
        }))
    }
}

/// Decode URL-safe base64 as used by the Gmail API (padding optional).
fn decode_url_safe_base64(data: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()
}

#[async_trait]
impl MailProvider for GmailClient {
    fn service(&self) -> EmailService {
        EmailService::Gmail
    }

    async fn fetch_unanswered(&self) -> Result<Vec<Email>, MailError> {
        let thread_ids = self.list_thread_ids().await?;
        let mut emails = Vec::with_capacity(thread_ids.len());

        for thread_id in &thread_ids {
            match self.latest_unanswered(thread_id).await {
                Ok(Some(email)) => emails.push(email),
                Ok(None) => debug!(thread_id = %thread_id, "Thread already answered"),
                // Auth failures affect every thread; surface them.
                Err(e @ MailError::AuthExpired { .. }) => return Err(e),
                Err(e) => {
                    warn!(thread_id = %thread_id, error = %e, "Skipping thread");
                }
            }
        }

        info!(count = emails.len(), "Fetched unanswered Gmail messages");
        Ok(emails)
    }

    async fn create_draft_reply(&self, original: &Email, reply: &str) -> Result<(), MailError> {
        let body = serde_json::json!({ "message": self.reply_payload(original, reply)? });

        let resp = self
            .http
            .post(self.url("drafts"))
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(EmailService::Gmail, resp).await);
        }
        Ok(())
    }

    async fn send_reply(&self, original: &Email, reply: &str) -> Result<bool, MailError> {
        let body = self.reply_payload(original, reply)?;

        let resp = self
            .http
            .post(self.url("messages/send"))
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(status_error(EmailService::Gmail, resp).await);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %message, "Gmail refused message");
            return Ok(false);
        }
        Ok(true)
    }
}
