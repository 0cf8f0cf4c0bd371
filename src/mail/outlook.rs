//! Microsoft Graph backend for Outlook / Hotmail / Live mailboxes.
//!
//! Unanswered = unread inbox messages received within the lookback window
//! that were not sent by the mailbox owner. Drafting or sending a reply marks
//! the original read, which takes it out of the next fetch.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::MailError;
use crate::mail::message::{Email, strip_html, strip_quoted_text};
use crate::mail::{EmailService, MailProvider, MailboxConfig, status_error};

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Max messages pulled per fetch.
const FETCH_LIMIT: u32 = 50;

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    #[serde(default)]
    conversation_id: String,
    #[serde(default)]
    internet_message_id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<Recipient>,
    #[serde(default)]
    body: Option<ItemBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody {
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    content: String,
}

impl GraphMessage {
    fn into_email(self) -> Email {
        let sender = self
            .from
            .map(|r| match (r.email_address.name, r.email_address.address) {
                (Some(name), Some(address)) if !name.is_empty() => format!("{name} <{address}>"),
                (_, Some(address)) => address,
                (Some(name), None) => name,
                (None, None) => String::new(),
            })
            .unwrap_or_default();

        let body = match self.body {
            Some(b) if b.content_type.eq_ignore_ascii_case("html") => strip_html(&b.content),
            Some(b) => b.content,
            None => String::new(),
        };

        Email {
            id: self.id,
            thread_id: self.conversation_id,
            message_id: self.internet_message_id,
            sender,
            subject: self
                .subject
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(no subject)".to_string()),
            body: strip_quoted_text(&body),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Microsoft Graph client bound to one mailbox.
pub struct OutlookClient {
    http: reqwest::Client,
    base_url: String,
    access_token: SecretString,
    address: String,
    lookback_hours: u32,
}

impl OutlookClient {
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

    /// `{base}/me/{segments...}` with every segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, MailError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| MailError::Build(format!("invalid Graph base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| MailError::Build(format!("Graph base URL has no path: {}", self.base_url)))?
            .pop_if_empty()
            .push("me")
            .extend(segments);
        Ok(url)
    }

    /// OData filter for unread mail inside the lookback window.
    ///
    /// Graph requires `$orderby` properties to lead the filter.
    fn filter(&self) -> String {
        let since = Utc::now() - chrono::Duration::hours(i64::from(self.lookback_hours));
        format!(
            "receivedDateTime ge {} and isRead eq false",
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// POST a `comment` reply action (`createReply` / `reply`) for a message.
    async fn post_reply_action(
        &self,
        original: &Email,
        action: &str,
        reply: &str,
    ) -> Result<reqwest::Response, MailError> {
        Ok(self
            .http
            .post(self.endpoint(&["messages", original.id.as_str(), action])?)
            .bearer_auth(self.access_token.expose_secret())
            .json(&serde_json::json!({ "comment": reply }))
            .send()
            .await?)
    }

    async fn mark_read(&self, original: &Email) -> Result<(), MailError> {
        let resp = self
            .http
            .patch(self.endpoint(&["messages", original.id.as_str()])?)
            .bearer_auth(self.access_token.expose_secret())
            .json(&serde_json::json!({ "isRead": true }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(EmailService::Outlook, resp).await);
        }
        Ok(())
    }

    /// The reply already exists, so a failed PATCH is only logged.
    async fn mark_handled(&self, original: &Email) {
        if let Err(e) = self.mark_read(original).await {
            warn!(email_id = %original.id, error = %e, "Could not mark message read");
        }
    }
}

#[async_trait]
impl MailProvider for OutlookClient {
    fn service(&self) -> EmailService {
        EmailService::Outlook
    }

    async fn fetch_unanswered(&self) -> Result<Vec<Email>, MailError> {
        let resp = self
            .http
            .get(self.endpoint(&["mailFolders", "inbox", "messages"])?)
            .bearer_auth(self.access_token.expose_secret())
            .header("Prefer", "outlook.body-content-type=\"text\"")
            .query(&[
                ("$filter", self.filter()),
                ("$orderby", "receivedDateTime desc".to_string()),
                ("$top", FETCH_LIMIT.to_string()),
                (
                    "$select",
                    "id,conversationId,internetMessageId,subject,from,body".to_string(),
                ),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(EmailService::Outlook, resp).await);
        }

        let list: MessageList = resp.json().await?;
        let owner = self.address.to_lowercase();
        let emails: Vec<Email> = list
            .value
            .into_iter()
            .map(GraphMessage::into_email)
            .filter(|e| !e.sender.is_empty() && e.sender_address() != owner)
            .collect();

        info!(count = emails.len(), "Fetched unanswered Outlook messages");
        Ok(emails)
    }

    async fn create_draft_reply(&self, original: &Email, reply: &str) -> Result<(), MailError> {
        let resp = self.post_reply_action(original, "createReply", reply).await?;
        if !resp.status().is_success() {
            return Err(status_error(EmailService::Outlook, resp).await);
        }
        self.mark_handled(original).await;
        Ok(())
    }

    async fn send_reply(&self, original: &Email, reply: &str) -> Result<bool, MailError> {
        let resp = self.post_reply_action(original, "reply", reply).await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(status_error(EmailService::Outlook, resp).await);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %message, "Graph refused reply");
            return Ok(false);
        }
        self.mark_handled(original).await;
        Ok(true)
    }
}
