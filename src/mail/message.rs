//! The `Email` record plus provider-independent message helpers:
//! quote stripping, HTML flattening, raw RFC 5322 parsing and reply building.

use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};

use crate::error::MailError;

/// One inbound message under processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// Provider message id.
    pub id: String,
    /// Provider thread / conversation id.
    pub thread_id: String,
    /// RFC 5322 `Message-ID` header, empty when the provider did not expose it.
    #[serde(default)]
    pub message_id: String,
    /// `From` header as received (may include a display name).
    pub sender: String,
    pub subject: String,
    /// Plain-text body with quoted history removed.
    pub body: String,
}

impl Email {
    /// Bare address of the sender, lowercased.
    pub fn sender_address(&self) -> String {
        bare_address(&self.sender)
    }
}

/// Extract the bare address from a `From`-style header value.
///
/// `"Alice <Alice@Example.com>"` → `"alice@example.com"`.
pub fn bare_address(value: &str) -> String {
    let value = value.trim();
    let inner = match (value.rfind('<'), value.rfind('>')) {
        (Some(start), Some(end)) if end > start => &value[start + 1..end],
        _ => value,
    };
    inner.trim().to_lowercase()
}

/// Reply subject: prefixes `Re: ` unless already present.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.len() >= 3 && trimmed[..3].eq_ignore_ascii_case("re:") {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: (no subject)".to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Strip quoted text from an email body.
///
/// Removes:
/// - Lines starting with `>` (quoted reply lines)
/// - "On ... wrote:" attribution lines and everything after them
/// - "--- Original Message ---" separators and everything after them
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }

        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a raw RFC 5322 message into an `Email`.
pub fn parse_raw_email(id: &str, thread_id: &str, raw: &[u8]) -> Result<Email, MailError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Malformed {
            id: id.to_string(),
            reason: "not an RFC 5322 message".to_string(),
        })?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .map(|a| match (a.name(), a.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        })
        .unwrap_or_default();

    if sender.is_empty() {
        return Err(MailError::Malformed {
            id: id.to_string(),
            reason: "missing From header".to_string(),
        });
    }

    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    Ok(Email {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        message_id: parsed
            .message_id()
            .map(|m| format!("<{}>", m.trim_matches(|c| c == '<' || c == '>')))
            .unwrap_or_default(),
        sender,
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        body: strip_quoted_text(&body),
    })
}

/// Build an RFC 5322 reply to `original` from `from_address`.
///
/// Threading headers are set when the original carries a `Message-ID`.
pub fn build_reply(from_address: &str, original: &Email, reply: &str) -> Result<Vec<u8>, MailError> {
    let from: Mailbox = from_address
        .parse()
        .map_err(|e| MailError::Build(format!("invalid from address '{from_address}': {e}")))?;
    let to: Mailbox = original
        .sender
        .parse()
        .or_else(|_| original.sender_address().parse())
        .map_err(|e| MailError::Build(format!("invalid recipient '{}': {e}", original.sender)))?;

    let mut builder = lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(reply_subject(&original.subject))
        .header(ContentType::TEXT_PLAIN);

    if !original.message_id.is_empty() {
        builder = builder
            .in_reply_to(original.message_id.clone())
            .references(original.message_id.clone());
    }

    let message = builder
        .body(reply.to_string())
        .map_err(|e| MailError::Build(e.to_string()))?;

    Ok(message.formatted())
}
