//! Mail provider adapter.
//!
//! The mailbox address decides which backend is used:
//! - `gmail.com` → Gmail REST API
//! - `outlook.com`, `hotmail.com`, `live.com` → Microsoft Graph
//! - anything else → Gmail (custom domains can force a backend with
//!   `MAIL_ASSIST_SERVICE`)
//!
//! Both backends expose the same three capabilities through `MailProvider`.

pub mod gmail;
pub mod message;
pub mod outlook;

pub use gmail::GmailClient;
pub use message::Email;
pub use outlook::OutlookClient;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::MailError;

/// Microsoft consumer domains served by Outlook.
const OUTLOOK_DOMAINS: &[&str] = &["outlook.com", "hotmail.com", "live.com"];

/// Timeout applied to every provider HTTP call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Supported mail services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailService {
    Gmail,
    Outlook,
}

impl EmailService {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
        }
    }

    /// Environment variable holding this service's OAuth access token.
    pub fn token_var(&self) -> &'static str {
        match self {
            Self::Gmail => "GMAIL_ACCESS_TOKEN",
            Self::Outlook => "OUTLOOK_ACCESS_TOKEN",
        }
    }
}

impl fmt::Display for EmailService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailService {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "outlook" => Ok(Self::Outlook),
            other => Err(MailError::UnsupportedService(other.to_string())),
        }
    }
}

/// Detect the mail service from an address.
///
/// Pure: only the domain part (after the first `@`) is inspected.
/// Unrecognized domains fall back to Gmail.
pub fn detect_service(address: &str) -> EmailService {
    let lower = address.to_lowercase();
    let domain = lower.split_once('@').map(|(_, d)| d).unwrap_or("");

    if domain.contains("gmail.com") {
        EmailService::Gmail
    } else if OUTLOOK_DOMAINS.iter().any(|d| domain.contains(d)) {
        EmailService::Outlook
    } else {
        EmailService::Gmail
    }
}

/// Uniform capability set over mail backends.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Which service this provider talks to.
    fn service(&self) -> EmailService;

    /// Fetch messages that are still waiting for a reply.
    async fn fetch_unanswered(&self) -> Result<Vec<Email>, MailError>;

    /// Store `reply` as a draft answer to `original`.
    async fn create_draft_reply(&self, original: &Email, reply: &str) -> Result<(), MailError>;

    /// Send `reply` as an answer to `original`. `Ok(false)` means the
    /// provider refused the message without a transport error.
    async fn send_reply(&self, original: &Email, reply: &str) -> Result<bool, MailError>;
}

/// Settings needed to construct a backend.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    /// Mailbox owner address.
    pub address: String,
    /// Resolved service (detected or overridden).
    pub service: EmailService,
    /// OAuth bearer token for the service.
    pub access_token: SecretString,
    /// Only messages received within this window are fetched.
    pub lookback_hours: u32,
    /// API base URL override (tests, proxies).
    pub base_url: Option<String>,
}

/// The closed set of mail backends.
pub enum MailBackend {
    Gmail(GmailClient),
    Outlook(OutlookClient),
}

/// Build the backend for `config.service`.
pub fn create_mail_backend(config: &MailboxConfig) -> Result<MailBackend, MailError> {
    let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

    let backend = match config.service {
        EmailService::Gmail => MailBackend::Gmail(GmailClient::new(http, config)),
        EmailService::Outlook => MailBackend::Outlook(OutlookClient::new(http, config)),
    };

    tracing::info!(
        service = %config.service,
        address = %config.address,
        "Initialized email service"
    );
    Ok(backend)
}

#[async_trait]
impl MailProvider for MailBackend {
    fn service(&self) -> EmailService {
        match self {
            Self::Gmail(_) => EmailService::Gmail,
            Self::Outlook(_) => EmailService::Outlook,
        }
    }

    async fn fetch_unanswered(&self) -> Result<Vec<Email>, MailError> {
        match self {
            Self::Gmail(c) => c.fetch_unanswered().await,
            Self::Outlook(c) => c.fetch_unanswered().await,
        }
    }

    async fn create_draft_reply(&self, original: &Email, reply: &str) -> Result<(), MailError> {
        match self {
            Self::Gmail(c) => c.create_draft_reply(original, reply).await,
            Self::Outlook(c) => c.create_draft_reply(original, reply).await,
        }
    }

    async fn send_reply(&self, original: &Email, reply: &str) -> Result<bool, MailError> {
        match self {
            Self::Gmail(c) => c.send_reply(original, reply).await,
            Self::Outlook(c) => c.send_reply(original, reply).await,
        }
    }
}

/// Map a non-success HTTP response to a `MailError`.
pub(crate) async fn status_error(service: EmailService, resp: reqwest::Response) -> MailError {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return MailError::AuthExpired {
            service: service.to_string(),
        };
    }
    let message = resp.text().await.unwrap_or_default();
    MailError::Api {
        service: service.to_string(),
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(service: EmailService) -> MailboxConfig {
        MailboxConfig {
            address: "owner@example.com".into(),
            service,
            access_token: SecretString::from("token"),
            lookback_hours: 8,
            base_url: None,
        }
    }

    #[test]
    fn gmail_address_resolves_to_gmail() {
        assert_eq!(detect_service("user@gmail.com"), EmailService::Gmail);
        assert_eq!(detect_service("User@GMAIL.COM"), EmailService::Gmail);
    }

    #[test]
    fn microsoft_addresses_resolve_to_outlook() {
        assert_eq!(detect_service("user@hotmail.com"), EmailService::Outlook);
        assert_eq!(detect_service("user@outlook.com"), EmailService::Outlook);
        assert_eq!(detect_service("user@live.com"), EmailService::Outlook);
    }

    #[test]
    fn custom_domain_falls_back_to_gmail() {
        assert_eq!(detect_service("user@company.io"), EmailService::Gmail);
    }

    #[test]
    fn address_without_domain_falls_back_to_gmail() {
        assert_eq!(detect_service("not-an-address"), EmailService::Gmail);
    }

    #[test]
    fn only_domain_part_is_inspected() {
        assert_eq!(detect_service("hotmail.com@company.io"), EmailService::Gmail);
    }

    #[test]
    fn service_override_parses() {
        assert_eq!("Outlook".parse::<EmailService>().unwrap(), EmailService::Outlook);
        assert_eq!("gmail".parse::<EmailService>().unwrap(), EmailService::Gmail);
        let err = "yahoo".parse::<EmailService>().unwrap_err();
        assert!(matches!(err, MailError::UnsupportedService(ref s) if s == "yahoo"));
    }

    #[test]
    fn factory_builds_matching_backend() {
        let gmail = create_mail_backend(&config(EmailService::Gmail)).unwrap();
        assert_eq!(gmail.service(), EmailService::Gmail);
        assert!(matches!(gmail, MailBackend::Gmail(_)));

        let outlook = create_mail_backend(&config(EmailService::Outlook)).unwrap();
        assert_eq!(outlook.service(), EmailService::Outlook);
        assert!(matches!(outlook, MailBackend::Outlook(_)));
    }
}
