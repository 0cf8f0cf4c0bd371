//! In-memory collaborators for workflow tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::agents::{Agents, Categorization, Category, Review};
use crate::error::{AgentError, MailError};
use crate::mail::{Email, EmailService, MailProvider};

pub fn email(id: &str) -> Email {
    Email {
        id: id.to_string(),
        thread_id: format!("thread-{id}"),
        message_id: format!("<{id}@example.com>"),
        sender: "Customer <customer@example.com>".to_string(),
        subject: format!("Subject {id}"),
        body: format!("Body of {id}"),
    }
}

/// Scripted collaborators that record every call.
pub struct MockAgents {
    category: Mutex<Category>,
    queries: Mutex<Vec<String>>,
    reviews: Mutex<VecDeque<bool>>,
    fail_categorize: Mutex<bool>,
    pub categorized: Mutex<Vec<String>>,
    pub designed: Mutex<usize>,
    answered: Mutex<Vec<String>>,
    drafts: Mutex<Vec<(String, Vec<String>)>>,
    pub proofread: Mutex<usize>,
}

impl MockAgents {
    /// Categorizes everything as a complaint and approves every draft.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            category: Mutex::new(Category::CustomerComplaint),
            queries: Mutex::new(vec!["q1".to_string(), "q2".to_string()]),
            reviews: Mutex::new(VecDeque::new()),
            fail_categorize: Mutex::new(false),
            categorized: Mutex::new(Vec::new()),
            designed: Mutex::new(0),
            answered: Mutex::new(Vec::new()),
            drafts: Mutex::new(Vec::new()),
            proofread: Mutex::new(0),
        })
    }

    pub fn with_category(self: Arc<Self>, category: Category) -> Arc<Self> {
        *self.category.lock().unwrap() = category;
        self
    }

    /// Proofreader verdicts, consumed in order; approves once exhausted.
    pub fn with_reviews(self: Arc<Self>, reviews: &[bool]) -> Arc<Self> {
        *self.reviews.lock().unwrap() = reviews.iter().copied().collect();
        self
    }

    pub fn failing_categorize(self: Arc<Self>) -> Arc<Self> {
        *self.fail_categorize.lock().unwrap() = true;
        self
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }

    pub fn draft_count(&self) -> usize {
        self.drafts.lock().unwrap().len()
    }

    pub fn last_draft_request(&self) -> Option<(String, Vec<String>)> {
        self.drafts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Agents for MockAgents {
    async fn categorize(&self, body: &str) -> Result<Categorization, AgentError> {
        if *self.fail_categorize.lock().unwrap() {
            return Err(AgentError::InvalidResponse {
                agent: "categorizer",
                reason: "scripted failure".to_string(),
            });
        }
        self.categorized.lock().unwrap().push(body.to_string());
        Ok(Categorization {
            category: *self.category.lock().unwrap(),
            rationale: None,
        })
    }

    async fn design_queries(&self, _body: &str) -> Result<Vec<String>, AgentError> {
        *self.designed.lock().unwrap() += 1;
        Ok(self.queries.lock().unwrap().clone())
    }

    async fn answer_query(&self, query: &str) -> Result<String, AgentError> {
        self.answered.lock().unwrap().push(query.to_string());
        Ok(format!("answer to {query}"))
    }

    async fn write_draft(&self, prompt: &str, history: &[String]) -> Result<String, AgentError> {
        let mut drafts = self.drafts.lock().unwrap();
        drafts.push((prompt.to_string(), history.to_vec()));
        Ok(format!("draft {}", drafts.len()))
    }

    async fn proofread(&self, _original: &str, _draft: &str) -> Result<Review, AgentError> {
        *self.proofread.lock().unwrap() += 1;
        let send = self.reviews.lock().unwrap().pop_front().unwrap_or(true);
        Ok(Review {
            send,
            feedback: if send { "looks good" } else { "needs work" }.to_string(),
        })
    }
}

/// Mailbox serving a fixed queue and recording replies.
#[derive(Default)]
pub struct MockMailbox {
    emails: Vec<Email>,
    fail_fetch: bool,
    fail_dispatch: bool,
    refuse_send: bool,
    pub drafts: Mutex<Vec<(String, String)>>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl MockMailbox {
    pub fn with_emails(emails: Vec<Email>) -> Arc<Self> {
        Arc::new(Self {
            emails,
            ..Default::default()
        })
    }

    pub fn failing_fetch() -> Arc<Self> {
        Arc::new(Self {
            fail_fetch: true,
            ..Default::default()
        })
    }

    pub fn failing_dispatch() -> Arc<Self> {
        Arc::new(Self {
            emails: vec![email("1")],
            fail_dispatch: true,
            ..Default::default()
        })
    }

    pub fn refusing_send() -> Arc<Self> {
        Arc::new(Self {
            emails: vec![email("1")],
            refuse_send: true,
            ..Default::default()
        })
    }

    pub fn dispatched(&self) -> usize {
        self.drafts.lock().unwrap().len() + self.sent.lock().unwrap().len()
    }

    fn api_error() -> MailError {
        MailError::Api {
            service: "gmail".to_string(),
            status: 503,
            message: "unavailable".to_string(),
        }
    }
}

#[async_trait]
impl MailProvider for MockMailbox {
    fn service(&self) -> EmailService {
        EmailService::Gmail
    }

    async fn fetch_unanswered(&self) -> Result<Vec<Email>, MailError> {
        if self.fail_fetch {
            return Err(Self::api_error());
        }
        Ok(self.emails.clone())
    }

    async fn create_draft_reply(&self, original: &Email, reply: &str) -> Result<(), MailError> {
        if self.fail_dispatch {
            return Err(Self::api_error());
        }
        self.drafts
            .lock()
            .unwrap()
            .push((original.id.clone(), reply.to_string()));
        Ok(())
    }

    async fn send_reply(&self, original: &Email, reply: &str) -> Result<bool, MailError> {
        if self.fail_dispatch {
            return Err(Self::api_error());
        }
        if self.refuse_send {
            return Ok(false);
        }
        self.sent
            .lock()
            .unwrap()
            .push((original.id.clone(), reply.to_string()));
        Ok(true)
    }
}
