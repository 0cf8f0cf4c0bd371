//! Workflow steps.
//!
//! Action steps call a collaborator and return a `StateUpdate`; branch steps
//! are pure functions of the state. Steps never mutate the state themselves.

use std::sync::Arc;

use crate::agents::{Agents, Category};
use crate::error::AgentError;
use crate::mail::MailProvider;

use super::state::{GraphState, StateUpdate};

/// Result of `check_new_emails`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxStatus {
    Empty,
    Process,
}

/// Result of `route_by_category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Needs knowledge retrieval before drafting.
    ProductRelated,
    /// Draft directly.
    NotProductRelated,
    Unrelated,
}

/// Result of `must_rewrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Send,
    Rewrite,
    Stop,
}

/// How a dispatch call went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Delivered,
    Failed(String),
}

/// The action steps, bound to their collaborators.
#[derive(Clone)]
pub struct Nodes {
    agents: Arc<dyn Agents>,
    mailbox: Arc<dyn MailProvider>,
}

impl Nodes {
    pub fn new(agents: Arc<dyn Agents>, mailbox: Arc<dyn MailProvider>) -> Self {
        Self { agents, mailbox }
    }

    /// Fetch unanswered emails. A provider failure yields an empty queue.
    pub async fn load_new_emails(&self) -> StateUpdate {
        let service = self.mailbox.service();
        tracing::info!(%service, "Loading new emails");

        let emails = match self.mailbox.fetch_unanswered().await {
            Ok(emails) => emails,
            Err(e) => {
                tracing::warn!(%service, error = %e, "Failed to fetch emails, continuing with none");
                Vec::new()
            }
        };

        StateUpdate {
            emails: Some(emails),
            ..Default::default()
        }
    }

    pub async fn categorize_email(&self, state: &GraphState) -> Result<StateUpdate, AgentError> {
        let Some(email) = state.emails.last().cloned() else {
            return Ok(StateUpdate::default());
        };

        let categorization = self.agents.categorize(&email.body).await?;
        tracing::info!(
            email_id = %email.id,
            category = %categorization.category,
            rationale = categorization.rationale.as_deref().unwrap_or(""),
            "Categorized email"
        );

        Ok(StateUpdate {
            current_email: Some(email),
            email_category: Some(categorization.category),
            ..Default::default()
        })
    }

    pub async fn construct_rag_queries(
        &self,
        state: &GraphState,
    ) -> Result<StateUpdate, AgentError> {
        let queries = self.agents.design_queries(current_body(state)).await?;
        tracing::info!(count = queries.len(), "Designed retrieval queries");

        Ok(StateUpdate {
            rag_queries: Some(queries),
            ..Default::default()
        })
    }

    /// Answer each query in order, appending to what was already retrieved.
    pub async fn retrieve_from_rag(&self, state: &GraphState) -> Result<StateUpdate, AgentError> {
        let mut documents = state.retrieved_documents.clone();
        for query in &state.rag_queries {
            let answer = self.agents.answer_query(query).await?;
            documents.push_str(&format!("{query}\n{answer}\n\n"));
        }
        tracing::debug!(
            queries = state.rag_queries.len(),
            chars = documents.len(),
            "Retrieved supporting information"
        );

        Ok(StateUpdate {
            retrieved_documents: Some(documents),
            ..Default::default()
        })
    }

    pub async fn write_draft_email(&self, state: &GraphState) -> Result<StateUpdate, AgentError> {
        let prompt = draft_prompt(state);
        let draft = self.agents.write_draft(&prompt, &state.writer_messages).await?;

        let trials = state.trials + 1;
        tracing::info!(trials, "Wrote draft");

        let mut messages = state.writer_messages.clone();
        messages.push(format!("**Draft {trials}:**\n{draft}"));

        Ok(StateUpdate {
            generated_email: Some(draft),
            writer_messages: Some(messages),
            trials: Some(trials),
            ..Default::default()
        })
    }

    pub async fn verify_generated_email(
        &self,
        state: &GraphState,
    ) -> Result<StateUpdate, AgentError> {
        let review = self
            .agents
            .proofread(current_body(state), &state.generated_email)
            .await?;
        tracing::info!(sendable = review.send, trials = state.trials, "Proofread draft");

        let mut messages = state.writer_messages.clone();
        messages.push(format!("**Proofreader Feedback:**\n{}", review.feedback));

        Ok(StateUpdate {
            writer_messages: Some(messages),
            sendable: Some(review.send),
            ..Default::default()
        })
    }

    /// Store the reply as a provider draft.
    pub async fn create_draft_response(&self, state: &GraphState) -> (StateUpdate, DispatchResult) {
        let result = match state.current_email.as_ref() {
            Some(email) => {
                match self
                    .mailbox
                    .create_draft_reply(email, &state.generated_email)
                    .await
                {
                    Ok(()) => {
                        tracing::info!(email_id = %email.id, "Created draft reply");
                        DispatchResult::Delivered
                    }
                    Err(e) => {
                        tracing::error!(email_id = %email.id, error = %e, "Failed to create draft reply");
                        DispatchResult::Failed(e.to_string())
                    }
                }
            }
            None => missing_current_email(),
        };
        (StateUpdate::reset_email_scope(), result)
    }

    /// Send the reply immediately.
    pub async fn send_email_response(&self, state: &GraphState) -> (StateUpdate, DispatchResult) {
        let result = match state.current_email.as_ref() {
            Some(email) => match self.mailbox.send_reply(email, &state.generated_email).await {
                Ok(true) => {
                    tracing::info!(email_id = %email.id, "Sent reply");
                    DispatchResult::Delivered
                }
                Ok(false) => {
                    tracing::error!(email_id = %email.id, "Provider refused to send reply");
                    DispatchResult::Failed("provider refused to send".to_string())
                }
                Err(e) => {
                    tracing::error!(email_id = %email.id, error = %e, "Failed to send reply");
                    DispatchResult::Failed(e.to_string())
                }
            },
            None => missing_current_email(),
        };
        (StateUpdate::reset_email_scope(), result)
    }
}

fn missing_current_email() -> DispatchResult {
    tracing::error!("No current email to reply to");
    DispatchResult::Failed("no current email".to_string())
}

fn current_body(state: &GraphState) -> &str {
    state
        .current_email
        .as_ref()
        .map(|e| e.body.as_str())
        .unwrap_or("")
}

/// Composite prompt handed to the writer.
pub fn draft_prompt(state: &GraphState) -> String {
    let category = state
        .email_category
        .map(|c| c.as_str())
        .unwrap_or_default();
    format!(
        "# **EMAIL CATEGORY:** {category}\n\n# **EMAIL CONTENT:**\n{}\n\n# **INFORMATION:**\n{}",
        current_body(state),
        state.retrieved_documents
    )
}

pub fn check_new_emails(state: &GraphState) -> InboxStatus {
    if state.emails.is_empty() {
        tracing::info!("No new emails");
        InboxStatus::Empty
    } else {
        tracing::info!(pending = state.emails.len(), "New emails to process");
        InboxStatus::Process
    }
}

pub fn route_by_category(state: &GraphState) -> Route {
    match state.email_category {
        Some(Category::ProductEnquiry) => Route::ProductRelated,
        Some(Category::Unrelated) => Route::Unrelated,
        _ => Route::NotProductRelated,
    }
}

/// Decide whether to dispatch, retry, or give up on the current draft.
///
/// `Send` and `Stop` both pop the current email and clear the writer transcript.
pub fn must_rewrite(state: &GraphState, max_trials: u32) -> (ReviewDecision, StateUpdate) {
    let finish = StateUpdate {
        pop_email: true,
        writer_messages: Some(Vec::new()),
        ..Default::default()
    };

    if state.sendable {
        (ReviewDecision::Send, finish)
    } else if state.trials >= max_trials {
        tracing::warn!(trials = state.trials, "Draft rejected too many times, giving up");
        (ReviewDecision::Stop, finish)
    } else {
        tracing::info!(trials = state.trials, "Draft rejected, rewriting");
        (ReviewDecision::Rewrite, StateUpdate::default())
    }
}

pub fn skip_unrelated_email(state: &GraphState) -> StateUpdate {
    if let Some(email) = state.emails.last() {
        tracing::info!(email_id = %email.id, subject = %email.subject, "Skipping unrelated email");
    }
    StateUpdate {
        pop_email: true,
        release_current: true,
        ..Default::default()
    }
}
