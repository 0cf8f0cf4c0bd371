//! Runner that drives the steps for one pass over the inbox.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agents::{Agents, Category};
use crate::config::{DispatchMode, WorkflowConfig};
use crate::error::{AgentError, Result};
use crate::mail::MailProvider;

use super::nodes::{
    DispatchResult, InboxStatus, Nodes, ReviewDecision, Route, check_new_emails, must_rewrite,
    route_by_category, skip_unrelated_email,
};
use super::state::{GraphState, StateUpdate};

/// Terminal outcome for one email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Reply stored as a provider draft.
    Drafted,
    /// Reply sent.
    Sent,
    /// The provider rejected the draft/send call.
    DispatchFailed { reason: String },
    /// Every draft was rejected by the proofreader; nothing was dispatched.
    Discarded,
    /// Categorized as unrelated.
    Skipped,
}

/// Event emitted after each email leaves the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailOutcome {
    pub email_id: String,
    pub subject: String,
    pub category: Option<Category>,
    /// Draft attempts made for this email.
    pub trials: u32,
    pub kind: OutcomeKind,
}

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub fetched: usize,
    pub outcomes: Vec<EmailOutcome>,
}

impl RunSummary {
    pub fn count(&self, pred: impl Fn(&OutcomeKind) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.kind)).count()
    }
}

/// The email triage workflow.
pub struct Workflow {
    nodes: Nodes,
    config: WorkflowConfig,
    events: Option<mpsc::UnboundedSender<EmailOutcome>>,
}

impl Workflow {
    pub fn new(
        agents: Arc<dyn Agents>,
        mailbox: Arc<dyn MailProvider>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            nodes: Nodes::new(agents, mailbox),
            config,
            events: None,
        }
    }

    /// Publish every outcome on `tx` as it happens.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<EmailOutcome>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Fetch the inbox and process every email until the queue is empty.
    ///
    /// Mail failures are contained; a collaborator failure aborts the run.
    pub async fn run(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, "Starting workflow run");

        let mut state = GraphState::default();
        state.apply(self.nodes.load_new_emails().await);

        let mut summary = RunSummary {
            fetched: state.emails.len(),
            outcomes: Vec::new(),
        };

        while check_new_emails(&state) == InboxStatus::Process {
            let Some(outcome) = self.process_next(&mut state).await? else {
                break;
            };
            self.publish(&outcome);
            summary.outcomes.push(outcome);
        }

        tracing::info!(
            %run_id,
            fetched = summary.fetched,
            processed = summary.outcomes.len(),
            "Workflow run complete"
        );
        Ok(summary)
    }

    /// Take the last email in the queue from categorization to its terminal step.
    ///
    /// Returns `None` without calling any collaborator when the queue is empty.
    pub async fn process_next(
        &self,
        state: &mut GraphState,
    ) -> std::result::Result<Option<EmailOutcome>, AgentError> {
        if state.emails.is_empty() {
            return Ok(None);
        }
        let update = self.nodes.categorize_email(state).await?;
        state.apply(update);

        match route_by_category(state) {
            Route::Unrelated => {
                let outcome = outcome(state, OutcomeKind::Skipped);
                let update = skip_unrelated_email(state);
                state.apply(update);
                return Ok(Some(outcome));
            }
            Route::ProductRelated => {
                let update = self.nodes.construct_rag_queries(state).await?;
                state.apply(update);
                let update = self.nodes.retrieve_from_rag(state).await?;
                state.apply(update);
            }
            Route::NotProductRelated => {}
        }

        loop {
            let update = self.nodes.write_draft_email(state).await?;
            state.apply(update);
            let update = self.nodes.verify_generated_email(state).await?;
            state.apply(update);

            let (decision, update) = must_rewrite(state, self.config.max_trials);
            state.apply(update);

            match decision {
                ReviewDecision::Rewrite => continue,
                ReviewDecision::Send => return Ok(Some(self.dispatch(state).await)),
                ReviewDecision::Stop => {
                    let outcome = outcome(state, OutcomeKind::Discarded);
                    tracing::warn!(
                        email_id = %outcome.email_id,
                        subject = %outcome.subject,
                        trials = outcome.trials,
                        "Discarded email after exhausting rewrites"
                    );
                    state.apply(StateUpdate::reset_email_scope());
                    return Ok(Some(outcome));
                }
            }
        }
    }

    async fn dispatch(&self, state: &mut GraphState) -> EmailOutcome {
        let (update, result) = match self.config.dispatch {
            DispatchMode::Draft => self.nodes.create_draft_response(state).await,
            DispatchMode::Send => self.nodes.send_email_response(state).await,
        };

        let kind = match (result, self.config.dispatch) {
            (DispatchResult::Delivered, DispatchMode::Draft) => OutcomeKind::Drafted,
            (DispatchResult::Delivered, DispatchMode::Send) => OutcomeKind::Sent,
            (DispatchResult::Failed(reason), _) => OutcomeKind::DispatchFailed { reason },
        };
        let outcome = outcome(state, kind);
        state.apply(update);
        outcome
    }

    fn publish(&self, outcome: &EmailOutcome) {
        if let Some(tx) = &self.events {
            if tx.send(outcome.clone()).is_err() {
                tracing::debug!("Outcome receiver dropped");
            }
        }
    }
}

fn outcome(state: &GraphState, kind: OutcomeKind) -> EmailOutcome {
    let (email_id, subject) = state
        .current_email
        .as_ref()
        .map(|e| (e.id.clone(), e.subject.clone()))
        .unwrap_or_default();
    EmailOutcome {
        email_id,
        subject,
        category: state.email_category,
        trials: state.trials,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::workflow::testing::{MockAgents, MockMailbox, email};

    fn workflow(
        agents: &Arc<MockAgents>,
        mailbox: &Arc<MockMailbox>,
        dispatch: DispatchMode,
    ) -> Workflow {
        Workflow::new(
            agents.clone(),
            mailbox.clone(),
            WorkflowConfig {
                dispatch,
                max_trials: 3,
            },
        )
    }

    fn queued(ids: &[&str]) -> GraphState {
        GraphState {
            emails: ids.iter().map(|id| email(id)).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn empty_inbox_ends_without_categorizing() {
        let agents = MockAgents::new();
        let mailbox = MockMailbox::with_emails(vec![]);
        let summary = workflow(&agents, &mailbox, DispatchMode::Draft).run().await.unwrap();

        assert_eq!(summary.fetched, 0);
        assert!(summary.outcomes.is_empty());
        assert!(agents.categorized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_is_an_empty_run() {
        let agents = MockAgents::new();
        let mailbox = MockMailbox::failing_fetch();
        let summary = workflow(&agents, &mailbox, DispatchMode::Draft).run().await.unwrap();
        assert_eq!(summary.fetched, 0);
        assert!(summary.outcomes.is_empty());
    }

    #[tokio::test]
    async fn unrelated_email_is_skipped_without_drafting() {
        let agents = MockAgents::new().with_category(Category::Unrelated);
        let mailbox = MockMailbox::with_emails(vec![]);
        let wf = workflow(&agents, &mailbox, DispatchMode::Send);
        let mut state = queued(&["1", "2"]);

        let outcome = wf.process_next(&mut state).await.unwrap().unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Skipped);
        assert_eq!(outcome.email_id, "2");
        assert_eq!(outcome.category, Some(Category::Unrelated));
        assert_eq!(state.emails.len(), 1);
        assert!(state.current_email.is_none());
        assert_eq!(agents.draft_count(), 0);
        assert_eq!(mailbox.dispatched(), 0);
    }

    #[tokio::test]
    async fn approved_on_third_attempt_is_dispatched() {
        let agents = MockAgents::new().with_reviews(&[false, false, true]);
        let mailbox = MockMailbox::with_emails(vec![]);
        let wf = workflow(&agents, &mailbox, DispatchMode::Draft);
        let mut state = queued(&["1"]);

        let outcome = wf.process_next(&mut state).await.unwrap().unwrap();
        assert_eq!(agents.draft_count(), 3);
        assert_eq!(outcome.trials, 3);
        assert_eq!(outcome.kind, OutcomeKind::Drafted);
        assert_eq!(
            *mailbox.drafts.lock().unwrap(),
            vec![("1".to_string(), "draft 3".to_string())]
        );

        // Writer saw its earlier drafts and the feedback on them.
        let (_, history) = agents.last_draft_request().unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], "**Draft 1:**\ndraft 1");
        assert_eq!(history[3], "**Proofreader Feedback:**\nneeds work");

        assert!(state.emails.is_empty());
        assert!(state.writer_messages.is_empty());
        assert_eq!(state.trials, 0);
        assert!(state.retrieved_documents.is_empty());
    }

    #[tokio::test]
    async fn exhausted_rewrites_are_discarded() {
        let agents = MockAgents::new().with_reviews(&[false, false, false, false]);
        let mailbox = MockMailbox::with_emails(vec![email("1")]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let wf = workflow(&agents, &mailbox, DispatchMode::Send).with_events(tx);

        let summary = wf.run().await.unwrap();
        assert_eq!(agents.draft_count(), 3);
        assert_eq!(mailbox.dispatched(), 0);
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(summary.outcomes[0].kind, OutcomeKind::Discarded);
        assert_eq!(summary.outcomes[0].trials, 3);

        let event = rx.try_recv().unwrap();
        assert_eq!(event, summary.outcomes[0]);
    }

    #[tokio::test]
    async fn stop_clears_per_email_state() {
        let agents = MockAgents::new()
            .with_category(Category::ProductEnquiry)
            .with_reviews(&[false, false, false]);
        let mailbox = MockMailbox::with_emails(vec![]);
        let wf = workflow(&agents, &mailbox, DispatchMode::Draft);
        let mut state = queued(&["1", "2"]);

        let outcome = wf.process_next(&mut state).await.unwrap().unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Discarded);
        assert_eq!(state.emails.len(), 1);
        assert!(state.writer_messages.is_empty());
        assert_eq!(state.trials, 0);
        assert!(state.retrieved_documents.is_empty());
        assert!(state.rag_queries.is_empty());
        assert!(state.current_email.is_none());
        assert!(state.email_category.is_none());
    }

    #[tokio::test]
    async fn drained_queue_does_not_redispatch_last_email() {
        let agents = MockAgents::new();
        let mailbox = MockMailbox::with_emails(vec![]);
        let wf = workflow(&agents, &mailbox, DispatchMode::Send);
        let mut state = queued(&["1"]);

        let outcome = wf.process_next(&mut state).await.unwrap().unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Sent);
        assert!(state.current_email.is_none());

        assert!(wf.process_next(&mut state).await.unwrap().is_none());
        assert_eq!(mailbox.dispatched(), 1);
        assert_eq!(agents.draft_count(), 1);
        assert_eq!(agents.categorized.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn product_enquiry_retrieves_before_drafting() {
        let agents = MockAgents::new().with_category(Category::ProductEnquiry);
        let mailbox = MockMailbox::with_emails(vec![]);
        let wf = workflow(&agents, &mailbox, DispatchMode::Send);
        let mut state = queued(&["1"]);

        let outcome = wf.process_next(&mut state).await.unwrap().unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Sent);
        assert_eq!(*agents.designed.lock().unwrap(), 1);
        assert_eq!(agents.answered(), vec!["q1".to_string(), "q2".to_string()]);

        let (prompt, _) = agents.last_draft_request().unwrap();
        assert!(prompt.starts_with("# **EMAIL CATEGORY:** product_enquiry"));
        assert!(prompt.ends_with("# **INFORMATION:**\nq1\nanswer to q1\n\nq2\nanswer to q2\n\n"));
        assert!(state.retrieved_documents.is_empty());
    }

    #[tokio::test]
    async fn other_categories_skip_retrieval() {
        for category in [Category::CustomerComplaint, Category::CustomerFeedback] {
            let agents = MockAgents::new().with_category(category);
            let mailbox = MockMailbox::with_emails(vec![]);
            let wf = workflow(&agents, &mailbox, DispatchMode::Draft);
            let mut state = queued(&["1"]);

            wf.process_next(&mut state).await.unwrap();
            assert_eq!(*agents.designed.lock().unwrap(), 0);
            assert!(agents.answered().is_empty());
            let (prompt, _) = agents.last_draft_request().unwrap();
            assert!(prompt.ends_with("# **INFORMATION:**\n"));
        }
    }

    #[tokio::test]
    async fn failed_dispatch_is_reported_and_run_continues() {
        let agents = MockAgents::new();
        let mailbox = MockMailbox::failing_dispatch();
        let summary = workflow(&agents, &mailbox, DispatchMode::Draft).run().await.unwrap();

        assert_eq!(summary.outcomes.len(), 1);
        assert!(matches!(
            summary.outcomes[0].kind,
            OutcomeKind::DispatchFailed { .. }
        ));
    }

    #[tokio::test]
    async fn processes_queue_from_the_back() {
        let agents = MockAgents::new();
        let mailbox = MockMailbox::with_emails(vec![email("a"), email("b"), email("c")]);
        let summary = workflow(&agents, &mailbox, DispatchMode::Send).run().await.unwrap();

        assert_eq!(summary.fetched, 3);
        let order: Vec<_> = summary.outcomes.iter().map(|o| o.email_id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
        assert_eq!(summary.count(|k| *k == OutcomeKind::Sent), 3);
        assert!(summary.outcomes.iter().all(|o| o.trials == 1));
    }

    #[tokio::test]
    async fn collaborator_failure_aborts_run() {
        let agents = MockAgents::new().failing_categorize();
        let mailbox = MockMailbox::with_emails(vec![email("1")]);
        let err = workflow(&agents, &mailbox, DispatchMode::Draft)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::InvalidResponse { .. })));
        assert_eq!(mailbox.dispatched(), 0);
    }

    #[tokio::test]
    async fn max_trials_of_one_discards_after_first_rejection() {
        let agents = MockAgents::new().with_reviews(&[false]);
        let mailbox = MockMailbox::with_emails(vec![email("1")]);
        let wf = Workflow::new(
            agents.clone(),
            mailbox.clone(),
            WorkflowConfig {
                dispatch: DispatchMode::Draft,
                max_trials: 1,
            },
        );
        let summary = wf.run().await.unwrap();
        assert_eq!(agents.draft_count(), 1);
        assert_eq!(summary.outcomes[0].kind, OutcomeKind::Discarded);
    }
}
