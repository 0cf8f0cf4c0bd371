//! Workflow state record and the deltas steps return.

use crate::agents::Category;
use crate::mail::Email;

/// The single record threaded through every workflow step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphState {
    /// Work queue; the last element is the email being processed.
    pub emails: Vec<Email>,
    /// Snapshot of the email being processed, taken at categorization.
    pub current_email: Option<Email>,
    pub email_category: Option<Category>,
    pub rag_queries: Vec<String>,
    /// Accumulated `query\nanswer\n\n` blocks.
    pub retrieved_documents: String,
    /// Latest draft body.
    pub generated_email: String,
    /// Drafts and proofreader feedback for the current email.
    pub writer_messages: Vec<String>,
    /// Draft attempts for the current email.
    pub trials: u32,
    /// Proofreader verdict on the latest draft.
    pub sendable: bool,
}

/// Changes produced by one step. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub emails: Option<Vec<Email>>,
    /// Remove the last element of `emails` (applied after `emails`).
    pub pop_email: bool,
    pub current_email: Option<Email>,
    pub email_category: Option<Category>,
    /// Drop `current_email` and `email_category` (applied after both).
    pub release_current: bool,
    pub rag_queries: Option<Vec<String>>,
    pub retrieved_documents: Option<String>,
    pub generated_email: Option<String>,
    pub writer_messages: Option<Vec<String>>,
    pub trials: Option<u32>,
    pub sendable: Option<bool>,
}

impl StateUpdate {
    /// Clears everything scoped to one email once it is finished.
    pub fn reset_email_scope() -> Self {
        Self {
            release_current: true,
            rag_queries: Some(Vec::new()),
            retrieved_documents: Some(String::new()),
            trials: Some(0),
            ..Self::default()
        }
    }
}

impl GraphState {
    /// Merge a step's update into the state.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(emails) = update.emails {
            self.emails = emails;
        }
        if update.pop_email {
            self.emails.pop();
        }
        if let Some(email) = update.current_email {
            self.current_email = Some(email);
        }
        if let Some(category) = update.email_category {
            self.email_category = Some(category);
        }
        if update.release_current {
            self.current_email = None;
            self.email_category = None;
        }
        if let Some(queries) = update.rag_queries {
            self.rag_queries = queries;
        }
        if let Some(documents) = update.retrieved_documents {
            self.retrieved_documents = documents;
        }
        if let Some(draft) = update.generated_email {
            self.generated_email = draft;
        }
        if let Some(messages) = update.writer_messages {
            self.writer_messages = messages;
        }
        if let Some(trials) = update.trials {
            self.trials = trials;
        }
        if let Some(sendable) = update.sendable {
            self.sendable = sendable;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(id: &str) -> Email {
        Email {
            id: id.into(),
            thread_id: id.into(),
            message_id: String::new(),
            sender: "a@example.com".into(),
            subject: "s".into(),
            body: "b".into(),
        }
    }

    #[test]
    fn empty_update_changes_nothing() {
        let mut state = GraphState {
            emails: vec![email("1")],
            trials: 2,
            ..Default::default()
        };
        let before = state.clone();
        state.apply(StateUpdate::default());
        assert_eq!(state, before);
    }

    #[test]
    fn pop_applies_after_replacement() {
        let mut state = GraphState::default();
        state.apply(StateUpdate {
            emails: Some(vec![email("1"), email("2")]),
            pop_email: true,
            ..Default::default()
        });
        assert_eq!(state.emails, vec![email("1")]);
    }

    #[test]
    fn pop_on_empty_queue_is_noop() {
        let mut state = GraphState::default();
        state.apply(StateUpdate {
            pop_email: true,
            ..Default::default()
        });
        assert!(state.emails.is_empty());
    }

    #[test]
    fn reset_email_scope_clears_retrieval_and_trials() {
        let mut state = GraphState {
            current_email: Some(email("1")),
            email_category: Some(Category::CustomerComplaint),
            rag_queries: vec!["q".into()],
            retrieved_documents: "q\na\n\n".into(),
            trials: 3,
            generated_email: "draft".into(),
            ..Default::default()
        };
        state.apply(StateUpdate::reset_email_scope());
        assert!(state.rag_queries.is_empty());
        assert!(state.retrieved_documents.is_empty());
        assert_eq!(state.trials, 0);
        assert_eq!(state.generated_email, "draft");
        assert!(state.current_email.is_none());
        assert!(state.email_category.is_none());
    }
}
