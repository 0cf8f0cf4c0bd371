//! Email triage workflow.
//!
//! ```text
//! load_new_emails -> check_new_emails -+-> (empty) end
//!                                      |
//!                                      +-> categorize_email -> route_by_category
//!                                            | product_enquiry: construct_rag_queries -> retrieve_from_rag -+
//!                                            | complaint/feedback: ---------------------------------------+-> write_draft_email
//!                                            | unrelated: skip_unrelated_email                             |     |
//!                                            v                                                             | verify_generated_email
//!                                      check_new_emails <-- dispatch / discard <-- must_rewrite (rewrite) -+
//! ```

pub mod graph;
pub mod nodes;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use graph::{EmailOutcome, OutcomeKind, RunSummary, Workflow};
pub use state::{GraphState, StateUpdate};
