//! Agent collaborators used by the workflow.
//!
//! Each collaborator is a single request/response call. The workflow only
//! depends on the `Agents` trait; `LlmAgents` is the LLM-backed
//! implementation shipped with the binary.

mod llm_agents;

pub use llm_agents::LlmAgents;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Intent of an inbound email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ProductEnquiry,
    CustomerComplaint,
    CustomerFeedback,
    Unrelated,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Self::ProductEnquiry,
        Self::CustomerComplaint,
        Self::CustomerFeedback,
        Self::Unrelated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductEnquiry => "product_enquiry",
            Self::CustomerComplaint => "customer_complaint",
            Self::CustomerFeedback => "customer_feedback",
            Self::Unrelated => "unrelated",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

/// Result of categorization.
#[derive(Debug, Clone, PartialEq)]
pub struct Categorization {
    pub category: Category,
    pub rationale: Option<String>,
}

/// Proofreader verdict on a draft.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    /// Whether the draft may be dispatched as-is.
    pub send: bool,
    pub feedback: String,
}

/// The collaborator set the workflow calls into.
#[async_trait]
pub trait Agents: Send + Sync {
    /// Classify an email body.
    async fn categorize(&self, body: &str) -> Result<Categorization, AgentError>;

    /// Design retrieval queries for an email body, in the order they should be answered.
    async fn design_queries(&self, body: &str) -> Result<Vec<String>, AgentError>;

    /// Answer one retrieval query.
    async fn answer_query(&self, query: &str) -> Result<String, AgentError>;

    /// Write a reply given the composite prompt block and the writer transcript so far.
    async fn write_draft(&self, prompt: &str, history: &[String]) -> Result<String, AgentError>;

    /// Review a draft against the original email.
    async fn proofread(&self, original: &str, draft: &str) -> Result<Review, AgentError>;
}
