//! LLM-backed collaborators.
//!
//! Every call is one chat completion with a fixed system prompt. Structured
//! answers are requested as a single JSON object and parsed tolerantly
//! (markdown fences and surrounding prose are stripped first).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::agents::{Agents, Categorization, Category, Review};
use crate::error::AgentError;
use crate::knowledge::KnowledgeBase;
use crate::llm::{ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider};

/// Temperature for classification and review calls.
const DECISION_TEMPERATURE: f32 = 0.1;

/// Temperature for the writer.
const WRITER_TEMPERATURE: f32 = 0.5;

const DECISION_MAX_TOKENS: u32 = 512;
const WRITER_MAX_TOKENS: u32 = 1024;

/// Knowledge chunks handed to the answer step.
const CONTEXT_CHUNKS: usize = 4;

/// Upper bound on queries kept from the query designer.
const MAX_QUERIES: usize = 5;

/// Transcript entries starting with this prefix were written by the writer.
const DRAFT_PREFIX: &str = "**Draft";

// ── Prompts ─────────────────────────────────────────────────────────

const CATEGORIZER_PROMPT: &str = "You are an email triage assistant for a company's customer inbox.\n\
Classify the email into exactly one category:\n\
- \"product_enquiry\": asks about products, services, pricing, features or availability\n\
- \"customer_complaint\": reports a problem or expresses dissatisfaction\n\
- \"customer_feedback\": shares opinions, praise or suggestions\n\
- \"unrelated\": anything else (spam, newsletters, personal mail)\n\n\
Respond with ONLY a JSON object:\n\
{\"category\": \"...\", \"rationale\": \"one sentence\"}";

const QUERY_DESIGNER_PROMPT: &str = "You design search queries for an internal knowledge base.\n\
Read the customer email and write the smallest set of short, self-contained questions \
whose answers are needed to reply to it (at most 3).\n\n\
Respond with ONLY a JSON object:\n\
{\"queries\": [\"...\"]}";

const ANSWER_PROMPT: &str = "You answer questions using only the provided company information.\n\
Be concise and factual. If the information does not contain the answer, say \
\"I don't know\" rather than guessing.";

const WRITER_PROMPT: &str = "You are a customer support writer drafting email replies on behalf of the company.\n\
Use the email category, the customer's email and the provided information to write a \
helpful, polite, concise reply. Do not invent facts that are not in the information. \
If earlier drafts and proofreader feedback are present in the conversation, address \
every point of the feedback.\n\n\
Respond with ONLY a JSON object:\n\
{\"email\": \"full reply body\"}";

const PROOFREADER_PROMPT: &str = "You are a strict proofreader reviewing a drafted reply before it is sent.\n\
Check that the draft answers the customer's email, is accurate, polite and free of \
placeholders or errors.\n\n\
Respond with ONLY a JSON object:\n\
{\"send\": true|false, \"feedback\": \"what must change, or why it is ready\"}";

// ── Response shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CategoryResponse {
    category: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct QueriesResponse {
    #[serde(default)]
    queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WriterResponse {
    email: String,
}

#[derive(Debug, Deserialize)]
struct ProofreaderResponse {
    send: bool,
    #[serde(default)]
    feedback: String,
}

// ── Agents ──────────────────────────────────────────────────────────

/// Collaborators backed by one LLM provider and an optional knowledge base.
pub struct LlmAgents {
    llm: Arc<dyn LlmProvider>,
    knowledge: Option<Arc<KnowledgeBase>>,
}

impl LlmAgents {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            knowledge: None,
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    async fn ask(
        &self,
        agent: &'static str,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<CompletionResponse, AgentError> {
        let request = CompletionRequest::new(messages)
            .with_temperature(temperature)
            .with_max_tokens(max_tokens);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|source| AgentError::Llm { agent, source })?;

        debug!(
            agent,
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Agent call complete"
        );
        if response.finish_reason == FinishReason::Length {
            warn!(agent, max_tokens, "Agent response hit the token limit");
        }
        Ok(response)
    }

    fn context_for(&self, query: &str) -> String {
        let Some(ref kb) = self.knowledge else {
            return String::new();
        };
        kb.search(query, CONTEXT_CHUNKS)
            .into_iter()
            .map(|hit| format!("[{}]\n{}", hit.path, hit.snippet))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl Agents for LlmAgents {
    async fn categorize(&self, body: &str) -> Result<Categorization, AgentError> {
        const AGENT: &str = "categorizer";
        let response = self
            .ask(
                AGENT,
                vec![
                    ChatMessage::system(CATEGORIZER_PROMPT),
                    ChatMessage::user(format!("Email:\n{body}")),
                ],
                DECISION_TEMPERATURE,
                DECISION_MAX_TOKENS,
            )
            .await?;

        let parsed: CategoryResponse = parse_json(AGENT, &response)?;
        let category = parsed
            .category
            .parse::<Category>()
            .map_err(|reason| AgentError::InvalidResponse {
                agent: AGENT,
                reason,
            })?;

        Ok(Categorization {
            category,
            rationale: Some(parsed.rationale).filter(|r| !r.is_empty()),
        })
    }

    async fn design_queries(&self, body: &str) -> Result<Vec<String>, AgentError> {
        const AGENT: &str = "query designer";
        let response = self
            .ask(
                AGENT,
                vec![
                    ChatMessage::system(QUERY_DESIGNER_PROMPT),
                    ChatMessage::user(format!("Email:\n{body}")),
                ],
                DECISION_TEMPERATURE,
                DECISION_MAX_TOKENS,
            )
            .await?;

        let response: QueriesResponse = parse_json(AGENT, &response)?;
        Ok(response
            .queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(MAX_QUERIES)
            .collect())
    }

    async fn answer_query(&self, query: &str) -> Result<String, AgentError> {
        let context = self.context_for(query);
        let user = if context.is_empty() {
            format!("Company information: (none available)\n\nQuestion: {query}")
        } else {
            format!("Company information:\n{context}\n\nQuestion: {query}")
        };

        let answer = self
            .ask(
                "rag answerer",
                vec![ChatMessage::system(ANSWER_PROMPT), ChatMessage::user(user)],
                DECISION_TEMPERATURE,
                DECISION_MAX_TOKENS,
            )
            .await?;
        Ok(answer.content.trim().to_string())
    }

    async fn write_draft(&self, prompt: &str, history: &[String]) -> Result<String, AgentError> {
        const AGENT: &str = "writer";
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(WRITER_PROMPT));
        messages.extend(history.iter().map(|entry| {
            if entry.starts_with(DRAFT_PREFIX) {
                ChatMessage::assistant(entry.as_str())
            } else {
                ChatMessage::user(entry.as_str())
            }
        }));
        messages.push(ChatMessage::user(prompt));

        let response = self
            .ask(AGENT, messages, WRITER_TEMPERATURE, WRITER_MAX_TOKENS)
            .await?;
        let response: WriterResponse = parse_json(AGENT, &response)?;
        if response.email.trim().is_empty() {
            return Err(AgentError::InvalidResponse {
                agent: AGENT,
                reason: "empty draft".to_string(),
            });
        }
        Ok(response.email)
    }

    async fn proofread(&self, original: &str, draft: &str) -> Result<Review, AgentError> {
        const AGENT: &str = "proofreader";
        let response = self
            .ask(
                AGENT,
                vec![
                    ChatMessage::system(PROOFREADER_PROMPT),
                    ChatMessage::user(format!(
                        "# **INITIAL EMAIL:**\n{original}\n\n# **GENERATED REPLY:**\n{draft}"
                    )),
                ],
                DECISION_TEMPERATURE,
                DECISION_MAX_TOKENS,
            )
            .await?;

        let response: ProofreaderResponse = parse_json(AGENT, &response)?;
        Ok(Review {
            send: response.send,
            feedback: response.feedback,
        })
    }
}

// ── Response parsing ────────────────────────────────────────────────

fn parse_json<T: serde::de::DeserializeOwned>(
    agent: &'static str,
    response: &CompletionResponse,
) -> Result<T, AgentError> {
    serde_json::from_str(json_object_slice(&response.content)).map_err(|e| {
        let reason = match response.finish_reason {
            FinishReason::Length => format!("response cut off at the token limit: {e}"),
            FinishReason::Stop => format!("JSON parse error: {e}"),
        };
        AgentError::InvalidResponse { agent, reason }
    })
}

/// The outermost `{...}` of a reply, looking inside the first code fence if there is one.
fn json_object_slice(text: &str) -> &str {
    let body = match text.split_once("```") {
        Some((_, fenced)) => {
            let fenced = fenced.strip_prefix("json").unwrap_or(fenced);
            fenced.split_once("```").map_or(fenced, |(inner, _)| inner)
        }
        None => text,
    };
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => body.trim(),
    }
}
