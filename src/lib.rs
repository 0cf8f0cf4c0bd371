//! Mail Assist: LLM-driven email triage and reply drafting.

pub mod agents;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod mail;
pub mod workflow;
