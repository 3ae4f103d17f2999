//! Summarization of compressed message batches.

use {async_trait::async_trait, serde::Serialize};

use crate::{error::Result, message::Message};

const RULE_CONTENT_CHARS: usize = 80;

/// Produces one summary string for a batch of messages, oldest first.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Result<String>;

    /// How results of this summarizer are labelled.
    fn method(&self) -> CompressMethod {
        CompressMethod::Llm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressMethod {
    Llm,
    RuleBased,
}

/// Deterministic fallback used when the preferred summarizer fails.
pub struct RuleBasedSummarizer;

#[async_trait]
impl Summarizer for RuleBasedSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String> {
        Ok(rule_based_summary(messages))
    }

    fn method(&self) -> CompressMethod {
        CompressMethod::RuleBased
    }
}

/// `[<first ts> ~ <last ts>] name: content | name: content ...`
#[must_use]
pub fn rule_based_summary(messages: &[Message]) -> String {
    let (Some(first), Some(last)) = (messages.first(), messages.last()) else {
        return String::new();
    };
    let body = messages
        .iter()
        .map(|m| {
            let content = match m.content.char_indices().nth(RULE_CONTENT_CHARS) {
                Some((idx, _)) => format!("{}...", &m.content[..idx]),
                None => m.content.clone(),
            };
            format!("{}: {content}", m.sender_name)
        })
        .collect::<Vec<_>>()
        .join(" | ");
    format!("[{} ~ {}] {body}", first.timestamp, last.timestamp)
}
