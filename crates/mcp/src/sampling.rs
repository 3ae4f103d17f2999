//! Summarizer that asks the client's model through MCP sampling.

use std::sync::Arc;

use {async_trait::async_trait, tracing::debug};

use qq_agent_context::{Message, Summarizer};

use crate::{
    transport::Peer,
    types::{CreateMessageParams, CreateMessageResult, Role, SamplingContent, SamplingMessage},
};

const DEFAULT_MAX_TOKENS: u32 = 8192;
const SYSTEM_PROMPT: &str = "你是一个聊天记录摘要助手。只输出摘要内容，不要添加任何前缀或解释。";
const INSTRUCTION: &str = "请将以下聊天记录压缩为一段简洁的中文摘要，保留关键信息（话题、观点、重要发言者）。\
摘要应在 300 字以内，不要使用列表格式，用自然段落描述。";

/// Sends `sampling/createMessage` to the connected client.
pub struct SamplingSummarizer {
    peer: Arc<Peer>,
    max_tokens: u32,
}

impl SamplingSummarizer {
    pub fn new(peer: Arc<Peer>) -> Self {
        Self {
            peer,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    fn params(&self, messages: &[Message]) -> CreateMessageParams {
        let chat_log = messages
            .iter()
            .map(|m| format!("[{}] {}: {}", m.timestamp, m.sender_name, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        CreateMessageParams {
            messages: vec![SamplingMessage {
                role: Role::User,
                content: SamplingContent::Text {
                    text: format!("{INSTRUCTION}\n\n聊天记录：\n{chat_log}"),
                },
            }],
            system_prompt: Some(SYSTEM_PROMPT.into()),
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl Summarizer for SamplingSummarizer {
    async fn summarize(&self, messages: &[Message]) -> qq_agent_context::Result<String> {
        use qq_agent_context::Error;

        if !self.peer.supports_sampling() {
            return Err(Error::Summarize("client does not support sampling".into()));
        }
        let params = serde_json::to_value(self.params(messages))
            .map_err(|e| Error::Summarize(e.to_string()))?;
        let value = self
            .peer
            .request("sampling/createMessage", Some(params))
            .await
            .map_err(|e| Error::Summarize(e.to_string()))?;
        let result: CreateMessageResult =
            serde_json::from_value(value).map_err(|e| Error::Summarize(e.to_string()))?;
        debug!(model = ?result.model, "sampling summary received");
        match result.content {
            SamplingContent::Text { text } => Ok(text.trim().to_string()),
            SamplingContent::Image { .. } => {
                Err(Error::Summarize("sampling returned non-text content".into()))
            },
        }
    }
}
