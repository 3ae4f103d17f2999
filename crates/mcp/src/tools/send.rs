use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::{Value, json},
};

use qq_agent_context::{Message, SendError, message::now_timestamp};

use super::{
    McpTool, ToolContext, default_target_type, id_string, opt_id_string, parse_params,
    parse_target,
};
use crate::error::Result;

#[derive(Deserialize)]
struct SendArgs {
    #[serde(deserialize_with = "id_string")]
    target: String,
    content: String,
    #[serde(default = "default_target_type")]
    target_type: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    reply_to: Option<String>,
    #[serde(default = "split_by_default")]
    split_content: bool,
}

fn split_by_default() -> bool {
    true
}

/// `[bot(self)] text` for our own messages, `[name] text` otherwise.
fn render_line(msg: &Message) -> String {
    if msg.is_self {
        format!("[bot(self)] {}", msg.content)
    } else {
        format!("[{}] {}", msg.sender_name, msg.content)
    }
}

/// Chunked, rate-limited send to a group or friend.
pub struct SendMessageTool {
    ctx: Arc<ToolContext>,
}

impl SendMessageTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl McpTool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a message to a monitored group or whitelisted friend. Long text is split \
         into short chunks sent with a typing delay unless split_content is false. \
         Returns the sent message ids and every message that arrived in the target \
         since the send started."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": {"type": "string", "description": "Group ID or friend QQ ID."},
                "content": {"type": "string", "description": "Text message content."},
                "target_type": {"type": "string", "enum": ["group", "private"], "default": "group"},
                "reply_to": {"type": "string", "description": "Message ID to quote (first chunk only)."},
                "split_content": {"type": "boolean", "default": true},
            },
            "required": ["target", "content"],
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let args: SendArgs = parse_params(params)?;
        let key = match parse_target(&args.target, &args.target_type) {
            Ok(key) => key,
            Err(error) => return Ok(json!({ "success": false, "error": error })),
        };

        let sent = self
            .ctx
            .sender
            .send(&key, &args.content, args.reply_to.as_deref(), args.split_content)
            .await;
        Ok(match sent {
            Ok(report) => json!({
                "success": true,
                "message_ids": report.message_ids,
                "chunks": report.chunks,
                "target": key.id,
                "target_type": key.kind,
                "timestamp": now_timestamp(),
                "recent_messages": report.recent_messages.iter().map(render_line).collect::<Vec<_>>(),
            }),
            Err(e) => {
                let mut out = json!({ "success": false, "error": e.to_string() });
                if let SendError::Partial { message_ids, .. } = e {
                    out["message_ids"] = json!(message_ids);
                }
                out
            },
        })
    }
}
