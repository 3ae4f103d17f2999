//! Inline expansion of quoted replies and forwarded bundles.

use tracing::{debug, warn};

use qq_agent_onebot::MessageContent;

use crate::{
    message::{short_time, truncate_chars},
    parser::{SegmentParser, UNKNOWN_REPLY},
};

/// Forward recursion stops here and renders [`NESTED_FORWARD`] instead.
const MAX_FORWARD_DEPTH: usize = 2;
const MAX_FORWARD_NODES: usize = 20;
const REPLY_SNIPPET_CHARS: usize = 50;
const NODE_CHARS: usize = 50;
const NODE_MULTILINE_CHARS: usize = 500;

const NESTED_FORWARD: &str = "[嵌套转发消息]";
const EMPTY_FORWARD: &str = "[转发消息 (空或获取失败)]";

impl SegmentParser<'_> {
    /// Render a quoted reply as `[回复 name(id): “snippet”] `.
    ///
    /// Buffered messages resolve without a remote call.
    pub(crate) async fn resolve_reply(&self, message_id: &str, depth: usize) -> String {
        if let Some(hit) = self.lookup.find_message(message_id) {
            debug!(message_id, "quoted message found in buffer");
            return render_reply(&hit.sender_name, &hit.sender_id, &hit.content);
        }

        let event = match self.api.get_msg(message_id).await {
            Ok(event) => event,
            Err(e) => {
                warn!(message_id, error = %e, "failed to fetch quoted message");
                return UNKNOWN_REPLY.to_string();
            },
        };

        let content = without_replies(event.message.clone());
        let parsed = self.parse(&content, depth + 1).await;
        if parsed.text.trim().is_empty() {
            return UNKNOWN_REPLY.to_string();
        }
        let sender_id = event.sender_id();
        let name = event.sender.display_name().unwrap_or(sender_id);
        render_reply(name, sender_id, parsed.text.trim())
    }

    /// Render a forwarded bundle as a header plus one indented line per node.
    pub(crate) async fn expand_forward(&self, forward_id: Option<&str>, depth: usize) -> String {
        if depth >= MAX_FORWARD_DEPTH {
            return NESTED_FORWARD.to_string();
        }
        let Some(forward_id) = forward_id else {
            return EMPTY_FORWARD.to_string();
        };

        let nodes = match self.api.get_forward_msg(forward_id).await {
            Ok(nodes) if !nodes.is_empty() => nodes,
            Ok(_) => return EMPTY_FORWARD.to_string(),
            Err(e) => {
                warn!(forward_id, error = %e, "failed to fetch forwarded bundle");
                return EMPTY_FORWARD.to_string();
            },
        };

        let indent = "  ".repeat(depth + 1);
        let mut lines = vec![format!("[转发消息 共{}条]", nodes.len())];
        for node in nodes.iter().take(MAX_FORWARD_NODES) {
            let parsed = self.parse(&node.content, depth + 1).await;
            let budget = if parsed.text.contains('\n') {
                NODE_MULTILINE_CHARS
            } else {
                NODE_CHARS
            };
            let sender_id = &node.sender.user_id;
            let name = node.sender.display_name().unwrap_or(sender_id);
            lines.push(format!(
                "{indent}[{}] {name}({sender_id}): {}",
                short_time(node.time),
                truncate_chars(&parsed.text, budget)
            ));
        }
        if nodes.len() > MAX_FORWARD_NODES {
            lines.push(format!(
                "{indent}... 还有{}条消息未显示",
                nodes.len() - MAX_FORWARD_NODES
            ));
        }
        lines.join("\n")
    }
}

fn render_reply(name: &str, sender_id: &str, content: &str) -> String {
    format!(
        "[回复 {name}({sender_id}): “{}”] ",
        truncate_chars(content, REPLY_SNIPPET_CHARS)
    )
}

/// Drop nested reply segments so a reply-to-a-reply is not chased further.
fn without_replies(content: MessageContent) -> MessageContent {
    match content {
        MessageContent::Segments(raw) => {
            MessageContent::Segments(raw.into_iter().filter(|s| s.kind != "reply").collect())
        },
        text => text,
    }
}
