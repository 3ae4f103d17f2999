//! Segment parser: OneBot message bodies to plain text.

use {
    futures::future::BoxFuture,
    serde_json::Value,
    tracing::{trace, warn},
};

use qq_agent_onebot::{MessageContent, OneBotApi, Segment};

use crate::message::{Message, truncate_chars};

pub(crate) const IMAGE_PLACEHOLDER: &str = "[图片]";
pub(crate) const VOICE_PLACEHOLDER: &str = "[语音]";
pub(crate) const VIDEO_PLACEHOLDER: &str = "[视频]";
pub(crate) const CARD_PLACEHOLDER: &str = "[卡片消息]";
pub(crate) const UNKNOWN_REPLY: &str = "[回复 未知消息] ";
const SELF_MENTION: &str = "@me";
const BROADCAST_TARGET: &str = "all";
const CARD_MAX_CHARS: usize = 80;

/// Lookup of already-buffered messages, used to resolve quoted replies
/// without a remote call.
pub trait MessageLookup: Send + Sync {
    fn find_message(&self, message_id: &str) -> Option<Message>;
}

/// Result of normalizing one message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedContent {
    pub text: String,
    pub is_at_me: bool,
    pub image_urls: Vec<String>,
}

/// Renders segment lists into text, expanding quoted replies and forwarded
/// bundles through the remote API.
pub struct SegmentParser<'a> {
    pub(crate) api: &'a dyn OneBotApi,
    pub(crate) lookup: &'a dyn MessageLookup,
    self_id: &'a str,
}

impl<'a> SegmentParser<'a> {
    pub fn new(api: &'a dyn OneBotApi, lookup: &'a dyn MessageLookup, self_id: &'a str) -> Self {
        Self {
            api,
            lookup,
            self_id,
        }
    }

    /// Normalize a message body.
    ///
    /// `depth` is the current forward/reply nesting level; top-level callers
    /// pass 0. A bare string body is returned verbatim.
    pub fn parse<'b>(
        &'b self,
        content: &'b MessageContent,
        depth: usize,
    ) -> BoxFuture<'b, ParsedContent> {
        Box::pin(async move {
            let raw = match content {
                MessageContent::Text(text) => {
                    return ParsedContent {
                        text: text.clone(),
                        ..ParsedContent::default()
                    };
                },
                MessageContent::Segments(raw) => raw,
            };

            let mut out = ParsedContent::default();
            let mut text = String::new();
            for segment in raw.iter().map(Segment::from_raw) {
                match segment {
                    Segment::Text { text: t } => text.push_str(&t),
                    Segment::Mention { target, name } => {
                        if self.is_self_mention(&target) {
                            out.is_at_me = true;
                            text.push_str(SELF_MENTION);
                        } else {
                            text.push('@');
                            text.push_str(name.as_deref().unwrap_or(&target));
                        }
                    },
                    Segment::Image { url } => {
                        out.image_urls.extend(url);
                        text.push_str(IMAGE_PLACEHOLDER);
                    },
                    Segment::Sticker { id } => text.push_str(&format!("[表情{id}]")),
                    Segment::Voice => text.push_str(VOICE_PLACEHOLDER),
                    Segment::Video => text.push_str(VIDEO_PLACEHOLDER),
                    Segment::Reply { id: Some(id) } => {
                        text.push_str(&self.resolve_reply(&id, depth).await);
                    },
                    Segment::Reply { id: None } => text.push_str(UNKNOWN_REPLY),
                    Segment::Forward { id } => {
                        text.push_str(&self.expand_forward(id.as_deref(), depth).await);
                    },
                    Segment::Card { payload } => text.push_str(&render_card(payload.as_ref())),
                    Segment::File { name } => {
                        text.push_str(&format!("[文件: {}]", name.as_deref().unwrap_or("?")));
                    },
                    Segment::Unrecognized(kind) => trace!(kind, "skipping segment"),
                }
            }
            out.text = text.trim().to_string();
            out
        })
    }

    fn is_self_mention(&self, target: &str) -> bool {
        target == BROADCAST_TARGET || (!self.self_id.is_empty() && target == self.self_id)
    }
}

/// `"<desc> - <prompt>"` from a rich card, or the generic placeholder.
fn render_card(payload: Option<&Value>) -> String {
    card_summary(payload).map_or_else(
        || CARD_PLACEHOLDER.to_string(),
        |summary| truncate_chars(&summary, CARD_MAX_CHARS),
    )
}

fn card_summary(payload: Option<&Value>) -> Option<String> {
    let decoded = match payload? {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "undecodable card payload");
                return None;
            },
        },
        other => other.clone(),
    };

    let desc = nonempty_str(&decoded, "desc").or_else(|| {
        decoded
            .get("meta")
            .and_then(Value::as_object)
            .and_then(|meta| meta.values().find_map(|entry| nonempty_str(entry, "desc")))
    });
    let prompt = nonempty_str(&decoded, "prompt");

    match (desc, prompt) {
        (Some(desc), Some(prompt)) => Some(format!("{desc} - {prompt}")),
        (Some(one), None) | (None, Some(one)) => Some(one),
        (None, None) => None,
    }
}

fn nonempty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
