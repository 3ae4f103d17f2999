//! Inbound OneBot v11 event frames.
//!
//! NapCat is loose about id types (numbers in events, strings in some API
//! responses), so every id field goes through [`id_string`] and ends up as a
//! `String`.

use {
    serde::{Deserialize, Deserializer},
    serde_json::Value,
};

#[cfg(test)]
use crate::segment::Segment;

/// A decoded event frame from the WebSocket stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "post_type", rename_all = "snake_case")]
pub enum Event {
    Message(MessageEvent),
    /// Notices, requests, meta events (heartbeat, lifecycle) and anything else.
    #[serde(other)]
    Other,
}

/// Addressing of a message event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Group,
    Private,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A chat message, either live from the stream or returned by `get_msg` /
/// history endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub group_id: Option<String>,
    #[serde(default, deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default, deserialize_with = "id_string")]
    pub message_id: String,
    /// Unix seconds as reported by the server.
    #[serde(default)]
    pub time: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub sender: Sender,
    #[serde(default, deserialize_with = "null_default")]
    pub message: MessageContent,
}

impl MessageEvent {
    /// Sender id, falling back to `sender.user_id` when the top-level field is absent.
    #[must_use]
    pub fn sender_id(&self) -> &str {
        if self.user_id.is_empty() {
            &self.sender.user_id
        } else {
            &self.user_id
        }
    }
}

/// Sender block attached to message events and forward nodes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sender {
    #[serde(default, deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    /// Group card (per-group display name).
    #[serde(default)]
    pub card: Option<String>,
}

impl Sender {
    /// Group card, then nickname; empty strings count as absent.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        [self.card.as_deref(), self.nickname.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
    }
}

/// Message body: OneBot allows either a segment array or a CQ-coded string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Segments(Vec<RawSegment>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Segments(Vec::new())
    }
}

impl MessageContent {
    /// Typed segments, or `None` for a bare string body.
    #[cfg(test)]
    fn segments(&self) -> Option<Vec<Segment>> {
        match self {
            Self::Text(_) => None,
            Self::Segments(raw) => Some(raw.iter().map(Segment::from_raw).collect()),
        }
    }
}

/// One segment as it appears on the wire: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSegment {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// One message inside a forwarded bundle.
#[derive(Debug, Clone, Default)]
pub struct ForwardNode {
    pub sender: Sender,
    pub time: i64,
    pub content: MessageContent,
}

impl ForwardNode {
    /// Decode a node from `get_forward_msg` output.
    ///
    /// Accepts both the NapCat event shape (`sender`/`time`/`message`) and the
    /// classic node-segment shape (`{"type": "node", "data": {user_id, nickname, content}}`).
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        #[derive(Deserialize)]
        struct NodeShape {
            #[serde(default, deserialize_with = "null_default")]
            sender: Sender,
            #[serde(default, deserialize_with = "id_string")]
            user_id: String,
            #[serde(default)]
            nickname: Option<String>,
            #[serde(default)]
            time: i64,
            #[serde(default, alias = "content", deserialize_with = "null_default")]
            message: MessageContent,
        }

        let body = match value.get("type").and_then(Value::as_str) {
            Some("node") => value.get("data").unwrap_or(&Value::Null),
            _ => value,
        };
        let shape = NodeShape::deserialize(body)?;

        let mut sender = shape.sender;
        if sender.user_id.is_empty() {
            sender.user_id = shape.user_id;
        }
        if sender.nickname.is_none() {
            sender.nickname = shape.nickname;
        }
        Ok(Self {
            sender,
            time: shape.time,
            content: shape.message,
        })
    }
}

/// Render a JSON scalar id as a string. `null`/missing become `""`.
pub(crate) fn value_to_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn id_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(Option::<Value>::deserialize(de)?
        .map(|v| value_to_id(&v))
        .unwrap_or_default())
}

fn opt_id_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(Some(id_string(de)?).filter(|id| !id.is_empty()))
}

fn null_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn decodes_group_message_with_numeric_ids() {
        let frame = json!({
            "post_type": "message",
            "message_type": "group",
            "group_id": 1059558644,
            "user_id": 10001,
            "message_id": -2147480000,
            "time": 1700000000,
            "sender": {"user_id": 10001, "nickname": "alice", "card": ""},
            "message": [{"type": "text", "data": {"text": "hi"}}]
        });
        let Event::Message(ev) = serde_json::from_value::<Event>(frame).unwrap() else {
            panic!("expected message event");
        };
        assert_eq!(ev.message_type, MessageType::Group);
        assert_eq!(ev.group_id.as_deref(), Some("1059558644"));
        assert_eq!(ev.sender_id(), "10001");
        assert_eq!(ev.message_id, "-2147480000");
        assert_eq!(ev.sender.display_name(), Some("alice"));
        assert_eq!(ev.message.segments().unwrap().len(), 1);
    }

    #[test]
    fn non_message_events_map_to_other() {
        let frame = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
        assert!(matches!(
            serde_json::from_value::<Event>(frame).unwrap(),
            Event::Other
        ));
    }

    #[test]
    fn unknown_message_type_is_preserved_as_unknown() {
        let frame = json!({"post_type": "message", "message_type": "guild", "user_id": "1"});
        let Event::Message(ev) = serde_json::from_value::<Event>(frame).unwrap() else {
            panic!("expected message event");
        };
        assert_eq!(ev.message_type, MessageType::Unknown);
    }

    #[test]
    fn sender_id_falls_back_to_sender_block() {
        let ev: MessageEvent =
            serde_json::from_value(json!({"sender": {"user_id": 55}, "message": "plain"}))
                .unwrap();
        assert_eq!(ev.sender_id(), "55");
        assert!(ev.message.segments().is_none());
    }

    #[test]
    fn null_message_and_sender_default() {
        let ev: MessageEvent =
            serde_json::from_value(json!({"sender": null, "message": null})).unwrap();
        assert_eq!(ev.sender_id(), "");
        assert!(ev.message.segments().unwrap().is_empty());
    }

    #[test]
    fn display_name_prefers_card() {
        let sender = Sender {
            user_id: "1".into(),
            nickname: Some("nick".into()),
            card: Some("card".into()),
        };
        assert_eq!(sender.display_name(), Some("card"));
    }

    #[test]
    fn forward_node_event_shape() {
        let node = ForwardNode::from_value(&json!({
            "sender": {"user_id": 7, "nickname": "bob"},
            "time": 1700000000,
            "message": [{"type": "text", "data": {"text": "inner"}}]
        }))
        .unwrap();
        assert_eq!(node.sender.user_id, "7");
        assert_eq!(node.time, 1_700_000_000);
    }

    #[test]
    fn forward_node_classic_shape() {
        let node = ForwardNode::from_value(&json!({
            "type": "node",
            "data": {
                "user_id": "8",
                "nickname": "carol",
                "content": [{"type": "text", "data": {"text": "x"}}]
            }
        }))
        .unwrap();
        assert_eq!(node.sender.user_id, "8");
        assert_eq!(node.sender.display_name(), Some("carol"));
        assert_eq!(node.content.segments().unwrap().len(), 1);
    }
}
