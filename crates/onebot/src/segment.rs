//! Typed message segments.

use serde_json::Value;

use crate::event::{RawSegment, value_to_id};

/// One typed unit of a structured chat message.
///
/// Unknown wire kinds are kept as [`Segment::Unrecognized`] so callers can
/// match exhaustively instead of probing untyped fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text {
        text: String,
    },
    /// `at`: `target` is an account id or the literal `all`.
    Mention {
        target: String,
        name: Option<String>,
    },
    Image {
        url: Option<String>,
    },
    /// `face` and `mface` (market stickers).
    Sticker {
        id: String,
    },
    /// `record`.
    Voice,
    Video,
    Reply {
        id: Option<String>,
    },
    Forward {
        id: Option<String>,
    },
    /// `json`: a rich card whose payload may be a JSON string or object.
    Card {
        payload: Option<Value>,
    },
    File {
        name: Option<String>,
    },
    Unrecognized(String),
}

impl Segment {
    #[must_use]
    pub fn from_raw(raw: &RawSegment) -> Self {
        let data = &raw.data;
        match raw.kind.as_str() {
            "text" => Self::Text {
                text: str_field(data, "text").unwrap_or_default(),
            },
            "at" => Self::Mention {
                target: data.get("qq").map(value_to_id).unwrap_or_default(),
                name: str_field(data, "name"),
            },
            "image" => Self::Image {
                url: str_field(data, "url"),
            },
            "face" => Self::Sticker {
                id: data
                    .get("id")
                    .map(value_to_id)
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| "?".into()),
            },
            "mface" => Self::Sticker {
                id: id_field(data, "emoji_id")
                    .or_else(|| str_field(data, "summary"))
                    .unwrap_or_else(|| "?".into()),
            },
            "record" => Self::Voice,
            "video" => Self::Video,
            "reply" => Self::Reply {
                id: id_field(data, "id"),
            },
            "forward" => Self::Forward {
                id: id_field(data, "id"),
            },
            "json" => Self::Card {
                payload: data.get("data").filter(|v| !v.is_null()).cloned(),
            },
            "file" => Self::File {
                name: str_field(data, "name").or_else(|| str_field(data, "file")),
            },
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Build a plain text segment for outbound messages.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Wire representation for the segment kinds the client sends.
    #[must_use]
    pub fn to_wire(&self) -> Option<Value> {
        match self {
            Self::Text { text } => Some(serde_json::json!({"type": "text", "data": {"text": text}})),
            Self::Reply { id: Some(id) } => {
                Some(serde_json::json!({"type": "reply", "data": {"id": id}}))
            },
            Self::Mention { target, .. } => {
                Some(serde_json::json!({"type": "at", "data": {"qq": target}}))
            },
            _ => None,
        }
    }
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn id_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .map(value_to_id)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    fn raw(kind: &str, data: Value) -> RawSegment {
        RawSegment {
            kind: kind.into(),
            data,
        }
    }

    #[rstest]
    #[case("record", Segment::Voice)]
    #[case("video", Segment::Video)]
    #[case("poke", Segment::Unrecognized("poke".into()))]
    fn dataless_kinds(#[case] kind: &str, #[case] expected: Segment) {
        assert_eq!(Segment::from_raw(&raw(kind, Value::Null)), expected);
    }

    #[test]
    fn mention_accepts_numeric_target() {
        assert_eq!(
            Segment::from_raw(&raw("at", json!({"qq": 12345, "name": "bob"}))),
            Segment::Mention {
                target: "12345".into(),
                name: Some("bob".into())
            }
        );
    }

    #[test]
    fn image_without_url() {
        assert_eq!(
            Segment::from_raw(&raw("image", json!({"file": "abc.image"}))),
            Segment::Image { url: None }
        );
    }

    #[test]
    fn reply_with_numeric_id() {
        assert_eq!(
            Segment::from_raw(&raw("reply", json!({"id": 998}))),
            Segment::Reply {
                id: Some("998".into())
            }
        );
    }

    #[test]
    fn face_without_id_uses_marker() {
        assert_eq!(
            Segment::from_raw(&raw("face", json!({}))),
            Segment::Sticker { id: "?".into() }
        );
    }

    #[test]
    fn card_keeps_string_payload() {
        let seg = Segment::from_raw(&raw("json", json!({"data": "{\"prompt\":\"x\"}"})));
        assert_eq!(
            seg,
            Segment::Card {
                payload: Some(json!("{\"prompt\":\"x\"}"))
            }
        );
    }

    #[test]
    fn reply_wire_shape() {
        let wire = Segment::Reply {
            id: Some("5".into()),
        }
        .to_wire();
        assert_eq!(wire, Some(json!({"type": "reply", "data": {"id": "5"}})));
        assert_eq!(Segment::Voice.to_wire(), None);
    }
}
