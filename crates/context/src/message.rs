//! Normalized chat message and the fixed UTC+8 clock used to stamp it.

use std::time::Instant;

use {
    chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc},
    serde::Serialize,
};

const CST_OFFSET_SECS: i32 = 8 * 3600;

/// One normalized chat message.
///
/// Immutable once built; owned by the buffer it is appended to.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    /// RFC 3339 in UTC+8, second precision.
    pub timestamp: String,
    pub message_id: String,
    pub is_at_me: bool,
    pub is_self: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    /// Local arrival time, only used for "messages since" queries.
    #[serde(skip)]
    pub received_at: Instant,
}

impl Message {
    /// A message authored by the local account, written straight into the
    /// buffer after a successful send.
    #[must_use]
    pub fn outbound(self_id: &str, content: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            sender_id: self_id.to_string(),
            sender_name: "bot".into(),
            content: content.into(),
            timestamp: now_timestamp(),
            message_id: message_id.into(),
            is_at_me: false,
            is_self: true,
            image_urls: Vec::new(),
            received_at: Instant::now(),
        }
    }
}

pub(crate) fn cst() -> FixedOffset {
    FixedOffset::east_opt(CST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Convert a source Unix time to an RFC 3339 string in UTC+8.
///
/// Non-positive (or out of range) times fall back to the wall clock.
#[must_use]
pub fn format_timestamp(unix_secs: i64) -> String {
    let when = if unix_secs > 0 {
        DateTime::from_timestamp(unix_secs, 0).unwrap_or_else(Utc::now)
    } else {
        Utc::now()
    };
    when.with_timezone(&cst())
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[must_use]
pub fn now_timestamp() -> String {
    format_timestamp(0)
}

/// `MM-DD HH:MM` in UTC+8, used for forwarded-bundle lines.
pub(crate) fn short_time(unix_secs: i64) -> String {
    let when = if unix_secs > 0 {
        DateTime::from_timestamp(unix_secs, 0).unwrap_or_else(Utc::now)
    } else {
        Utc::now()
    };
    when.with_timezone(&cst()).format("%m-%d %H:%M").to_string()
}

/// Keep the first `max` characters, marking the cut with `…`.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_in_utc_plus_eight() {
        // 2023-11-14T22:13:20Z
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-15T06:13:20+08:00");
    }

    #[test]
    fn non_positive_time_uses_wall_clock() {
        let ts = format_timestamp(0);
        assert!(ts.ends_with("+08:00"));
        assert!(DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn short_time_format() {
        assert_eq!(short_time(1_700_000_000), "11-15 06:13");
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_chars("你好世界", 2), "你好…");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn outbound_message_serializes_without_images() {
        let msg = Message::outbound("10001", "hi", "5");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["is_self"], true);
        assert_eq!(json["sender_name"], "bot");
        assert!(json.get("image_urls").is_none());
        assert!(json.get("received_at").is_none());
    }
}
