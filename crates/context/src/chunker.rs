//! Splitting outgoing text into short, naturally broken chunks, and the
//! typing delay paired with each chunk.

use std::{sync::LazyLock, time::Duration};

use {
    rand::Rng,
    regex::Regex,
};

use qq_agent_config::OutboundConfig;

/// Stand-in for a file-extension dot while sentences are split.
const MASK: char = '\u{0}';
const SENTENCE_ENDS: &[char] = &['!', '?', '。', '！', '？', '~', '\n'];

#[allow(clippy::expect_used)]
static EXTENSION_DOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\.(md|jpeg|jpg|png|py|js|ts|json|html|css|txt|csv|pdf|zip|gif|svg|mp3|mp4|wav)\b",
    )
    .expect("valid extension regex")
});

#[allow(clippy::expect_used)]
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid paragraph regex"));

#[allow(clippy::expect_used)]
static CLAUSE_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[，,、：:；;]|——|--").expect("valid clause regex"));

/// Split `text` into chunks of at most `max_chars` characters where possible.
///
/// Paragraphs always break. Long paragraphs break at sentence ends and are
/// regrouped greedily; a sentence that is still too long breaks at clause
/// delimiters, which are dropped. A single clause longer than `max_chars`
/// is emitted as is.
#[must_use]
pub fn chunk(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);
    let masked = EXTENSION_DOT.replace_all(text, "\u{0}${1}");

    let mut chunks = Vec::new();
    for para in PARAGRAPH_BREAK
        .split(&masked)
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        if char_len(para) <= max_chars {
            chunks.push(para.to_string());
            continue;
        }
        for group in group_parts(split_sentences(para), max_chars) {
            if char_len(&group) <= max_chars {
                chunks.push(group);
            } else {
                let clauses = CLAUSE_DELIMITER
                    .split(&group)
                    .map(str::trim)
                    .filter(|c| !c.is_empty());
                chunks.extend(group_parts(clauses, max_chars));
            }
        }
    }

    chunks
        .into_iter()
        .map(|c| c.replace(MASK, "."))
        .filter(|c| !c.is_empty())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split after sentence-ending punctuation, keeping it. A `.` only ends a
/// sentence when the character before it is not a digit.
fn split_sentences(para: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    for (idx, c) in para.char_indices() {
        let ends = SENTENCE_ENDS.contains(&c)
            || (c == '.' && !prev.is_some_and(|p| p.is_ascii_digit()));
        if ends {
            let end = idx + c.len_utf8();
            out.push(&para[start..end]);
            start = end;
        }
        prev = Some(c);
    }
    out.push(&para[start..]);
    out.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Greedily concatenate consecutive parts while the result fits in `limit`.
fn group_parts<'s>(parts: impl IntoIterator<Item = &'s str>, limit: usize) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current = String::new();
    for part in parts {
        if !current.is_empty() && char_len(&current) + char_len(part) > limit {
            groups.push(std::mem::take(&mut current));
        }
        current.push_str(part);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Human typing cadence: a per-character delay with ±30% jitter, clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingDelay {
    per_char_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

impl Default for TypingDelay {
    fn default() -> Self {
        Self::new(80, 300, 3000)
    }
}

impl TypingDelay {
    #[must_use]
    pub fn new(per_char_ms: u64, min_ms: u64, max_ms: u64) -> Self {
        Self {
            per_char_ms,
            min_ms,
            max_ms: max_ms.max(min_ms),
        }
    }

    #[must_use]
    pub fn from_config(config: &OutboundConfig) -> Self {
        Self::new(
            config.delay_ms_per_char,
            config.delay_min_ms,
            config.delay_max_ms,
        )
    }

    /// Pause to take after sending `chunk`, before the next one.
    #[must_use]
    pub fn for_chunk(&self, chunk: &str) -> Duration {
        self.with_jitter(chunk, rand::rng().random_range(0.7..1.3))
    }

    fn with_jitter(&self, chunk: &str, jitter: f64) -> Duration {
        let base = char_len(chunk) as f64 * self.per_char_ms as f64 * jitter;
        let ms = (base as u64).clamp(self.min_ms, self.max_ms);
        Duration::from_millis(ms)
    }
}
