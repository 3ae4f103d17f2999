//! Bounded per-target message window with compression bookkeeping.

use std::{
    collections::{HashSet, VecDeque},
    time::Instant,
};

use tracing::debug;

use crate::message::Message;

/// Sliding window of messages for one conversation target.
///
/// Dedup is best-effort: `seen_ids` is rebuilt from the live window once it
/// grows past twice the capacity, so an id evicted before a rebuild can be
/// admitted again.
#[derive(Debug)]
pub struct MessageBuffer {
    messages: VecDeque<Message>,
    seen_ids: HashSet<String>,
    capacity: usize,
    compress_every: usize,
    since_compress: usize,
    compress_pending: bool,
    compress_all_pending: bool,
    summary: Option<String>,
}

impl MessageBuffer {
    #[must_use]
    pub fn new(capacity: usize, compress_every: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            seen_ids: HashSet::new(),
            capacity,
            compress_every: compress_every.max(1),
            since_compress: 0,
            compress_pending: false,
            compress_all_pending: false,
            summary: None,
        }
    }

    /// Append a message unless its id was already seen.
    ///
    /// Returns `false` for a duplicate.
    pub fn add(&mut self, msg: Message) -> bool {
        if !msg.message_id.is_empty() {
            if self.seen_ids.contains(&msg.message_id) {
                return false;
            }
            self.remember(&msg.message_id);
        }
        self.push(msg);

        self.since_compress += 1;
        if self.since_compress >= self.compress_every {
            self.compress_pending = true;
        }
        true
    }

    /// Append a historical message during backfill.
    ///
    /// Skips the duplicate check and does not advance the compression
    /// counter; the id is still recorded so a later live echo is dropped.
    pub fn seed(&mut self, msg: Message) {
        if !msg.message_id.is_empty() {
            self.remember(&msg.message_id);
        }
        self.push(msg);
    }

    fn remember(&mut self, id: &str) {
        if self.seen_ids.len() > self.capacity * 2 {
            self.seen_ids = self
                .messages
                .iter()
                .filter(|m| !m.message_id.is_empty())
                .map(|m| m.message_id.clone())
                .collect();
        }
        self.seen_ids.insert(id.to_string());
    }

    fn push(&mut self, msg: Message) {
        if self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(msg);
    }

    /// Force the next extraction to take the whole window.
    pub fn mark_all_pending(&mut self) {
        self.compress_all_pending = true;
    }

    #[cfg(test)]
    fn is_compression_pending(&self) -> bool {
        self.compress_pending || self.compress_all_pending
    }

    /// Remove the batch due for compression, oldest first.
    ///
    /// An empty result means nothing was due. Pending state is cleared
    /// whenever an extraction is attempted while a flag is set.
    pub fn extract_oldest_for_compression(&mut self) -> Vec<Message> {
        if self.compress_all_pending {
            self.clear_pending();
            return self.messages.drain(..).collect();
        }
        if !self.compress_pending {
            return Vec::new();
        }
        self.clear_pending();
        if self.messages.len() < self.compress_every {
            return Vec::new();
        }
        let n = self.compress_every.min(self.messages.len() / 2);
        self.messages.drain(..n).collect()
    }

    /// Remove every message regardless of pending state.
    pub fn drain_all(&mut self) -> Vec<Message> {
        self.clear_pending();
        self.messages.drain(..).collect()
    }

    fn clear_pending(&mut self) {
        self.compress_pending = false;
        self.compress_all_pending = false;
        self.since_compress = 0;
    }

    /// Append a summary block to the accumulated summary.
    pub fn apply_summary(&mut self, text: &str) {
        self.summary = Some(match self.summary.take() {
            Some(existing) => format!("{existing}\n{text}"),
            None => text.to_string(),
        });
        debug!(
            len = self.summary.as_deref().map_or(0, str::len),
            "summary updated"
        );
    }

    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Up to `limit` most recent messages, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Messages received at or after `since`, in storage order.
    #[must_use]
    pub fn since(&self, since: Instant) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.received_at >= since)
            .cloned()
            .collect()
    }

    /// Most recent message with the given id.
    #[must_use]
    pub fn find(&self, message_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.message_id == message_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
