//! Per-target buffers, event routing and the read/write API over them.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::Instant,
};

use {
    secrecy::Secret,
    serde::Serialize,
    tracing::{debug, info, trace, warn},
};

use {
    qq_agent_common::types::{TargetKey, TargetKind},
    qq_agent_config::AgentConfig,
    qq_agent_onebot::{Event, MessageEvent, MessageType, OneBotApi},
};

use crate::{
    access::AccessPolicy,
    buffer::MessageBuffer,
    compress::{CompressMethod, Summarizer, rule_based_summary},
    listener::Listener,
    message::{Message, format_timestamp, truncate_chars},
    parser::{MessageLookup, SegmentParser},
};

/// Buffer contents as returned to tool callers.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub target: String,
    #[serde(rename = "target_type")]
    pub kind: TargetKind,
    #[serde(rename = "compressed_summary")]
    pub summary: Option<String>,
    /// Messages currently held, regardless of `limit`.
    #[serde(rename = "message_count")]
    pub total_count: usize,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    #[serde(rename = "total_messages_buffered")]
    pub total_buffered: usize,
    #[serde(rename = "groups_tracked")]
    pub group_targets: usize,
    #[serde(rename = "friends_tracked")]
    pub private_targets: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressOutcome {
    #[serde(rename = "compressed")]
    pub compressed_count: usize,
    /// `None` when there was nothing to compress.
    pub method: Option<CompressMethod>,
    /// The accumulated summary after this compression.
    #[serde(rename = "compressed_summary")]
    pub summary: Option<String>,
}

/// Lazily created buffers keyed by target.
struct BufferMap {
    inner: RwLock<HashMap<TargetKey, MessageBuffer>>,
    capacity: usize,
    compress_every: usize,
}

impl BufferMap {
    fn new(capacity: usize, compress_every: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            capacity,
            compress_every,
        }
    }

    fn read<R>(&self, key: &TargetKey, f: impl FnOnce(&MessageBuffer) -> R) -> Option<R> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(key).map(f)
    }

    fn update<R>(&self, key: &TargetKey, f: impl FnOnce(&mut MessageBuffer) -> R) -> Option<R> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.get_mut(key).map(f)
    }

    fn get_or_create<R>(&self, key: &TargetKey, f: impl FnOnce(&mut MessageBuffer) -> R) -> R {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let buf = map
            .entry(key.clone())
            .or_insert_with(|| MessageBuffer::new(self.capacity, self.compress_every));
        f(buf)
    }

    fn for_each_mut(&self, mut f: impl FnMut(&TargetKey, &mut MessageBuffer)) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for (key, buf) in map.iter_mut() {
            f(key, buf);
        }
    }

    fn stats(&self) -> BufferStats {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.iter()
            .fold(BufferStats::default(), |mut stats, (key, buf)| {
                stats.total_buffered += buf.len();
                match key.kind {
                    TargetKind::Group => stats.group_targets += 1,
                    TargetKind::Private => stats.private_targets += 1,
                }
                stats
            })
    }
}

impl MessageLookup for BufferMap {
    fn find_message(&self, message_id: &str) -> Option<Message> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values().find_map(|buf| buf.find(message_id).cloned())
    }
}

/// Owns one [`MessageBuffer`] per target and the background event listener.
pub struct ContextManager {
    api: Arc<dyn OneBotApi>,
    self_id: String,
    access: AccessPolicy,
    buffers: BufferMap,
    ws_url: String,
    access_token: Option<Secret<String>>,
    listener: Mutex<Option<Listener>>,
}

impl ContextManager {
    #[must_use]
    pub fn new(config: &AgentConfig, api: Arc<dyn OneBotApi>) -> Self {
        Self {
            api,
            self_id: config.account.qq.clone(),
            access: AccessPolicy::from_config(&config.monitor),
            buffers: BufferMap::new(config.buffer.size, config.buffer.compress_every),
            ws_url: config.napcat.ws_url(),
            access_token: config.napcat.access_token.clone(),
            listener: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn api(&self) -> &Arc<dyn OneBotApi> {
        &self.api
    }

    #[must_use]
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    #[must_use]
    pub fn access(&self) -> &AccessPolicy {
        &self.access
    }

    // ── Listener lifecycle ──────────────────────────────────────────────

    /// Spawn the reconnecting event listener. No-op when already running.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        *slot = Some(Listener::spawn(
            Arc::clone(self),
            self.ws_url.clone(),
            self.access_token.clone(),
        ));
        info!(url = %self.ws_url, "event listener started");
    }

    /// Cancel the listener and wait for it to finish. Idempotent.
    pub async fn stop(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.shutdown().await;
            info!("event listener stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    /// Decode one raw stream frame and route it. Bad JSON is dropped.
    pub(crate) async fn handle_frame(&self, raw: &str) {
        match serde_json::from_str::<Event>(raw) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                warn!(error = %e, frame = %truncate_chars(raw, 200), "dropping undecodable event frame");
            },
        }
    }

    pub async fn handle_event(&self, event: Event) {
        match event {
            Event::Message(message) => self.handle_message(message).await,
            Event::Other => {},
        }
    }

    async fn handle_message(&self, event: MessageEvent) {
        let key = match event.message_type {
            MessageType::Group => match &event.group_id {
                Some(group_id) => TargetKey::group(group_id.clone()),
                None => return,
            },
            MessageType::Private => TargetKey::private(event.sender_id()),
            MessageType::Unknown => return,
        };
        if let Err(denied) = self.access.check(&key) {
            trace!(chat = %key, reason = %denied, "ignoring message");
            return;
        }
        let Some(msg) = self.normalize(&event).await else {
            return;
        };
        debug!(
            chat = %key,
            sender = %msg.sender_name,
            at_me = msg.is_at_me,
            content = %truncate_chars(&msg.content, 50),
            "message received"
        );
        self.add_message(&key, msg);
    }

    /// Build a [`Message`] from an event, or `None` when its text is empty.
    async fn normalize(&self, event: &MessageEvent) -> Option<Message> {
        let parser = SegmentParser::new(self.api.as_ref(), &self.buffers, &self.self_id);
        let parsed = parser.parse(&event.message, 0).await;
        if parsed.text.trim().is_empty() {
            return None;
        }
        let sender_id = event.sender_id().to_string();
        let sender_name = event
            .sender
            .display_name()
            .map_or_else(|| sender_id.clone(), str::to_owned);
        Some(Message {
            is_self: !self.self_id.is_empty() && sender_id == self.self_id,
            sender_id,
            sender_name,
            content: parsed.text,
            timestamp: format_timestamp(event.time),
            message_id: event.message_id.clone(),
            is_at_me: parsed.is_at_me,
            image_urls: parsed.image_urls,
            received_at: Instant::now(),
        })
    }

    /// Import recent history for every allowed group and friend.
    ///
    /// Failures skip the affected target. Returns the number of messages seeded.
    pub async fn backfill(&self) -> usize {
        let mut targets = Vec::new();
        match self.api.get_group_list().await {
            Ok(groups) => targets.extend(
                groups
                    .into_iter()
                    .filter(|g| self.access.is_group_allowed(&g.group_id))
                    .map(|g| TargetKey::group(g.group_id)),
            ),
            Err(e) => warn!(error = %e, "failed to list groups for backfill"),
        }
        if !self.access.friends().is_empty() {
            match self.api.get_friend_list().await {
                Ok(friends) => targets.extend(
                    friends
                        .into_iter()
                        .filter(|f| self.access.is_friend_allowed(&f.user_id))
                        .map(|f| TargetKey::private(f.user_id)),
                ),
                Err(e) => warn!(error = %e, "failed to list friends for backfill"),
            }
        }

        let mut total = 0;
        for key in &targets {
            let events = match self
                .api
                .get_msg_history(key.kind, &key.id, self.buffers.capacity)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    warn!(chat = %key, error = %e, "failed to backfill");
                    continue;
                },
            };
            let mut seeded = 0;
            for event in &events {
                if let Some(msg) = self.normalize(event).await {
                    self.buffers.get_or_create(key, |buf| buf.seed(msg));
                    seeded += 1;
                }
            }
            info!(chat = %key, messages = seeded, "backfilled");
            total += seeded;
        }
        info!(messages = total, targets = targets.len(), "history backfill complete");
        total
    }

    /// Flag every non-empty buffer for full compression.
    pub fn mark_all_pending(&self) {
        self.buffers.for_each_mut(|_, buf| {
            if !buf.is_empty() {
                buf.mark_all_pending();
            }
        });
    }

    // ── Read API ────────────────────────────────────────────────────────

    #[must_use]
    pub fn get_context(&self, key: &TargetKey, limit: usize) -> ContextSnapshot {
        let (summary, total_count, messages) = self
            .buffers
            .read(key, |buf| {
                (
                    buf.summary().map(str::to_owned),
                    buf.len(),
                    buf.recent(limit),
                )
            })
            .unwrap_or_default();
        ContextSnapshot {
            target: key.id.clone(),
            kind: key.kind,
            summary,
            total_count,
            messages,
        }
    }

    #[must_use]
    pub fn messages_since(&self, key: &TargetKey, since: Instant) -> Vec<Message> {
        self.buffers
            .read(key, |buf| buf.since(since))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stats(&self) -> BufferStats {
        self.buffers.stats()
    }

    // ── Write API ───────────────────────────────────────────────────────

    /// Insert a message directly (self-authored sends). Returns `false` for a duplicate id.
    pub fn add_message(&self, key: &TargetKey, msg: Message) -> bool {
        self.buffers.get_or_create(key, |buf| buf.add(msg))
    }

    /// Replace the pending batch (or, when nothing is pending, the whole
    /// buffer) with a summary.
    ///
    /// Falls back to the rule-based summary when `summarizer` fails.
    pub async fn compress(&self, key: &TargetKey, summarizer: &dyn Summarizer) -> CompressOutcome {
        let batch = self
            .buffers
            .update(key, |buf| {
                let pending = buf.extract_oldest_for_compression();
                if pending.is_empty() {
                    buf.drain_all()
                } else {
                    pending
                }
            })
            .unwrap_or_default();

        if batch.is_empty() {
            return CompressOutcome {
                compressed_count: 0,
                method: None,
                summary: self
                    .buffers
                    .read(key, |buf| buf.summary().map(str::to_owned))
                    .flatten(),
            };
        }

        let (text, method) = match summarizer.summarize(&batch).await {
            Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), summarizer.method()),
            Ok(_) => {
                warn!(chat = %key, "summarizer returned nothing, using rule-based summary");
                (rule_based_summary(&batch), CompressMethod::RuleBased)
            },
            Err(e) => {
                warn!(chat = %key, error = %e, "summarizer failed, using rule-based summary");
                (rule_based_summary(&batch), CompressMethod::RuleBased)
            },
        };

        let summary = self
            .buffers
            .get_or_create(key, |buf| {
                buf.apply_summary(&text);
                buf.summary().map(str::to_owned)
            });
        info!(chat = %key, count = batch.len(), ?method, "compressed messages");

        CompressOutcome {
            compressed_count: batch.len(),
            method: Some(method),
            summary,
        }
    }
}
