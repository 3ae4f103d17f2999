//! Outbound send pipeline: access check, rate limit, chunked sends with a
//! typing delay, and a snapshot of what arrived meanwhile.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    qq_agent_common::types::TargetKey,
    qq_agent_config::OutboundConfig,
    tracing::{debug, info, warn},
};

use crate::{
    access::AccessDenied,
    chunker::{TypingDelay, chunk},
    manager::ContextManager,
    message::Message,
    rate_limit::{RateLimited, RateLimiter},
};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    NotAllowed(#[from] AccessDenied),

    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("Empty message content")]
    Empty,

    /// The first chunk already failed; nothing was delivered.
    #[error("{0}")]
    Failed(String),

    #[error("Partial send ({}/{total} chunks): {error}", .message_ids.len())]
    Partial {
        message_ids: Vec<String>,
        total: usize,
        error: String,
    },
}

/// Result of a fully delivered send.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub message_ids: Vec<String>,
    /// Number of chunks the content was split into.
    pub chunks: usize,
    /// Everything buffered for the target since the send started,
    /// including the chunks just sent.
    pub recent_messages: Vec<Message>,
}

pub struct OutboundSender {
    manager: Arc<ContextManager>,
    limiter: RateLimiter,
    delay: TypingDelay,
    chunk_max_chars: usize,
    echo_wait: Duration,
}

impl OutboundSender {
    #[must_use]
    pub fn new(manager: Arc<ContextManager>, config: &OutboundConfig) -> Self {
        Self {
            manager,
            limiter: RateLimiter::from_secs(config.rate_limit_secs),
            delay: TypingDelay::from_config(config),
            chunk_max_chars: config.chunk_max_chars,
            echo_wait: Duration::from_millis(config.echo_wait_ms),
        }
    }

    /// Send `content` to `target`.
    ///
    /// With `split` the text goes out as several chunks paced by the typing
    /// delay; `reply_to` is attached to the first chunk only. A failure
    /// releases the rate-limit slot so the caller can retry immediately.
    pub async fn send(
        &self,
        target: &TargetKey,
        content: &str,
        reply_to: Option<&str>,
        split: bool,
    ) -> Result<SendReport, SendError> {
        self.manager.access().check(target)?;
        let permit = self.limiter.try_acquire(target)?;

        let chunks = if split {
            chunk(content, self.chunk_max_chars)
        } else {
            Some(content.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_owned)
                .into_iter()
                .collect()
        };
        if chunks.is_empty() {
            self.limiter.rollback(permit);
            return Err(SendError::Empty);
        }

        let started = Instant::now();
        let api = self.manager.api();
        let mut message_ids = Vec::with_capacity(chunks.len());
        let last = chunks.len() - 1;
        for (i, raw) in chunks.iter().enumerate() {
            let text = raw.trim_end_matches(['。', '.']);
            if text.is_empty() {
                continue;
            }
            let reply = if i == 0 { reply_to } else { None };
            let sent = match api.send_text(target.kind, &target.id, text, reply).await {
                Ok(sent) => sent,
                Err(e) => {
                    self.limiter.rollback(permit);
                    warn!(chat = %target, sent = message_ids.len(), total = chunks.len(), error = %e, "send failed");
                    return Err(if message_ids.is_empty() {
                        SendError::Failed(e.to_string())
                    } else {
                        SendError::Partial {
                            message_ids,
                            total: chunks.len(),
                            error: e.to_string(),
                        }
                    });
                },
            };
            self.manager.add_message(
                target,
                Message::outbound(self.manager.self_id(), text, sent.message_id.clone()),
            );
            debug!(chat = %target, chunk = i + 1, total = chunks.len(), message_id = %sent.message_id, "chunk sent");
            message_ids.push(sent.message_id);

            if i < last {
                tokio::time::sleep(self.delay.for_chunk(text)).await;
            }
        }
        info!(chat = %target, chunks = chunks.len(), "message sent");

        if !self.echo_wait.is_zero() {
            tokio::time::sleep(self.echo_wait).await;
        }
        Ok(SendReport {
            message_ids,
            chunks: chunks.len(),
            recent_messages: self.manager.messages_since(target, started),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::FakeApi,
        qq_agent_config::AgentConfig,
        qq_agent_onebot::OneBotApi,
    };

    fn sender(api: FakeApi, rate_limit_secs: f64) -> (Arc<FakeApi>, Arc<ContextManager>, OutboundSender) {
        let mut config = AgentConfig::default();
        config.account.qq = "10001".into();
        config.monitor.groups = Some(vec!["100".into()]);
        config.outbound = OutboundConfig {
            rate_limit_secs,
            chunk_max_chars: 10,
            delay_ms_per_char: 0,
            delay_min_ms: 0,
            delay_max_ms: 0,
            echo_wait_ms: 0,
        };
        let api = Arc::new(api);
        let manager = Arc::new(ContextManager::new(
            &config,
            Arc::clone(&api) as Arc<dyn OneBotApi>,
        ));
        let sender = OutboundSender::new(Arc::clone(&manager), &config.outbound);
        (api, manager, sender)
    }

    #[tokio::test]
    async fn chunks_are_sent_in_order_and_buffered() {
        let (api, manager, sender) = sender(FakeApi::default(), 3.0);
        let target = TargetKey::group("100");
        let report = sender
            .send(&target, "今天天气真好。我们去公园玩吧！你觉得怎么样？", Some("55"), true)
            .await
            .unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(report.message_ids, vec!["1001", "1002", "1003"]);
        let sent = api.sent();
        assert_eq!(sent[0].text, "今天天气真好");
        assert_eq!(sent[0].reply_to.as_deref(), Some("55"));
        assert!(sent[1..].iter().all(|s| s.reply_to.is_none()));

        let ctx = manager.get_context(&target, 10);
        assert_eq!(ctx.total_count, 3);
        assert!(ctx.messages.iter().all(|m| m.is_self && m.sender_name == "bot"));
        assert_eq!(report.recent_messages.len(), 3);
    }

    #[tokio::test]
    async fn unsplit_send_keeps_content_whole() {
        let (api, _, sender) = sender(FakeApi::default(), 0.0);
        let report = sender
            .send(&TargetKey::group("100"), "  这是一条很长很长很长很长的消息。 ", None, false)
            .await
            .unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(api.sent()[0].text, "这是一条很长很长很长很长的消息");
    }

    #[tokio::test]
    async fn policy_rejection_makes_no_remote_call() {
        let (api, _, sender) = sender(FakeApi::default(), 3.0);
        let err = sender
            .send(&TargetKey::private("42"), "hi", None, true)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "User 42 is not in friends whitelist");
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn second_send_is_rate_limited() {
        let (_, _, sender) = sender(FakeApi::default(), 3.0);
        let target = TargetKey::group("100");
        sender.send(&target, "hi", None, true).await.unwrap();
        let err = sender.send(&target, "again", None, true).await.unwrap_err();
        assert!(matches!(err, SendError::RateLimited(_)));
        assert!(err.to_string().starts_with("Rate limited. Try again in "));
    }

    #[tokio::test]
    async fn empty_content_is_rejected_and_releases_limit() {
        let (_, _, sender) = sender(FakeApi::default(), 3.0);
        let target = TargetKey::group("100");
        let err = sender.send(&target, "   ", None, true).await.unwrap_err();
        assert_eq!(err.to_string(), "Empty message content");
        assert!(sender.send(&target, "ok", None, true).await.is_ok());
    }

    #[tokio::test]
    async fn partial_failure_reports_progress_and_rolls_back() {
        let (api, manager, sender) = sender(FakeApi::default().failing_sends_from(1), 3.0);
        let target = TargetKey::group("100");
        let err = sender
            .send(&target, "今天天气真好。我们去公园玩吧！你觉得怎么样？", None, true)
            .await
            .unwrap_err();
        let SendError::Partial { message_ids, total, .. } = &err else {
            panic!("expected partial send, got {err:?}");
        };
        assert_eq!(message_ids, &vec!["1001".to_string()]);
        assert_eq!(*total, 3);
        assert!(err.to_string().starts_with("Partial send (1/3 chunks): "));
        assert_eq!(manager.get_context(&target, 10).total_count, 1);
        assert_eq!(api.sent().len(), 1);

        // The slot was released, so the limiter does not block a retry.
        let err = sender.send(&target, "retry", None, true).await.unwrap_err();
        assert!(matches!(err, SendError::Failed(_)));
    }
}
