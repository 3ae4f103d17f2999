//! In-memory OneBot fake shared by this crate's tests and, behind the
//! `test-utils` feature, by downstream crates.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use {
    qq_agent_common::types::TargetKind,
    qq_agent_onebot::{
        BotStatus, Error, ForwardNode, FriendInfo, GroupInfo, LoginInfo, MessageEvent, OneBotApi,
        Result, SentMessage,
    },
};

#[cfg(test)]
pub(crate) use fixtures::{NoLookup, event, forward_node, segments};

#[derive(Debug, Clone)]
pub struct SentText {
    pub kind: TargetKind,
    pub target: String,
    pub text: String,
    pub reply_to: Option<String>,
}

/// Counts every remote call; missing fixtures answer with an API error.
#[derive(Default)]
pub struct FakeApi {
    messages: HashMap<String, MessageEvent>,
    forwards: HashMap<String, Vec<ForwardNode>>,
    history: HashMap<(TargetKind, String), Vec<MessageEvent>>,
    groups: Vec<GroupInfo>,
    friends: Vec<FriendInfo>,
    offline: bool,
    get_msg_delay: Option<Duration>,
    fail_sends_from: Option<usize>,
    calls: AtomicUsize,
    sent: Mutex<Vec<SentText>>,
}

impl FakeApi {
    #[must_use]
    pub fn with_message(mut self, id: &str, event: MessageEvent) -> Self {
        self.messages.insert(id.into(), event);
        self
    }

    #[must_use]
    pub fn with_forward(mut self, id: &str, nodes: Vec<ForwardNode>) -> Self {
        self.forwards.insert(id.into(), nodes);
        self
    }

    #[must_use]
    pub fn with_history(mut self, kind: TargetKind, target: &str, events: Vec<MessageEvent>) -> Self {
        self.history.insert((kind, target.into()), events);
        self
    }

    #[must_use]
    pub fn with_group(mut self, id: &str, name: &str, member_count: u64) -> Self {
        self.groups.push(GroupInfo {
            group_id: id.into(),
            group_name: name.into(),
            member_count,
        });
        self
    }

    #[must_use]
    pub fn with_friend(mut self, id: &str, nickname: &str, remark: &str) -> Self {
        self.friends.push(FriendInfo {
            user_id: id.into(),
            nickname: nickname.into(),
            remark: remark.into(),
        });
        self
    }

    /// Every call fails as if NapCat were down.
    #[must_use]
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// `get_msg` sleeps this long before answering.
    #[must_use]
    pub fn with_slow_get_msg(mut self, delay: Duration) -> Self {
        self.get_msg_delay = Some(delay);
        self
    }

    /// Sends with a zero-based index at or past `n` fail.
    #[must_use]
    pub fn failing_sends_from(mut self, n: usize) -> Self {
        self.fail_sends_from = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentText> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn hit(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(Error::message("connection refused"));
        }
        Ok(())
    }

    fn missing(action: &str) -> Error {
        Error::Api {
            action: action.into(),
            retcode: 100,
            message: "not found".into(),
        }
    }
}

#[async_trait]
impl OneBotApi for FakeApi {
    async fn get_login_info(&self) -> Result<LoginInfo> {
        self.hit()?;
        Ok(LoginInfo {
            user_id: "10001".into(),
            nickname: "bot".into(),
        })
    }

    async fn get_status(&self) -> Result<BotStatus> {
        self.hit()?;
        Ok(BotStatus {
            online: true,
            good: true,
        })
    }

    async fn get_group_list(&self) -> Result<Vec<GroupInfo>> {
        self.hit()?;
        Ok(self.groups.clone())
    }

    async fn get_group_info(&self, group_id: &str) -> Result<GroupInfo> {
        self.hit()?;
        self.groups
            .iter()
            .find(|g| g.group_id == group_id)
            .cloned()
            .ok_or_else(|| Self::missing("get_group_info"))
    }

    async fn get_friend_list(&self) -> Result<Vec<FriendInfo>> {
        self.hit()?;
        Ok(self.friends.clone())
    }

    async fn send_text(
        &self,
        kind: TargetKind,
        target: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<SentMessage> {
        self.hit()?;
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        if self.fail_sends_from.is_some_and(|n| sent.len() >= n) {
            return Err(Self::missing("send_msg"));
        }
        sent.push(SentText {
            kind,
            target: target.into(),
            text: text.into(),
            reply_to: reply_to.map(str::to_owned),
        });
        Ok(SentMessage {
            message_id: (1000 + sent.len()).to_string(),
        })
    }

    async fn get_msg_history(
        &self,
        kind: TargetKind,
        target: &str,
        _count: usize,
    ) -> Result<Vec<MessageEvent>> {
        self.hit()?;
        self.history
            .get(&(kind, target.to_string()))
            .cloned()
            .ok_or_else(|| Self::missing("get_msg_history"))
    }

    async fn get_msg(&self, message_id: &str) -> Result<MessageEvent> {
        self.hit()?;
        if let Some(delay) = self.get_msg_delay {
            tokio::time::sleep(delay).await;
        }
        self.messages
            .get(message_id)
            .cloned()
            .ok_or_else(|| Self::missing("get_msg"))
    }

    async fn get_forward_msg(&self, id: &str) -> Result<Vec<ForwardNode>> {
        self.hit()?;
        self.forwards
            .get(id)
            .cloned()
            .ok_or_else(|| Self::missing("get_forward_msg"))
    }
}
