use {async_trait::async_trait, serde::Deserialize};

use qq_agent_common::types::TargetKind;

use crate::{
    error::Result,
    event::{ForwardNode, MessageEvent, id_string},
};

/// Remote OneBot actions the rest of the workspace depends on.
///
/// [`crate::OneBotClient`] implements this over HTTP; tests implement it on
/// in-memory fakes.
#[async_trait]
pub trait OneBotApi: Send + Sync {
    async fn get_login_info(&self) -> Result<LoginInfo>;

    async fn get_status(&self) -> Result<BotStatus>;

    async fn get_group_list(&self) -> Result<Vec<GroupInfo>>;

    async fn get_group_info(&self, group_id: &str) -> Result<GroupInfo>;

    async fn get_friend_list(&self) -> Result<Vec<FriendInfo>>;

    /// Send a text message, optionally quoting `reply_to`.
    async fn send_text(
        &self,
        kind: TargetKind,
        target: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<SentMessage>;

    /// Recent history for a group or friend, oldest first.
    async fn get_msg_history(
        &self,
        kind: TargetKind,
        target: &str,
        count: usize,
    ) -> Result<Vec<MessageEvent>>;

    /// Fetch a single message by id.
    async fn get_msg(&self, message_id: &str) -> Result<MessageEvent>;

    /// Fetch the nodes of a forwarded bundle.
    async fn get_forward_msg(&self, id: &str) -> Result<Vec<ForwardNode>>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginInfo {
    #[serde(default, deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default)]
    pub nickname: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotStatus {
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub good: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupInfo {
    #[serde(default, deserialize_with = "id_string")]
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub member_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FriendInfo {
    #[serde(default, deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub remark: String,
}

impl FriendInfo {
    /// Nickname, falling back to the remark.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.nickname.is_empty() {
            &self.remark
        } else {
            &self.nickname
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SentMessage {
    #[serde(default, deserialize_with = "id_string")]
    pub message_id: String,
}
