//! HTTP client for NapCat's OneBot v11 endpoint.

use std::time::Duration;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tracing::{debug, trace},
};

use qq_agent_common::types::TargetKind;

use crate::{
    api::{BotStatus, FriendInfo, GroupInfo, LoginInfo, OneBotApi, SentMessage},
    error::{Context, Error, Result},
    event::{ForwardNode, MessageEvent},
    segment::Segment,
};

/// Envelope every OneBot action answers with.
#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default = "missing_retcode")]
    retcode: i64,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    wording: String,
}

fn missing_retcode() -> i64 {
    -1
}

#[derive(Debug, Default, Deserialize)]
struct MessagePage {
    #[serde(default)]
    messages: Vec<MessageEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct ForwardPage {
    #[serde(default, alias = "message")]
    messages: Vec<Value>,
}

/// Async client for the OneBot HTTP API.
pub struct OneBotClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<Secret<String>>,
}

impl OneBotClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
        })
    }

    #[must_use]
    pub fn with_access_token(mut self, token: Option<Secret<String>>) -> Self {
        self.access_token = token;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call an action and return its `data` field.
    async fn call(&self, action: &str, params: Value) -> Result<Option<Value>> {
        let url = format!("{}/{action}", self.base_url);
        debug!(action, %params, "onebot call");

        let mut req = self.http.post(&url).json(&params);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp: ActionResponse = req.send().await?.json().await?;
        trace!(action, retcode = resp.retcode, "onebot response");

        if resp.retcode != 0 {
            let message = if resp.message.is_empty() {
                resp.wording
            } else {
                resp.message
            };
            return Err(Error::Api {
                action: action.to_string(),
                retcode: resp.retcode,
                message,
            });
        }
        Ok(resp.data.filter(|d| !d.is_null()))
    }

    /// Call an action and decode `data`, treating a missing payload as `T::default()`.
    async fn call_as<T: DeserializeOwned + Default>(&self, action: &str, params: Value) -> Result<T> {
        match self.call(action, params).await? {
            Some(data) => serde_json::from_value(data)
                .with_context(|| format!("decode {action} response")),
            None => Ok(T::default()),
        }
    }
}

fn numeric_id(field: &'static str, value: &str) -> Result<i64> {
    value.trim().parse().map_err(|_| Error::InvalidId {
        field,
        value: value.to_string(),
    })
}

#[async_trait]
impl OneBotApi for OneBotClient {
    async fn get_login_info(&self) -> Result<LoginInfo> {
        self.call_as("get_login_info", json!({})).await
    }

    async fn get_status(&self) -> Result<BotStatus> {
        self.call_as("get_status", json!({})).await
    }

    async fn get_group_list(&self) -> Result<Vec<GroupInfo>> {
        self.call_as("get_group_list", json!({})).await
    }

    async fn get_group_info(&self, group_id: &str) -> Result<GroupInfo> {
        let group_id = numeric_id("group_id", group_id)?;
        self.call_as("get_group_info", json!({ "group_id": group_id }))
            .await
    }

    async fn get_friend_list(&self) -> Result<Vec<FriendInfo>> {
        self.call_as("get_friend_list", json!({})).await
    }

    async fn send_text(
        &self,
        kind: TargetKind,
        target: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<SentMessage> {
        let reply = reply_to.map(|id| Segment::Reply {
            id: Some(id.to_string()),
        });
        let message: Vec<Value> = reply
            .iter()
            .chain(std::iter::once(&Segment::text(text)))
            .filter_map(Segment::to_wire)
            .collect();

        match kind {
            TargetKind::Group => {
                let group_id = numeric_id("group_id", target)?;
                self.call_as(
                    "send_group_msg",
                    json!({ "group_id": group_id, "message": message }),
                )
                .await
            },
            TargetKind::Private => {
                let user_id = numeric_id("user_id", target)?;
                self.call_as(
                    "send_private_msg",
                    json!({ "user_id": user_id, "message": message }),
                )
                .await
            },
        }
    }

    async fn get_msg_history(
        &self,
        kind: TargetKind,
        target: &str,
        count: usize,
    ) -> Result<Vec<MessageEvent>> {
        let page: MessagePage = match kind {
            TargetKind::Group => {
                let group_id = numeric_id("group_id", target)?;
                self.call_as(
                    "get_group_msg_history",
                    json!({ "group_id": group_id, "count": count }),
                )
                .await?
            },
            TargetKind::Private => {
                let user_id = numeric_id("user_id", target)?;
                self.call_as(
                    "get_friend_msg_history",
                    json!({ "user_id": user_id, "count": count }),
                )
                .await?
            },
        };
        Ok(page.messages)
    }

    async fn get_msg(&self, message_id: &str) -> Result<MessageEvent> {
        let message_id = numeric_id("message_id", message_id)?;
        self.call_as("get_msg", json!({ "message_id": message_id }))
            .await
    }

    async fn get_forward_msg(&self, id: &str) -> Result<Vec<ForwardNode>> {
        let page: ForwardPage = self.call_as("get_forward_msg", json!({ "id": id })).await?;
        page.messages
            .iter()
            .map(|node| ForwardNode::from_value(node).map_err(Error::from))
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use {
        super::*,
        axum::{Json, Router, extract::Path, http::HeaderMap, routing::post},
    };

    type Seen = Arc<Mutex<Vec<(String, Value, Option<String>)>>>;

    /// Start a mock OneBot endpoint that records each call and answers from `reply`.
    async fn start_mock(reply: fn(&str, &Value) -> Value) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let seen_clone = Arc::clone(&seen);
        let app = Router::new().route(
            "/{action}",
            post(
                move |Path(action): Path<String>, headers: HeaderMap, Json(body): Json<Value>| {
                    let seen = Arc::clone(&seen_clone);
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned);
                        let answer = reply(&action, &body);
                        seen.lock().unwrap().push((action, body, auth));
                        Json(answer)
                    }
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn client(base: &str) -> OneBotClient {
        OneBotClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn login_info_decodes_numeric_id() {
        let (base, _) = start_mock(|_, _| {
            json!({"status": "ok", "retcode": 0, "data": {"user_id": 3825478002_u64, "nickname": "bot"}})
        })
        .await;
        let info = client(&base).get_login_info().await.unwrap();
        assert_eq!(info.user_id, "3825478002");
        assert_eq!(info.nickname, "bot");
    }

    #[tokio::test]
    async fn nonzero_retcode_is_api_error() {
        let (base, _) = start_mock(|_, _| {
            json!({"status": "failed", "retcode": 1400, "message": "", "wording": "bad group"})
        })
        .await;
        let err = client(&base).get_group_info("123").await.unwrap_err();
        match err {
            Error::Api {
                action,
                retcode,
                message,
            } => {
                assert_eq!(action, "get_group_info");
                assert_eq!(retcode, 1400);
                assert_eq!(message, "bad group");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn send_text_prepends_reply_and_uses_integer_ids() {
        let (base, seen) = start_mock(|_, _| {
            json!({"status": "ok", "retcode": 0, "data": {"message_id": 77}})
        })
        .await;
        let sent = client(&base)
            .with_access_token(Some(Secret::new("tok".into())))
            .send_text(TargetKind::Group, "1059558644", "hello", Some("12"))
            .await
            .unwrap();
        assert_eq!(sent.message_id, "77");

        let calls = seen.lock().unwrap();
        let (action, body, auth) = &calls[0];
        assert_eq!(action, "send_group_msg");
        assert_eq!(body["group_id"], json!(1_059_558_644_i64));
        assert_eq!(body["message"][0]["type"], "reply");
        assert_eq!(body["message"][1]["data"]["text"], "hello");
        assert_eq!(auth.as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn non_numeric_target_fails_before_request() {
        let (base, seen) = start_mock(|_, _| json!({"retcode": 0})).await;
        let err = client(&base)
            .send_text(TargetKind::Private, "alice", "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidId { field: "user_id", .. }));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_with_null_data_is_empty() {
        let (base, _) = start_mock(|_, _| json!({"retcode": 0, "data": null})).await;
        let history = client(&base)
            .get_msg_history(TargetKind::Group, "1", 20)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn forward_msg_accepts_message_alias() {
        let (base, _) = start_mock(|_, _| {
            json!({"retcode": 0, "data": {"message": [
                {"sender": {"user_id": 1, "nickname": "a"}, "time": 1, "message": "one"},
                {"type": "node", "data": {"user_id": 2, "nickname": "b", "content": "two"}}
            ]}})
        })
        .await;
        let nodes = client(&base).get_forward_msg("fwd-1").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].sender.user_id, "2");
    }
}
