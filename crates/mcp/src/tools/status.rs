use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tracing::{debug, warn},
};

use super::{McpTool, ToolContext};
use crate::error::Result;

/// Login, connectivity and monitoring overview.
pub struct CheckStatusTool {
    ctx: Arc<ToolContext>,
}

impl CheckStatusTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl McpTool for CheckStatusTool {
    fn name(&self) -> &str {
        "check_status"
    }

    fn description(&self) -> &str {
        "Check QQ login status and NapCat connection status."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value) -> Result<Value> {
        let manager = &self.ctx.manager;
        let api = manager.api();
        let access = manager.access();

        let login = match api.get_login_info().await {
            Ok(login) => login,
            Err(e) => {
                return Ok(json!({
                    "napcat_running": false,
                    "qq_logged_in": false,
                    "error": e.to_string(),
                }));
            },
        };

        let online_status = match api.get_status().await {
            Ok(status) if status.online => "online",
            Ok(_) => "offline",
            Err(e) => {
                debug!(error = %e, "status query failed");
                "unknown"
            },
        };

        let groups = api.get_group_list().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to list groups");
            Vec::new()
        });
        let monitored_groups: Vec<Value> = groups
            .iter()
            .filter(|g| access.is_group_allowed(&g.group_id))
            .map(|g| {
                json!({
                    "group_id": g.group_id,
                    "group_name": g.group_name,
                    "member_count": g.member_count,
                })
            })
            .collect();

        let mut monitored_friends = Vec::new();
        if !access.friends().is_empty() {
            let names: HashMap<String, String> = match api.get_friend_list().await {
                Ok(friends) => friends
                    .iter()
                    .map(|f| (f.user_id.clone(), f.display_name().to_string()))
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "failed to list friends");
                    HashMap::new()
                },
            };
            for user_id in access.friends() {
                monitored_friends.push(json!({
                    "user_id": user_id,
                    "nickname": names.get(user_id).cloned().unwrap_or_default(),
                }));
            }
        }

        Ok(json!({
            "napcat_running": true,
            "qq_logged_in": true,
            "qq_account": login.user_id,
            "qq_nickname": login.nickname,
            "online_status": online_status,
            "uptime_seconds": self.ctx.started_at.elapsed().as_secs(),
            "monitored_groups": monitored_groups,
            "monitored_friends": monitored_friends,
            "total_groups": groups.len(),
            "buffer_stats": manager.stats(),
        }))
    }
}

/// Every group the account has joined, monitored or not.
pub struct GetGroupListTool {
    ctx: Arc<ToolContext>,
}

impl GetGroupListTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl McpTool for GetGroupListTool {
    fn name(&self) -> &str {
        "get_group_list"
    }

    fn description(&self) -> &str {
        "Get the list of QQ groups the bot has joined."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value) -> Result<Value> {
        let groups = self.ctx.manager.api().get_group_list().await?;
        let groups: Vec<Value> = groups
            .into_iter()
            .map(|g| {
                json!({
                    "group_id": g.group_id,
                    "group_name": g.group_name,
                    "member_count": g.member_count,
                })
            })
            .collect();
        Ok(json!({ "groups": groups }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::testing::{FakeApi, tool_context}};

    #[tokio::test]
    async fn status_lists_monitored_targets() {
        let api = FakeApi::default()
            .with_group("100", "watched", 12)
            .with_group("999", "ignored", 3)
            .with_friend("42", "", "老王");
        let ctx = tool_context(api, Some(vec!["100"]), vec!["42", "43"]);
        let status = CheckStatusTool::new(ctx).execute(Value::Null).await.unwrap();

        assert_eq!(status["napcat_running"], true);
        assert_eq!(status["qq_account"], "10001");
        assert_eq!(status["online_status"], "online");
        assert_eq!(status["total_groups"], 2);
        assert_eq!(status["monitored_groups"].as_array().unwrap().len(), 1);
        assert_eq!(status["monitored_groups"][0]["member_count"], 12);
        assert_eq!(status["monitored_friends"][0]["nickname"], "老王");
        assert_eq!(status["monitored_friends"][1]["nickname"], "");
        assert_eq!(status["buffer_stats"]["total_messages_buffered"], 0);
    }

    #[tokio::test]
    async fn unreachable_napcat_is_reported_not_raised() {
        let ctx = tool_context(FakeApi::default().offline(), None, vec![]);
        let status = CheckStatusTool::new(ctx).execute(Value::Null).await.unwrap();
        assert_eq!(status["napcat_running"], false);
        assert_eq!(status["qq_logged_in"], false);
        assert!(status["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn group_list_includes_unmonitored() {
        let api = FakeApi::default()
            .with_group("100", "a", 1)
            .with_group("200", "b", 2);
        let ctx = tool_context(api, Some(vec!["100"]), vec![]);
        let out = GetGroupListTool::new(ctx).execute(Value::Null).await.unwrap();
        assert_eq!(out["groups"].as_array().unwrap().len(), 2);
        assert_eq!(out["groups"][1]["group_id"], "200");
    }
}
