use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::{Map, Value, json},
    tracing::{debug, warn},
};

use qq_agent_common::types::TargetKind;

use super::{McpTool, ToolContext, default_target_type, id_string, parse_params};
use crate::error::Result;

const DEFAULT_LIMIT: usize = 200;
const DEFAULT_BATCH_LIMIT: usize = 50;
const MAX_BATCH_LIMIT: usize = 200;

fn target_schema(extra: Value) -> Value {
    let mut properties = json!({
        "target": {"type": "string", "description": "Group ID or friend QQ ID."},
        "target_type": {
            "type": "string",
            "enum": ["group", "private"],
            "default": "group",
        },
    });
    if let (Some(props), Value::Object(extra)) = (properties.as_object_mut(), extra) {
        props.extend(extra);
    }
    json!({"type": "object", "properties": properties, "required": ["target"]})
}

fn snapshot_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Deserialize)]
struct ContextArgs {
    #[serde(deserialize_with = "id_string")]
    target: String,
    #[serde(default = "default_target_type")]
    target_type: String,
    #[serde(default)]
    limit: Option<i64>,
}

/// Buffered messages and summary for one target.
pub struct GetRecentContextTool {
    ctx: Arc<ToolContext>,
}

impl GetRecentContextTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl McpTool for GetRecentContextTool {
    fn name(&self) -> &str {
        "get_recent_context"
    }

    fn description(&self) -> &str {
        "Get recent message context for a monitored group or whitelisted friend. \
         Returns buffered messages (history backfill plus live) and the compressed \
         summary, if any. Image URLs are listed in each message's image_urls field."
    }

    fn parameters_schema(&self) -> Value {
        target_schema(json!({
            "limit": {"type": "integer", "default": DEFAULT_LIMIT, "minimum": 1},
        }))
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let args: ContextArgs = parse_params(params)?;
        let key = match self.ctx.resolve_target(&args.target, &args.target_type) {
            Ok(key) => key,
            Err(error) => {
                debug!(chat = %args.target, %error, "context request rejected");
                return Ok(json!({ "error": error }));
            },
        };
        let limit = args
            .limit
            .map_or(DEFAULT_LIMIT, |l| usize::try_from(l).unwrap_or(0))
            .max(1);

        let snapshot = self.ctx.manager.get_context(&key, limit);
        let mut out = snapshot_object(serde_json::to_value(&snapshot)?);

        let api = self.ctx.manager.api();
        match key.kind {
            TargetKind::Group => {
                let name = match api.get_group_info(&key.id).await {
                    Ok(info) => info.group_name,
                    Err(e) => {
                        debug!(chat = %key, error = %e, "group name lookup failed");
                        String::new()
                    },
                };
                out.insert("group_name".into(), Value::String(name));
            },
            TargetKind::Private => {
                let name = match api.get_friend_list().await {
                    Ok(friends) => friends
                        .iter()
                        .find(|f| f.user_id == key.id)
                        .map(|f| f.display_name().to_string())
                        .unwrap_or_default(),
                    Err(e) => {
                        debug!(chat = %key, error = %e, "friend name lookup failed");
                        String::new()
                    },
                };
                out.insert("friend_name".into(), Value::String(name));
            },
        }
        Ok(Value::Object(out))
    }
}

#[derive(Deserialize)]
struct BatchTarget {
    #[serde(deserialize_with = "id_string")]
    target: String,
    #[serde(default = "default_target_type")]
    target_type: String,
}

#[derive(Deserialize)]
struct BatchArgs {
    targets: Vec<BatchTarget>,
    #[serde(default)]
    limit: Option<i64>,
}

/// Context for several targets with at most two name lookups.
pub struct BatchGetRecentContextTool {
    ctx: Arc<ToolContext>,
}

impl BatchGetRecentContextTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl McpTool for BatchGetRecentContextTool {
    fn name(&self) -> &str {
        "batch_get_recent_context"
    }

    fn description(&self) -> &str {
        "Batch query recent message context for multiple targets. Uses at most two \
         OneBot calls (group list and friend list) regardless of how many targets are \
         queried. Per-target errors are reported inline."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "targets": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "target": {"type": "string"},
                            "target_type": {"type": "string", "enum": ["group", "private"], "default": "group"},
                        },
                        "required": ["target"],
                    },
                },
                "limit": {"type": "integer", "default": DEFAULT_BATCH_LIMIT, "minimum": 1, "maximum": MAX_BATCH_LIMIT},
            },
            "required": ["targets"],
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let args: BatchArgs = parse_params(params)?;
        let limit = args
            .limit
            .map_or(DEFAULT_BATCH_LIMIT, |l| usize::try_from(l).unwrap_or(0))
            .clamp(1, MAX_BATCH_LIMIT);
        let api = self.ctx.manager.api();

        let wants = |kind: &str| args.targets.iter().any(|t| t.target_type == kind);

        let mut group_names = HashMap::new();
        if wants(TargetKind::Group.as_str()) {
            match api.get_group_list().await {
                Ok(groups) => {
                    group_names = groups
                        .into_iter()
                        .map(|g| (g.group_id, g.group_name))
                        .collect();
                },
                Err(e) => warn!(error = %e, "batch: failed to list groups"),
            }
        }
        let mut friend_names = HashMap::new();
        if wants(TargetKind::Private.as_str()) {
            match api.get_friend_list().await {
                Ok(friends) => {
                    friend_names = friends
                        .iter()
                        .map(|f| (f.user_id.clone(), f.display_name().to_string()))
                        .collect();
                },
                Err(e) => warn!(error = %e, "batch: failed to list friends"),
            }
        }

        let mut results = Vec::with_capacity(args.targets.len());
        for t in &args.targets {
            let key = match self.ctx.resolve_target(&t.target, &t.target_type) {
                Ok(key) => key,
                Err(error) => {
                    results.push(json!({
                        "target": t.target,
                        "target_type": t.target_type,
                        "error": error,
                    }));
                    continue;
                },
            };
            let snapshot = self.ctx.manager.get_context(&key, limit);
            let mut out = snapshot_object(serde_json::to_value(&snapshot)?);
            let (field, names) = match key.kind {
                TargetKind::Group => ("group_name", &group_names),
                TargetKind::Private => ("friend_name", &friend_names),
            };
            out.insert(
                field.into(),
                Value::String(names.get(&key.id).cloned().unwrap_or_default()),
            );
            results.push(Value::Object(out));
        }

        Ok(json!({ "count": results.len(), "results": results }))
    }
}

#[derive(Deserialize)]
struct CompressArgs {
    #[serde(deserialize_with = "id_string")]
    target: String,
    #[serde(default = "default_target_type")]
    target_type: String,
}

/// Fold buffered messages into the target's summary.
pub struct CompressContextTool {
    ctx: Arc<ToolContext>,
}

impl CompressContextTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl McpTool for CompressContextTool {
    fn name(&self) -> &str {
        "compress_context"
    }

    fn description(&self) -> &str {
        "Compress buffered messages for a target into a summary, freeing up the buffer. \
         Uses the client's model when available and a rule-based summary otherwise."
    }

    fn parameters_schema(&self) -> Value {
        target_schema(json!({}))
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let args: CompressArgs = parse_params(params)?;
        let key = match self.ctx.resolve_target(&args.target, &args.target_type) {
            Ok(key) => key,
            Err(error) => return Ok(json!({ "error": error })),
        };

        let outcome = self
            .ctx
            .manager
            .compress(&key, self.ctx.summarizer.as_ref())
            .await;
        if outcome.compressed_count == 0 {
            return Ok(json!({
                "success": true,
                "compressed": 0,
                "message": "No messages to compress",
                "compressed_summary": outcome.summary,
            }));
        }
        let mut out = snapshot_object(serde_json::to_value(&outcome)?);
        out.insert("success".into(), Value::Bool(true));
        Ok(Value::Object(out))
    }
}
