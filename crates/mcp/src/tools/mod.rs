//! Tools exposed over `tools/call`.

mod context;
mod send;
mod status;

use std::{sync::Arc, time::Instant};

use {
    async_trait::async_trait,
    serde::{Deserialize, Deserializer, de::DeserializeOwned},
    serde_json::Value,
};

use {
    qq_agent_common::types::{TargetKey, TargetKind},
    qq_agent_context::{ContextManager, OutboundSender, Summarizer},
};

use crate::{
    error::{Error, Result},
    types::McpToolDef,
};

pub use {
    context::{BatchGetRecentContextTool, CompressContextTool, GetRecentContextTool},
    send::SendMessageTool,
    status::{CheckStatusTool, GetGroupListTool},
};

/// A tool callable by the MCP client.
#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value) -> Result<Value>;
}

/// State shared by every tool.
pub struct ToolContext {
    pub manager: Arc<ContextManager>,
    pub sender: OutboundSender,
    pub summarizer: Arc<dyn Summarizer>,
    pub started_at: Instant,
}

impl ToolContext {
    pub fn new(
        manager: Arc<ContextManager>,
        sender: OutboundSender,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            manager,
            sender,
            summarizer,
            started_at: Instant::now(),
        }
    }

    /// Parse `target_type` and apply the allow-lists.
    ///
    /// The error is the user-facing rejection text.
    pub(crate) fn resolve_target(
        &self,
        target: &str,
        target_type: &str,
    ) -> std::result::Result<TargetKey, String> {
        let key = parse_target(target, target_type)?;
        self.manager
            .access()
            .check(&key)
            .map_err(|denied| denied.to_string())?;
        Ok(key)
    }
}

pub(crate) fn parse_target(
    target: &str,
    target_type: &str,
) -> std::result::Result<TargetKey, String> {
    let kind = target_type
        .parse::<TargetKind>()
        .map_err(|_| format!("Invalid target_type: {target_type}"))?;
    Ok(TargetKey::new(kind, target))
}

/// Ordered set of tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn McpTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The six QQ tools sharing one context.
    pub fn with_qq_tools(ctx: Arc<ToolContext>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CheckStatusTool::new(Arc::clone(&ctx))));
        registry.register(Arc::new(GetGroupListTool::new(Arc::clone(&ctx))));
        registry.register(Arc::new(GetRecentContextTool::new(Arc::clone(&ctx))));
        registry.register(Arc::new(BatchGetRecentContextTool::new(Arc::clone(&ctx))));
        registry.register(Arc::new(SendMessageTool::new(Arc::clone(&ctx))));
        registry.register(Arc::new(CompressContextTool::new(ctx)));
        registry
    }

    /// Add a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn McpTool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn McpTool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn definitions(&self) -> Vec<McpToolDef> {
        self.tools
            .iter()
            .map(|t| McpToolDef {
                name: t.name().to_string(),
                description: Some(t.description().to_string()),
                input_schema: t.parameters_schema(),
            })
            .collect()
    }
}

/// Deserialize tool arguments; `null` counts as `{}`.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))
}

pub(crate) fn default_target_type() -> String {
    TargetKind::Group.as_str().to_string()
}

/// Ids arrive as strings or bare numbers depending on the client.
pub(crate) fn id_string<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(i64),
    }
    Ok(match Id::deserialize(de)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

pub(crate) fn opt_id_string<'de, D: Deserializer<'de>>(
    de: D,
) -> std::result::Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "id_string")] String);
    Ok(Option::<Wrapper>::deserialize(de)?
        .map(|Wrapper(id)| id)
        .filter(|id| !id.is_empty()))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[derive(Debug, Deserialize)]
    struct Args {
        #[serde(deserialize_with = "id_string")]
        target: String,
        #[serde(default, deserialize_with = "opt_id_string")]
        reply_to: Option<String>,
        #[serde(default = "default_target_type")]
        target_type: String,
    }

    #[rstest]
    #[case(json!({"target": "123"}), "123", None)]
    #[case(json!({"target": 123, "reply_to": 456}), "123", Some("456"))]
    #[case(json!({"target": "1", "reply_to": null}), "1", None)]
    #[case(json!({"target": "1", "reply_to": ""}), "1", None)]
    fn ids_accept_strings_and_numbers(
        #[case] input: Value,
        #[case] target: &str,
        #[case] reply_to: Option<&str>,
    ) {
        let args: Args = parse_params(input).unwrap();
        assert_eq!(args.target, target);
        assert_eq!(args.reply_to.as_deref(), reply_to);
        assert_eq!(args.target_type, "group");
    }

    #[test]
    fn missing_required_argument_is_invalid_params() {
        let err = parse_params::<Args>(Value::Null).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn unknown_target_type_is_rejected() {
        assert_eq!(
            parse_target("1", "channel").unwrap_err(),
            "Invalid target_type: channel"
        );
        assert_eq!(parse_target("1", "private").unwrap(), TargetKey::private("1"));
    }
}
