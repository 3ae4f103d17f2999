//! Tool contexts over the shared OneBot fake.

use std::sync::Arc;

use {
    qq_agent_config::AgentConfig,
    qq_agent_context::{ContextManager, OutboundSender},
    qq_agent_onebot::OneBotApi,
};

pub(crate) use qq_agent_context::testing::FakeApi;

use crate::{sampling::SamplingSummarizer, tools::ToolContext, transport::Peer};

pub(crate) fn test_config(groups: Option<Vec<&str>>, friends: Vec<&str>) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.account.qq = "10001".into();
    config.monitor.groups = groups.map(|g| g.into_iter().map(str::to_owned).collect());
    config.monitor.friends = friends.into_iter().map(str::to_owned).collect();
    config.outbound.delay_ms_per_char = 0;
    config.outbound.delay_min_ms = 0;
    config.outbound.delay_max_ms = 0;
    config.outbound.echo_wait_ms = 0;
    config
}

/// Tool context over `api`, summarizing through `peer`.
pub(crate) fn tools_with_peer(
    api: FakeApi,
    config: &AgentConfig,
    peer: Arc<Peer>,
) -> (Arc<FakeApi>, Arc<ToolContext>) {
    let api = Arc::new(api);
    let manager = Arc::new(ContextManager::new(
        config,
        Arc::clone(&api) as Arc<dyn OneBotApi>,
    ));
    let sender = OutboundSender::new(Arc::clone(&manager), &config.outbound);
    let summarizer = Arc::new(SamplingSummarizer::new(peer));
    (api, Arc::new(ToolContext::new(manager, sender, summarizer)))
}

/// Tool context whose client never supports sampling.
pub(crate) fn fake_tools(
    api: FakeApi,
    groups: Option<Vec<&str>>,
    friends: Vec<&str>,
) -> (Arc<FakeApi>, Arc<ToolContext>) {
    let (ours, _theirs) = tokio::io::duplex(1024);
    tools_with_peer(api, &test_config(groups, friends), Arc::new(Peer::new(ours)))
}

pub(crate) fn tool_context(
    api: FakeApi,
    groups: Option<Vec<&str>>,
    friends: Vec<&str>,
) -> Arc<ToolContext> {
    fake_tools(api, groups, friends).1
}
