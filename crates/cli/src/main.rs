use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::Parser,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    qq_agent_config::{AgentConfig, Severity},
    qq_agent_context::{ContextManager, OutboundSender},
    qq_agent_mcp::{McpServer, Peer, SamplingSummarizer, ToolContext, ToolRegistry},
    qq_agent_onebot::{OneBotApi, OneBotClient},
};

const LOGIN_WAIT: Duration = Duration::from_secs(30);
const LOGIN_POLL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "qq-agent",
    version,
    about = "QQ chat context over MCP, backed by NapCat"
)]
struct Cli {
    /// Config file (default: ./qq-agent.toml, then ~/.config/qq-agent/).
    #[arg(long, env = "QQ_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// QQ account of the logged-in bot.
    #[arg(long, env = "QQ_AGENT_QQ")]
    qq: Option<String>,

    /// NapCat host.
    #[arg(long)]
    napcat_host: Option<String>,

    /// NapCat HTTP API port.
    #[arg(long)]
    napcat_port: Option<u16>,

    /// NapCat WebSocket event port.
    #[arg(long)]
    ws_port: Option<u16>,

    /// Group ids to monitor, comma separated (default: all groups).
    #[arg(long, value_delimiter = ',')]
    groups: Option<Vec<String>>,

    /// Friend ids whose private messages are monitored, comma separated.
    #[arg(long, value_delimiter = ',')]
    friends: Option<Vec<String>>,

    /// Messages kept per group or friend.
    #[arg(long)]
    buffer_size: Option<usize>,

    /// New messages per target before a compression batch is marked.
    #[arg(long)]
    compress_every: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => qq_agent_config::load_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => qq_agent_config::discover_and_load(),
        };

        if let Some(qq) = &self.qq {
            config.account.qq.clone_from(qq);
        }
        if let Some(host) = &self.napcat_host {
            config.napcat.host.clone_from(host);
        }
        if let Some(port) = self.napcat_port {
            config.napcat.http_port = port;
        }
        if let Some(port) = self.ws_port {
            config.napcat.ws_port = port;
        }
        if let Some(groups) = &self.groups {
            config.monitor.groups = Some(trimmed(groups));
        }
        if let Some(friends) = &self.friends {
            config.monitor.friends = trimmed(friends);
        }
        if let Some(size) = self.buffer_size {
            config.buffer.size = size;
        }
        if let Some(every) = self.compress_every {
            config.buffer.compress_every = every;
        }
        Ok(config)
    }
}

fn trimmed(ids: &[String]) -> Vec<String> {
    ids.iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Logs go to stderr; stdout carries the MCP protocol.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Poll NapCat until the account answers, giving up after [`LOGIN_WAIT`].
async fn wait_for_login(api: &dyn OneBotApi) -> bool {
    let deadline = tokio::time::Instant::now() + LOGIN_WAIT;
    loop {
        match api.get_login_info().await {
            Ok(login) => {
                info!(qq = %login.user_id, nickname = %login.nickname, "NapCat ready");
                return true;
            },
            Err(e) if tokio::time::Instant::now() + LOGIN_POLL < deadline => {
                info!(error = %e, "waiting for NapCat");
                tokio::time::sleep(LOGIN_POLL).await;
            },
            Err(e) => {
                warn!(error = %e, "NapCat not reachable, continuing anyway");
                return false;
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = cli.load_config()?;
    let diagnostics = qq_agent_config::validate(&config);
    for d in &diagnostics {
        match d.severity {
            Severity::Error => error!(path = d.path, "{}", d.message),
            Severity::Warning => warn!(path = d.path, "{}", d.message),
        }
    }
    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        anyhow::bail!("invalid configuration");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        qq = %config.account.qq,
        napcat = %config.napcat.http_base_url(),
        "qq-agent starting"
    );

    let client = OneBotClient::new(
        config.napcat.http_base_url(),
        Duration::from_secs(config.napcat.timeout_secs),
    )?
    .with_access_token(config.napcat.access_token.clone());
    let api: Arc<dyn OneBotApi> = Arc::new(client);

    wait_for_login(api.as_ref()).await;

    let manager = Arc::new(ContextManager::new(&config, Arc::clone(&api)));
    let seeded = manager.backfill().await;
    manager.mark_all_pending();
    info!(messages = seeded, "history backfilled");
    manager.start();

    let peer = Arc::new(Peer::stdout());
    let ctx = Arc::new(ToolContext::new(
        Arc::clone(&manager),
        OutboundSender::new(Arc::clone(&manager), &config.outbound),
        Arc::new(SamplingSummarizer::new(Arc::clone(&peer))),
    ));
    let server = Arc::new(McpServer::new(ToolRegistry::with_qq_tools(ctx), peer));

    let served = tokio::select! {
        res = server.serve(tokio::io::stdin()) => res.context("MCP server failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        },
    };

    manager.stop().await;
    info!("qq-agent stopped");
    served
}
