//! Config schema types (account, NapCat endpoints, monitoring, buffers, outbound pacing).

use {
    secrecy::Secret,
    serde::Deserialize,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub account: AccountConfig,
    pub napcat: NapCatConfig,
    pub monitor: MonitorConfig,
    pub buffer: BufferConfig,
    pub outbound: OutboundConfig,
}

/// The logged-in QQ account this process speaks for.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Local account id. Used for mention detection and `is_self` tagging.
    pub qq: String,
}

/// Where the NapCat (OneBot v11) HTTP and WebSocket endpoints live.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct NapCatConfig {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Optional OneBot access token, sent as a bearer header.
    pub access_token: Option<Secret<String>>,
}

impl NapCatConfig {
    #[must_use]
    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.http_port)
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.ws_port)
    }
}

impl Default for NapCatConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            http_port: 3000,
            ws_port: 3001,
            timeout_secs: 10,
            access_token: None,
        }
    }
}

impl std::fmt::Debug for NapCatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NapCatConfig")
            .field("host", &self.host)
            .field("http_port", &self.http_port)
            .field("ws_port", &self.ws_port)
            .field("timeout_secs", &self.timeout_secs)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Which conversations are ingested and reachable through the tools.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Group allowlist. `None` monitors every joined group.
    pub groups: Option<Vec<String>>,
    /// Friend allowlist. Direct messages are never open by default, so an
    /// empty list means no private conversations at all.
    pub friends: Vec<String>,
}

/// Per-target buffer sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum messages kept per target.
    pub size: usize,
    /// New messages between compression triggers.
    pub compress_every: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: 100,
            compress_every: 30,
        }
    }
}

/// Outbound send pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Minimum interval between two sends to the same target.
    pub rate_limit_secs: f64,
    pub chunk_max_chars: usize,
    pub delay_ms_per_char: u64,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    /// How long to wait after the last chunk before snapshotting replies.
    pub echo_wait_ms: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 3.0,
            chunk_max_chars: 30,
            delay_ms_per_char: 80,
            delay_min_ms: 300,
            delay_max_ms: 3000,
            echo_wait_ms: 500,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn defaults_match_napcat_layout() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.napcat.http_base_url(), "http://127.0.0.1:3000");
        assert_eq!(cfg.napcat.ws_url(), "ws://127.0.0.1:3001");
        assert_eq!(cfg.buffer.size, 100);
        assert_eq!(cfg.buffer.compress_every, 30);
        assert!(cfg.monitor.groups.is_none());
        assert!(cfg.monitor.friends.is_empty());
        assert_eq!(cfg.outbound.chunk_max_chars, 30);
    }

    #[test]
    fn deserialize_partial_toml() {
        let raw = r#"
            [account]
            qq = "3825478002"

            [napcat]
            host = "10.0.0.2"
            access_token = "s3cret"

            [monitor]
            groups = ["1059558644"]
            friends = ["42"]
        "#;
        let cfg: AgentConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.account.qq, "3825478002");
        assert_eq!(cfg.napcat.host, "10.0.0.2");
        assert_eq!(cfg.napcat.http_port, 3000);
        assert_eq!(
            cfg.napcat.access_token.as_ref().unwrap().expose_secret(),
            "s3cret"
        );
        assert_eq!(cfg.monitor.groups.as_deref(), Some(&["1059558644".to_string()][..]));
        assert_eq!(cfg.monitor.friends, vec!["42"]);
        assert_eq!(cfg.buffer.size, 100);
    }

    #[test]
    fn debug_redacts_token() {
        let cfg: NapCatConfig = toml::from_str(r#"access_token = "s3cret""#).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
