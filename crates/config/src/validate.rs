//! Semantic checks on a loaded configuration.

use crate::schema::AgentConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "buffer.size".
    pub path: &'static str,
    pub message: String,
}

impl Diagnostic {
    fn error(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path,
            message: message.into(),
        }
    }

    fn warning(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.path, self.message)
    }
}

/// Validate a configuration. An empty result means the config is usable.
#[must_use]
pub fn validate(config: &AgentConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    if config.account.qq.trim().is_empty() {
        out.push(Diagnostic::error(
            "account.qq",
            "local QQ account id is required",
        ));
    } else if !config.account.qq.chars().all(|c| c.is_ascii_digit()) {
        out.push(Diagnostic::warning(
            "account.qq",
            format!("'{}' is not numeric", config.account.qq),
        ));
    }

    if config.buffer.size == 0 {
        out.push(Diagnostic::error("buffer.size", "must be at least 1"));
    }
    if config.buffer.compress_every == 0 {
        out.push(Diagnostic::error("buffer.compress_every", "must be at least 1"));
    } else if config.buffer.compress_every > config.buffer.size {
        out.push(Diagnostic::warning(
            "buffer.compress_every",
            format!(
                "{} exceeds buffer.size {}; threshold compression will never fire",
                config.buffer.compress_every, config.buffer.size
            ),
        ));
    }

    if config
        .monitor
        .groups
        .as_ref()
        .is_some_and(|groups| groups.iter().any(|g| g.trim().is_empty()))
    {
        out.push(Diagnostic::warning("monitor.groups", "contains an empty entry"));
    }
    if config.monitor.friends.iter().any(|f| f.trim().is_empty()) {
        out.push(Diagnostic::warning("monitor.friends", "contains an empty entry"));
    }

    let outbound = &config.outbound;
    if outbound.chunk_max_chars == 0 {
        out.push(Diagnostic::error("outbound.chunk_max_chars", "must be at least 1"));
    }
    if outbound.delay_min_ms > outbound.delay_max_ms {
        out.push(Diagnostic::error(
            "outbound.delay_min_ms",
            "must not exceed outbound.delay_max_ms",
        ));
    }
    if !outbound.rate_limit_secs.is_finite() || outbound.rate_limit_secs < 0.0 {
        out.push(Diagnostic::error(
            "outbound.rate_limit_secs",
            "must be a non-negative number",
        ));
    }

    out
}
