use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use {
    regex::{Captures, Regex},
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    schema::AgentConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "qq-agent.toml",
    "qq-agent.yaml",
    "qq-agent.yml",
    "qq-agent.json",
];

#[allow(clippy::expect_used)]
static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid placeholder regex"));

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./qq-agent.{toml,yaml,yml,json}`
/// 2. `~/.config/qq-agent/qq-agent.{toml,yaml,yml,json}`
///
/// Falls back to `AgentConfig::default()` when nothing is found or the file
/// fails to parse.
pub fn discover_and_load() -> AgentConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return AgentConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    load_config(&path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
        AgentConfig::default()
    })
}

/// Returns the user-global config directory (`~/.config/qq-agent/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "qq-agent").map(|d| d.config_dir().to_path_buf())
}

fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Replace `${ENV_VAR}` placeholders with the variable's value.
///
/// Unset variables are left untouched.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    ENV_PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn parse_config(raw: &str, path: &Path) -> Result<AgentConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}
