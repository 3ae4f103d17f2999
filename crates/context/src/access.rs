//! Static allow-list gating for groups and friends.

use {
    qq_agent_common::types::{TargetKey, TargetKind},
    qq_agent_config::MonitorConfig,
};

/// Why a target was rejected. The display text is what callers see.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("Group {0} is not monitored")]
    GroupNotMonitored(String),
    #[error("User {0} is not in friends whitelist")]
    FriendNotAllowed(String),
}

/// Which targets are ingested and reachable.
///
/// Groups default to open when no list is configured. Direct messages are
/// never open: an empty friend list denies everyone.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    groups: Option<Vec<String>>,
    friends: Vec<String>,
}

impl AccessPolicy {
    #[must_use]
    pub fn new(groups: Option<Vec<String>>, friends: Vec<String>) -> Self {
        Self { groups, friends }
    }

    #[must_use]
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.groups.clone(), config.friends.clone())
    }

    pub fn check(&self, target: &TargetKey) -> Result<(), AccessDenied> {
        match target.kind {
            TargetKind::Group if self.is_group_allowed(&target.id) => Ok(()),
            TargetKind::Group => Err(AccessDenied::GroupNotMonitored(target.id.clone())),
            TargetKind::Private if self.is_friend_allowed(&target.id) => Ok(()),
            TargetKind::Private => Err(AccessDenied::FriendNotAllowed(target.id.clone())),
        }
    }

    #[must_use]
    pub fn is_group_allowed(&self, group_id: &str) -> bool {
        match &self.groups {
            None => true,
            Some(list) => matches_any(group_id, list),
        }
    }

    #[must_use]
    pub fn is_friend_allowed(&self, user_id: &str) -> bool {
        matches_any(user_id, &self.friends)
    }

    /// Configured friend entries (patterns included).
    #[must_use]
    pub fn friends(&self) -> &[String] {
        &self.friends
    }
}

/// Exact or `*`-glob match against any entry. An empty list matches nothing.
fn matches_any(id: &str, list: &[String]) -> bool {
    list.iter().any(|pattern| {
        if pattern.contains('*') {
            glob_match(pattern, id)
        } else {
            pattern == id
        }
    })
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(head) = parts.next() else {
        return false;
    };
    let Some(mut rest) = text.strip_prefix(head) else {
        return false;
    };
    let mut parts: Vec<&str> = parts.collect();
    let tail = parts.pop().unwrap_or_default();
    for part in parts.into_iter().filter(|p| !p.is_empty()) {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(tail)
}
