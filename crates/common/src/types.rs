//! Conversation target identity shared by the context engine and the tool layer.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Kind of conversation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Group,
    /// One-to-one (friend) conversation.
    Private,
}

impl TargetKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(Self::Group),
            "private" => Ok(Self::Private),
            other => Err(Error::InvalidTargetKind(other.to_string())),
        }
    }
}

/// A `(kind, id)` pair identifying one buffer, rendered as `"{kind}:{id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub kind: TargetKind,
    pub id: String,
}

impl TargetKey {
    pub fn new(kind: TargetKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(TargetKind::Group, id)
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self::new(TargetKind::Private, id)
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
