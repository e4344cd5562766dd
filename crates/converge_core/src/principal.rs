//! Actor identity and roles.
//!
//! A `Principal` is constructed explicitly at the service boundary — there is
//! no implicit or thread-local identity anywhere in the codebase. The routing
//! layer (out of scope) is responsible for authenticating the session and
//! populating roles before calling into the pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Portal role, ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Contributor,
    Publisher,
    Administrator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Contributor => "contributor",
            Self::Publisher => "publisher",
            Self::Administrator => "administrator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewer" => Some(Self::Viewer),
            "contributor" => Some(Self::Contributor),
            "publisher" => Some(Self::Publisher),
            "administrator" | "admin" => Some(Self::Administrator),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An authenticated actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub roles: Vec<Role>,
}

impl Principal {
    /// Construct explicitly for in-process use.
    /// Caller is responsible for populating roles correctly.
    pub fn new(user_id: Uuid, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn is_administrator(&self) -> bool {
        self.roles.contains(&Role::Administrator)
    }

    /// Contributor-or-above: contributor, publisher, or administrator.
    pub fn is_contributor_or_above(&self) -> bool {
        self.roles.iter().any(|r| *r >= Role::Contributor)
    }

    /// Publisher-or-administrator — the gate for publish operations.
    pub fn can_publish(&self) -> bool {
        self.roles.iter().any(|r| *r >= Role::Publisher)
    }
}
