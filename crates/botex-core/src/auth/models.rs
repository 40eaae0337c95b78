use chrono::{DateTime, Utc};

use crate::domain::{GroupId, UserId};

/// Command-set entry granting every command.
pub const WILDCARD: &str = "*";

pub const OWNER_RANK: &str = "owner";
pub const BASIC_RANK: &str = "basic";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub rank: String,
    pub registered_at: DateTime<Utc>,
    pub registered_by: Option<UserId>,
    pub active: bool,
}

impl User {
    pub fn new(id: UserId, rank: impl Into<String>, registered_by: Option<UserId>) -> Self {
        Self {
            id,
            rank: rank.into(),
            registered_at: Utc::now(),
            registered_by,
            active: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rank {
    pub name: String,
    /// Lower is more privileged; 0 is the top rank.
    pub level: i64,
    pub commands: Vec<String>,
    pub description: String,
    pub active: bool,
}

impl Rank {
    pub fn new(name: impl Into<String>, level: i64, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            level,
            commands,
            description: String::new(),
            active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Exact match or wildcard.
    pub fn allows(&self, command: &str) -> bool {
        self.commands
            .iter()
            .any(|c| c == WILDCARD || c == command)
    }

    pub fn outranks_or_equals(&self, other: &Rank) -> bool {
        self.level <= other.level
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredGroup {
    pub id: GroupId,
    pub registered_at: DateTime<Utc>,
    pub registered_by: UserId,
    pub active: bool,
}

impl RegisteredGroup {
    pub fn new(id: GroupId, registered_by: UserId) -> Self {
        Self {
            id,
            registered_at: Utc::now(),
            registered_by,
            active: true,
        }
    }
}

/// Why a permission check said no. Lets callers pick wording without parsing `reason`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Denial {
    InvalidCommand,
    GroupNotRegistered,
    UserNotRegistered,
    CommandNotAllowed,
    LookupFailed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionResult {
    pub allowed: bool,
    pub reason: String,
    pub user_rank: Option<String>,
    pub is_platform_admin: bool,
    pub denial: Option<Denial>,
}

impl PermissionResult {
    pub fn granted(rank: String, is_platform_admin: bool) -> Self {
        Self {
            allowed: true,
            reason: "Access granted".to_string(),
            user_rank: Some(rank),
            is_platform_admin,
            denial: None,
        }
    }

    pub fn denied(denial: Denial, reason: impl Into<String>, user_rank: Option<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            user_rank,
            is_platform_admin: false,
            denial: Some(denial),
        }
    }
}

/// Ranks seeded on first start.
///
/// When the configured default rank is not `basic`, it takes level 100 and
/// `basic` moves down to 200.
pub fn default_ranks(default_rank: &str) -> Vec<Rank> {
    let mut ranks = vec![Rank::new(OWNER_RANK, 0, vec![WILDCARD.to_string()])
        .with_description("Full access to every command")];

    if default_rank.is_empty() || default_rank == BASIC_RANK || default_rank == OWNER_RANK {
        ranks.push(
            Rank::new(BASIC_RANK, 100, Vec::new())
                .with_description("Registered user; commands must be granted explicitly"),
        );
    } else {
        ranks.push(
            Rank::new(default_rank, 100, Vec::new())
                .with_description("Default rank for newly registered users"),
        );
        ranks.push(
            Rank::new(BASIC_RANK, 200, Vec::new())
                .with_description("Registered user; commands must be granted explicitly"),
        );
    }
    ranks
}
