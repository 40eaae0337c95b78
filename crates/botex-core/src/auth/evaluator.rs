use std::{str::FromStr, sync::Arc};

use crate::{
    config::AuthConfig,
    domain::{GroupId, UserId},
};

use super::{
    models::{Denial, PermissionResult, User},
    store::AccessControlStore,
    validation::validate_command_name,
    StoreError,
};

pub const REASON_INVALID_COMMAND: &str = "Invalid command name";
pub const REASON_GROUP_NOT_REGISTERED: &str = "Group not registered";
pub const REASON_USER_NOT_REGISTERED_PRIVATE: &str = "User not registered for private chat access";
pub const REASON_USER_NOT_REGISTERED_GROUP: &str = "User not registered in this group";
pub const REASON_LOOKUP_FAILED: &str = "Unable to determine user permissions";

/// Which registration is checked first in a group context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckOrder {
    #[default]
    GroupFirst,
    UserFirst,
}

impl FromStr for CheckOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "group_first" | "group" => Ok(CheckOrder::GroupFirst),
            "user_first" | "user" => Ok(CheckOrder::UserFirst),
            other => Err(format!(
                "unknown check order {other:?} (expected group_first or user_first)"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EvaluatorPolicy {
    pub check_order: CheckOrder,
    pub resolve_platform_admin: bool,
    /// Commands a registered, authorised user may run in a group that is not registered yet.
    pub group_bootstrap_commands: Vec<String>,
}

impl Default for EvaluatorPolicy {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for EvaluatorPolicy {
    fn from(cfg: &AuthConfig) -> Self {
        Self {
            check_order: cfg.check_order,
            resolve_platform_admin: cfg.enable_platform_admin,
            group_bootstrap_commands: cfg.group_bootstrap_commands.clone(),
        }
    }
}

/// Decides whether a user may run a command in a given context.
///
/// Never fails: store problems become a "Unable to determine user permissions"
/// denial so the caller can always answer the user.
pub struct PermissionEvaluator {
    store: Arc<dyn AccessControlStore>,
    policy: EvaluatorPolicy,
}

impl PermissionEvaluator {
    pub fn new(store: Arc<dyn AccessControlStore>, policy: EvaluatorPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn check(
        &self,
        user: &UserId,
        group: Option<&GroupId>,
        command: &str,
    ) -> PermissionResult {
        if validate_command_name(command).is_err() {
            return PermissionResult::denied(Denial::InvalidCommand, REASON_INVALID_COMMAND, None);
        }

        let group = group.filter(|g| !g.is_empty());
        let bootstrap =
            group.is_some() && self.policy.group_bootstrap_commands.iter().any(|c| c == command);

        let record = match self.policy.check_order {
            CheckOrder::GroupFirst => {
                if let Some(denied) = self.check_group(group, bootstrap).await {
                    return denied;
                }
                match self.lookup_user(user, group).await {
                    Ok(u) => u,
                    Err(denied) => return denied,
                }
            }
            CheckOrder::UserFirst => {
                let u = match self.lookup_user(user, group).await {
                    Ok(u) => u,
                    Err(denied) => return denied,
                };
                if let Some(denied) = self.check_group(group, bootstrap).await {
                    return denied;
                }
                u
            }
        };

        let rank = match self.store.get_rank(&record.rank).await {
            Ok(rank) => rank,
            Err(e) => {
                tracing::error!(user = %user, rank = %record.rank, error = %e, "rank lookup failed");
                return PermissionResult::denied(
                    Denial::LookupFailed,
                    REASON_LOOKUP_FAILED,
                    Some(record.rank),
                );
            }
        };

        if !rank.allows(command) {
            return PermissionResult::denied(
                Denial::CommandNotAllowed,
                format!("Command '{command}' not allowed for rank '{}'", rank.name),
                Some(rank.name),
            );
        }

        let is_admin = match group {
            Some(g) if self.policy.resolve_platform_admin => self.platform_admin(user, g).await,
            _ => false,
        };
        PermissionResult::granted(rank.name, is_admin)
    }

    async fn check_group(
        &self,
        group: Option<&GroupId>,
        bootstrap: bool,
    ) -> Option<PermissionResult> {
        let group = group?;
        match self.store.get_group(group).await {
            Ok(_) => None,
            Err(StoreError::GroupNotFound(_)) if bootstrap => {
                tracing::debug!(group = %group, "unregistered group, bootstrap command");
                None
            }
            Err(StoreError::GroupNotFound(_)) => Some(PermissionResult::denied(
                Denial::GroupNotRegistered,
                REASON_GROUP_NOT_REGISTERED,
                None,
            )),
            Err(e) => {
                tracing::error!(group = %group, error = %e, "group lookup failed");
                Some(PermissionResult::denied(
                    Denial::LookupFailed,
                    REASON_LOOKUP_FAILED,
                    None,
                ))
            }
        }
    }

    async fn lookup_user(
        &self,
        user: &UserId,
        group: Option<&GroupId>,
    ) -> Result<User, PermissionResult> {
        match self.store.get_user(user).await {
            Ok(u) => Ok(u),
            Err(StoreError::UserNotFound(_)) => {
                let reason = if group.is_some() {
                    REASON_USER_NOT_REGISTERED_GROUP
                } else {
                    REASON_USER_NOT_REGISTERED_PRIVATE
                };
                Err(PermissionResult::denied(
                    Denial::UserNotRegistered,
                    reason,
                    None,
                ))
            }
            Err(e) => {
                tracing::error!(user = %user, error = %e, "user lookup failed");
                Err(PermissionResult::denied(
                    Denial::LookupFailed,
                    REASON_LOOKUP_FAILED,
                    None,
                ))
            }
        }
    }

    /// Unknown admin status is "not admin".
    async fn platform_admin(&self, user: &UserId, group: &GroupId) -> bool {
        match self.store.is_platform_admin(user, group).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(user = %user, group = %group, error = %e, "platform admin check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::SqliteAccessStore,
        test_support::{seeded_store, ADMIN, ALICE, GROUP},
    };

    fn evaluator(store: Arc<SqliteAccessStore>, order: CheckOrder) -> PermissionEvaluator {
        PermissionEvaluator::new(
            store,
            EvaluatorPolicy {
                check_order: order,
                ..EvaluatorPolicy::default()
            },
        )
    }

    fn u(s: &str) -> UserId {
        UserId::from(s)
    }

    fn g(s: &str) -> GroupId {
        GroupId::from(s)
    }

    #[tokio::test]
    async fn unregistered_group_denies_everyone() {
        let ev = evaluator(seeded_store().await, CheckOrder::GroupFirst);
        for who in [ALICE, ADMIN, "bob"] {
            let res = ev.check(&u(who), Some(&g("G-unknown")), "latex").await;
            assert!(!res.allowed);
            assert_eq!(res.reason, "Group not registered");
            assert_eq!(res.denial, Some(Denial::GroupNotRegistered));
        }
    }

    #[tokio::test]
    async fn unknown_user_wording_depends_on_context() {
        let ev = evaluator(seeded_store().await, CheckOrder::GroupFirst);

        let private = ev.check(&u("bob"), None, "latex").await;
        assert!(!private.allowed);
        assert_eq!(private.reason, "User not registered for private chat access");

        let in_group = ev.check(&u("bob"), Some(&g(GROUP)), "latex").await;
        assert!(!in_group.allowed);
        assert_eq!(in_group.reason, "User not registered in this group");
        assert!(in_group.reason.contains("not registered"));
    }

    #[tokio::test]
    async fn allows_only_commands_in_rank() {
        let ev = evaluator(seeded_store().await, CheckOrder::GroupFirst);

        let ok = ev.check(&u(ALICE), Some(&g(GROUP)), "help").await;
        assert!(ok.allowed);
        assert_eq!(ok.reason, "Access granted");
        assert_eq!(ok.user_rank.as_deref(), Some("user"));

        let private = ev.check(&u(ALICE), None, "latex").await;
        assert!(private.allowed);

        let no = ev.check(&u(ALICE), None, "rank").await;
        assert!(!no.allowed);
        assert_eq!(no.reason, "Command 'rank' not allowed for rank 'user'");
        assert_eq!(no.user_rank.as_deref(), Some("user"));

        let owner = ev.check(&u(ADMIN), None, "anything").await;
        assert!(owner.allowed);
        assert_eq!(owner.user_rank.as_deref(), Some("owner"));
    }

    #[tokio::test]
    async fn user_first_order_reports_user_before_group() {
        let ev = evaluator(seeded_store().await, CheckOrder::UserFirst);
        let res = ev.check(&u("bob"), Some(&g("G-unknown")), "help").await;
        assert_eq!(res.reason, "User not registered in this group");

        let res = ev.check(&u(ALICE), Some(&g("G-unknown")), "help").await;
        assert_eq!(res.reason, "Group not registered");
    }

    #[tokio::test]
    async fn invalid_command_is_rejected_before_store_access() {
        let store = seeded_store().await;
        store.close().await.unwrap();
        let ev = evaluator(store, CheckOrder::GroupFirst);

        let res = ev.check(&u(ALICE), None, "rm -rf").await;
        assert_eq!(res.denial, Some(Denial::InvalidCommand));
        let res = ev.check(&u(ALICE), None, "").await;
        assert_eq!(res.denial, Some(Denial::InvalidCommand));

        // A valid name does reach the (closed) store.
        let res = ev.check(&u(ALICE), None, "help").await;
        assert_eq!(res.reason, "Unable to determine user permissions");
        assert_eq!(res.denial, Some(Denial::LookupFailed));
    }

    #[tokio::test]
    async fn broken_rank_is_a_lookup_failure() {
        let store = seeded_store().await;
        sqlx::query("UPDATE ranks SET commands = '{oops' WHERE name = 'user'")
            .execute(store.pool())
            .await
            .unwrap();
        let ev = evaluator(store.clone(), CheckOrder::GroupFirst);
        let res = ev.check(&u(ALICE), None, "help").await;
        assert!(!res.allowed);
        assert_eq!(res.reason, "Unable to determine user permissions");
        assert_eq!(res.user_rank.as_deref(), Some("user"));

        sqlx::query("UPDATE ranks SET commands = '[]', active = 0 WHERE name = 'user'")
            .execute(store.pool())
            .await
            .unwrap();
        let res = ev.check(&u(ALICE), None, "help").await;
        assert_eq!(res.denial, Some(Denial::LookupFailed));
    }

    #[tokio::test]
    async fn bootstrap_command_passes_unregistered_group_for_authorised_user() {
        let ev = evaluator(seeded_store().await, CheckOrder::GroupFirst);

        let res = ev.check(&u(ADMIN), Some(&g("G-new")), "register_group").await;
        assert!(res.allowed);

        // Rank still applies.
        let res = ev.check(&u(ALICE), Some(&g("G-new")), "register_group").await;
        assert_eq!(res.denial, Some(Denial::CommandNotAllowed));

        // Unregistered user gets no bypass.
        let res = ev.check(&u("bob"), Some(&g("G-new")), "register_group").await;
        assert_eq!(res.denial, Some(Denial::UserNotRegistered));

        // Other commands still need a registered group.
        let res = ev.check(&u(ADMIN), Some(&g("G-new")), "help").await;
        assert_eq!(res.denial, Some(Denial::GroupNotRegistered));
    }

    #[tokio::test]
    async fn admin_lookup_failure_does_not_block() {
        // No platform admin port configured: the store reports it unavailable.
        let ev = evaluator(seeded_store().await, CheckOrder::GroupFirst);
        let res = ev.check(&u(ALICE), Some(&g(GROUP)), "help").await;
        assert!(res.allowed);
        assert!(!res.is_platform_admin);
    }

    #[test]
    fn check_order_parses() {
        assert_eq!("group_first".parse::<CheckOrder>(), Ok(CheckOrder::GroupFirst));
        assert_eq!("User-First".parse::<CheckOrder>(), Ok(CheckOrder::UserFirst));
        assert!("sideways".parse::<CheckOrder>().is_err());
    }
}
