use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    auth::{AccessControlStore, RegisteredGroup, StoreError, User},
    domain::{GroupId, UserId},
    messaging::MessagingPort,
    Result,
};

use super::{may_assign, Command, CommandContext, CommandInfo, Responder};

pub struct RegisterUserCommand {
    r: Responder,
    default_rank: String,
    prefix: char,
}

impl RegisterUserCommand {
    pub fn new(
        store: Arc<dyn AccessControlStore>,
        messenger: Arc<dyn MessagingPort>,
        default_rank: String,
        prefix: char,
    ) -> Self {
        Self {
            r: Responder { store, messenger },
            default_rank,
            prefix,
        }
    }
}

#[async_trait]
impl Command for RegisterUserCommand {
    fn name(&self) -> &str {
        "register_user"
    }

    fn info(&self) -> CommandInfo {
        let p = self.prefix;
        CommandInfo {
            description: "Register a user with a rank".to_string(),
            usage: format!("{p}register_user <user_id> [rank]"),
            examples: vec![
                format!("{p}register_user 123456789"),
                format!("{p}register_user 123456789 moderator"),
            ],
        }
    }

    async fn handle(&self, ctx: CommandContext) -> Result<()> {
        let args = ctx.arg_list();
        let Some(target) = args.first().map(|s| UserId::from(*s)) else {
            return Err(self.r.refuse(&ctx, format!("Usage: {}", self.info().usage)).await);
        };
        let rank_name = args.get(1).copied().unwrap_or(self.default_rank.as_str());

        let caller = self.r.caller_rank(&ctx).await?;
        let rank = match self.r.store.get_rank(rank_name).await {
            Ok(rank) => rank,
            Err(e) => return Err(self.r.store_failure(&ctx, e).await),
        };
        if !may_assign(&caller, &rank) {
            return Err(self
                .r
                .refuse(&ctx, format!("You cannot assign rank `{}`.", rank.name))
                .await);
        }

        let user = User::new(target.clone(), rank.name.clone(), Some(ctx.sender().clone()));
        if let Err(e) = self.r.store.create_user(&user).await {
            return Err(self.r.store_failure(&ctx, e).await);
        }

        tracing::info!(user = %target, rank = %rank.name, by = %ctx.sender(), "user registered");
        self.r
            .reply(&ctx, &format!("User `{target}` registered with rank `{}`.", rank.name))
            .await
    }
}

pub struct UnregisterUserCommand {
    r: Responder,
    prefix: char,
}

impl UnregisterUserCommand {
    pub fn new(
        store: Arc<dyn AccessControlStore>,
        messenger: Arc<dyn MessagingPort>,
        prefix: char,
    ) -> Self {
        Self {
            r: Responder { store, messenger },
            prefix,
        }
    }
}

#[async_trait]
impl Command for UnregisterUserCommand {
    fn name(&self) -> &str {
        "unregister_user"
    }

    fn info(&self) -> CommandInfo {
        let p = self.prefix;
        CommandInfo {
            description: "Remove a user's access".to_string(),
            usage: format!("{p}unregister_user <user_id>"),
            examples: vec![format!("{p}unregister_user 123456789")],
        }
    }

    async fn handle(&self, ctx: CommandContext) -> Result<()> {
        let Some(target) = ctx.arg_list().first().map(|s| UserId::from(*s)) else {
            return Err(self.r.refuse(&ctx, format!("Usage: {}", self.info().usage)).await);
        };
        if &target == ctx.sender() {
            return Err(self.r.refuse(&ctx, "You cannot unregister yourself.").await);
        }

        let caller = self.r.caller_rank(&ctx).await?;
        let existing = match self.r.store.get_user(&target).await {
            Ok(u) => u,
            Err(e) => return Err(self.r.store_failure(&ctx, e).await),
        };
        let target_rank = match self.r.store.get_rank(&existing.rank).await {
            Ok(rank) => Some(rank),
            Err(StoreError::RankNotFound(_)) => None,
            Err(e) => return Err(self.r.store_failure(&ctx, e).await),
        };
        if target_rank.is_some_and(|rank| !may_assign(&caller, &rank)) {
            return Err(self
                .r
                .refuse(&ctx, "You cannot unregister a user with a higher rank.")
                .await);
        }

        if let Err(e) = self.r.store.delete_user(&target).await {
            return Err(self.r.store_failure(&ctx, e).await);
        }

        tracing::info!(user = %target, by = %ctx.sender(), "user unregistered");
        self.r
            .reply(&ctx, &format!("User `{target}` unregistered."))
            .await
    }
}

/// `[group_id]` argument, or the group the command was sent from.
fn target_group(ctx: &CommandContext) -> Option<GroupId> {
    ctx.arg_list()
        .first()
        .map(|s| GroupId::from(*s))
        .or_else(|| ctx.message.group.clone())
}

pub struct RegisterGroupCommand {
    r: Responder,
    prefix: char,
}

impl RegisterGroupCommand {
    pub fn new(
        store: Arc<dyn AccessControlStore>,
        messenger: Arc<dyn MessagingPort>,
        prefix: char,
    ) -> Self {
        Self {
            r: Responder { store, messenger },
            prefix,
        }
    }
}

#[async_trait]
impl Command for RegisterGroupCommand {
    fn name(&self) -> &str {
        "register_group"
    }

    fn info(&self) -> CommandInfo {
        let p = self.prefix;
        CommandInfo {
            description: "Allow the bot to accept commands in a group".to_string(),
            usage: format!("{p}register_group [group_id]"),
            examples: vec![
                format!("{p}register_group"),
                format!("{p}register_group -1001234567890"),
            ],
        }
    }

    async fn handle(&self, ctx: CommandContext) -> Result<()> {
        let Some(group) = target_group(&ctx) else {
            return Err(self
                .r
                .refuse(&ctx, "Run this inside a group or pass a group id.")
                .await);
        };

        let registration = RegisteredGroup::new(group.clone(), ctx.sender().clone());
        if let Err(e) = self.r.store.create_group(&registration).await {
            return Err(self.r.store_failure(&ctx, e).await);
        }

        tracing::info!(group = %group, by = %ctx.sender(), "group registered");
        self.r
            .reply(&ctx, &format!("Group `{group}` registered."))
            .await
    }
}

pub struct UnregisterGroupCommand {
    r: Responder,
    prefix: char,
}

impl UnregisterGroupCommand {
    pub fn new(
        store: Arc<dyn AccessControlStore>,
        messenger: Arc<dyn MessagingPort>,
        prefix: char,
    ) -> Self {
        Self {
            r: Responder { store, messenger },
            prefix,
        }
    }
}

#[async_trait]
impl Command for UnregisterGroupCommand {
    fn name(&self) -> &str {
        "unregister_group"
    }

    fn info(&self) -> CommandInfo {
        let p = self.prefix;
        CommandInfo {
            description: "Stop accepting commands in a group".to_string(),
            usage: format!("{p}unregister_group [group_id]"),
            examples: vec![format!("{p}unregister_group")],
        }
    }

    async fn handle(&self, ctx: CommandContext) -> Result<()> {
        let Some(group) = target_group(&ctx) else {
            return Err(self
                .r
                .refuse(&ctx, "Run this inside a group or pass a group id.")
                .await);
        };

        if let Err(e) = self.r.store.delete_group(&group).await {
            return Err(self.r.store_failure(&ctx, e).await);
        }

        tracing::info!(group = %group, by = %ctx.sender(), "group unregistered");
        self.r
            .reply(&ctx, &format!("Group `{group}` unregistered."))
            .await
    }
}
