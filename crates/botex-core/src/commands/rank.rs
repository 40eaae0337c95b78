use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    auth::{
        validation::validate_command_name, AccessControlStore, Rank, StoreError, WILDCARD,
    },
    domain::UserId,
    messaging::MessagingPort,
    Error, Result,
};

use super::{may_assign, may_grant, may_manage, Command, CommandContext, CommandInfo, Responder};

/// `rank <subcommand>`: inspect and manage ranks and user assignments.
pub struct RankCommand {
    r: Responder,
    prefix: char,
}

impl RankCommand {
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

    fn usage(&self) -> String {
        let p = self.prefix;
        format!(
            "Usage:\n\
             {p}rank list\n\
             {p}rank info <user_id>\n\
             {p}rank set <user_id> <rank>\n\
             {p}rank create <name> <level> [command,command,...]\n\
             {p}rank grant <rank> <command>\n\
             {p}rank revoke <rank> <command>\n\
             {p}rank delete <name>"
        )
    }

    async fn fetch_rank(&self, ctx: &CommandContext, name: &str) -> std::result::Result<Rank, Error> {
        match self.r.store.get_rank(name).await {
            Ok(rank) => Ok(rank),
            Err(e) => Err(self.r.store_failure(ctx, e).await),
        }
    }

    async fn list(&self, ctx: &CommandContext) -> Result<()> {
        let ranks = match self.r.store.list_ranks().await {
            Ok(ranks) => ranks,
            Err(e) => return Err(self.r.store_failure(ctx, e).await),
        };

        let mut out = String::from("*Ranks*\n\n");
        for rank in &ranks {
            let users = match self.r.store.count_users_with_rank(&rank.name).await {
                Ok(n) => n,
                Err(e) => return Err(self.r.store_failure(ctx, e).await),
            };
            out.push_str(&format!(
                "`{}` (level {}, {users} user(s)): {}\n",
                rank.name,
                rank.level,
                format_commands(&rank.commands)
            ));
        }
        self.r.reply(ctx, out.trim_end()).await
    }

    async fn show_user(&self, ctx: &CommandContext, user: &str) -> Result<()> {
        let user = match self.r.store.get_user(&UserId::from(user)).await {
            Ok(u) => u,
            Err(e) => return Err(self.r.store_failure(ctx, e).await),
        };
        let rank = self.fetch_rank(ctx, &user.rank).await?;

        let mut out = format!(
            "User `{}`\nRank: `{}` (level {})\nCommands: {}\nRegistered: {}",
            user.id,
            rank.name,
            rank.level,
            format_commands(&rank.commands),
            user.registered_at.format("%Y-%m-%d %H:%M UTC"),
        );
        if let Some(by) = &user.registered_by {
            out.push_str(&format!(" by `{by}`"));
        }
        self.r.reply(ctx, &out).await
    }

    async fn set(&self, ctx: &CommandContext, user: &str, rank_name: &str) -> Result<()> {
        let caller = self.r.caller_rank(ctx).await?;
        let target_rank = self.fetch_rank(ctx, rank_name).await?;

        let mut user = match self.r.store.get_user(&UserId::from(user)).await {
            Ok(u) => u,
            Err(e) => return Err(self.r.store_failure(ctx, e).await),
        };
        let current = match self.r.store.get_rank(&user.rank).await {
            Ok(rank) => Some(rank),
            Err(StoreError::RankNotFound(_)) => None,
            Err(e) => return Err(self.r.store_failure(ctx, e).await),
        };

        if user.id == *ctx.sender() {
            return Err(self.r.refuse(ctx, "You cannot change your own rank.").await);
        }
        let outranked = current.is_some_and(|r| !may_assign(&caller, &r));
        if outranked || !may_assign(&caller, &target_rank) {
            return Err(self
                .r
                .refuse(ctx, "You cannot change ranks above your own.")
                .await);
        }

        user.rank = target_rank.name.clone();
        if let Err(e) = self.r.store.update_user(&user).await {
            return Err(self.r.store_failure(ctx, e).await);
        }

        tracing::info!(user = %user.id, rank = %user.rank, by = %ctx.sender(), "rank assigned");
        self.r
            .reply(ctx, &format!("User `{}` now has rank `{}`.", user.id, user.rank))
            .await
    }

    async fn create(
        &self,
        ctx: &CommandContext,
        name: &str,
        level: &str,
        commands: Option<&str>,
    ) -> Result<()> {
        let Ok(level) = level.parse::<i64>() else {
            return Err(self
                .r
                .refuse(ctx, format!("Level must be a number, got `{level}`."))
                .await);
        };
        let caller = self.r.caller_rank(ctx).await?;
        if !may_manage(&caller, level) || level <= 0 {
            return Err(self
                .r
                .refuse(ctx, "You can only create ranks below your own level.")
                .await);
        }

        let commands: Vec<String> = commands
            .unwrap_or_default()
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if let Some(denied) = commands.iter().find(|c| !may_grant(&caller, c)) {
            return Err(self
                .r
                .refuse(ctx, format!("You cannot grant `{denied}`."))
                .await);
        }
        let rank = Rank::new(name, level, commands);
        if let Err(e) = self.r.store.create_rank(&rank).await {
            return Err(self.r.store_failure(ctx, e).await);
        }

        tracing::info!(rank = %rank.name, level, by = %ctx.sender(), "rank created");
        self.r
            .reply(
                ctx,
                &format!(
                    "Rank `{}` created at level {level}: {}",
                    rank.name,
                    format_commands(&rank.commands)
                ),
            )
            .await
    }

    async fn change_commands(
        &self,
        ctx: &CommandContext,
        rank_name: &str,
        command: &str,
        grant: bool,
    ) -> Result<()> {
        let command = command.to_lowercase();
        if command != WILDCARD && validate_command_name(&command).is_err() {
            return Err(self
                .r
                .refuse(ctx, format!("`{command}` is not a valid command name."))
                .await);
        }

        let caller = self.r.caller_rank(ctx).await?;
        let mut rank = self.fetch_rank(ctx, rank_name).await?;
        if !may_manage(&caller, rank.level) {
            return Err(self
                .r
                .refuse(ctx, format!("You cannot modify rank `{}`.", rank.name))
                .await);
        }

        if grant && !may_grant(&caller, &command) {
            return Err(self
                .r
                .refuse(ctx, format!("You cannot grant `{command}`."))
                .await);
        }

        let present = rank.commands.iter().any(|c| *c == command);
        match (grant, present) {
            (true, true) => {
                return self
                    .r
                    .reply(ctx, &format!("Rank `{}` already has `{command}`.", rank.name))
                    .await;
            }
            (false, false) => {
                return self
                    .r
                    .reply(ctx, &format!("Rank `{}` does not have `{command}`.", rank.name))
                    .await;
            }
            (true, false) => rank.commands.push(command.clone()),
            (false, true) => rank.commands.retain(|c| *c != command),
        }

        if let Err(e) = self.r.store.update_rank(&rank).await {
            return Err(self.r.store_failure(ctx, e).await);
        }

        let verb = if grant { "granted to" } else { "revoked from" };
        tracing::info!(rank = %rank.name, command = %command, grant, by = %ctx.sender(), "rank commands changed");
        self.r
            .reply(ctx, &format!("`{command}` {verb} rank `{}`.", rank.name))
            .await
    }

    async fn delete(&self, ctx: &CommandContext, name: &str) -> Result<()> {
        let caller = self.r.caller_rank(ctx).await?;
        let rank = self.fetch_rank(ctx, name).await?;
        if !may_manage(&caller, rank.level) {
            return Err(self
                .r
                .refuse(ctx, format!("You cannot delete rank `{}`.", rank.name))
                .await);
        }

        if let Err(e) = self.r.store.delete_rank(&rank.name).await {
            return Err(self.r.store_failure(ctx, e).await);
        }

        tracing::info!(rank = %rank.name, by = %ctx.sender(), "rank deleted");
        self.r
            .reply(ctx, &format!("Rank `{}` deleted.", rank.name))
            .await
    }
}

fn format_commands(commands: &[String]) -> String {
    if commands.is_empty() {
        return "(no commands)".to_string();
    }
    if commands.iter().any(|c| c == WILDCARD) {
        return "all commands".to_string();
    }
    commands.join(", ")
}

#[async_trait]
impl Command for RankCommand {
    fn name(&self) -> &str {
        "rank"
    }

    fn info(&self) -> CommandInfo {
        let p = self.prefix;
        CommandInfo {
            description: "Inspect and manage ranks".to_string(),
            usage: format!("{p}rank <list|info|set|create|grant|revoke|delete> ..."),
            examples: vec![
                format!("{p}rank list"),
                format!("{p}rank set 123456789 moderator"),
                format!("{p}rank create moderator 10 help,register_user"),
                format!("{p}rank grant user latex"),
            ],
        }
    }

    async fn handle(&self, ctx: CommandContext) -> Result<()> {
        let args = ctx.arg_list();
        let sub = args.first().map(|s| s.to_lowercase());

        match (sub.as_deref(), &args[args.len().min(1)..]) {
            (Some("list"), _) => self.list(&ctx).await,
            (Some("info"), [user, ..]) => self.show_user(&ctx, user).await,
            (Some("set"), [user, rank, ..]) => self.set(&ctx, user, rank).await,
            (Some("create"), [name, level]) => self.create(&ctx, name, level, None).await,
            (Some("create"), [name, level, commands, ..]) => {
                self.create(&ctx, name, level, Some(*commands)).await
            }
            (Some("grant"), [rank, command, ..]) => {
                self.change_commands(&ctx, rank, command, true).await
            }
            (Some("revoke"), [rank, command, ..]) => {
                self.change_commands(&ctx, rank, command, false).await
            }
            (Some("delete"), [name, ..]) => self.delete(&ctx, name).await,
            _ => Err(self.r.refuse(&ctx, self.usage()).await),
        }
    }
}
