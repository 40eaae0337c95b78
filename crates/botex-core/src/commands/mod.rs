//! Command contract, the name-keyed registry and the built-in management commands.

pub mod help;
pub mod latex;
pub mod rank;
pub mod registration;

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{
        validation::validate_command_name, AccessControlStore, Rank, StoreError, OWNER_RANK,
        WILDCARD,
    },
    config::Config,
    domain::{ChatId, UserId},
    messaging::{InboundMessage, MessagingPort},
    Error, Result,
};

pub use help::HelpCommand;
pub use latex::LatexCommand;
pub use rank::RankCommand;
pub use registration::{
    RegisterGroupCommand, RegisterUserCommand, UnregisterGroupCommand, UnregisterUserCommand,
};

/// Help text for one command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandInfo {
    pub description: String,
    pub usage: String,
    pub examples: Vec<String>,
}

/// Everything a handler gets for one invocation.
#[derive(Clone, Debug)]
pub struct CommandContext {
    pub message: InboundMessage,
    pub command: String,
    pub args: String,
    /// Resolved by the permission check.
    pub user_rank: Option<String>,
    pub is_platform_admin: bool,
    /// Cancelled when the per-message deadline passes.
    pub cancel: CancellationToken,
}

impl CommandContext {
    pub fn sender(&self) -> &UserId {
        &self.message.sender
    }

    pub fn chat(&self) -> ChatId {
        self.message.chat()
    }

    pub fn arg_list(&self) -> Vec<&str> {
        self.args.split_whitespace().collect()
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    fn info(&self) -> CommandInfo;

    async fn handle(&self, ctx: CommandContext) -> Result<()>;
}

/// Name -> command map, built once at startup and handed to the dispatcher.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<()> {
        let name = command.name().to_lowercase();
        validate_command_name(&name)
            .map_err(|e| Error::Config(format!("command {name:?}: {e}")))?;
        if self.commands.contains_key(&name) {
            return Err(Error::Config(format!("command {name:?} registered twice")));
        }
        tracing::debug!(command = %name, "registered command");
        self.commands.insert(name, command);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    /// Sorted `(name, info)` pairs.
    pub fn catalog(&self) -> Vec<(String, CommandInfo)> {
        self.commands
            .iter()
            .map(|(name, cmd)| (name.clone(), cmd.info()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Registry with the management commands, `latex` when a renderer is configured, and `help`.
pub fn builtin_registry(
    store: Arc<dyn AccessControlStore>,
    messenger: Arc<dyn MessagingPort>,
    cfg: &Config,
) -> Result<CommandRegistry> {
    let mut registry = CommandRegistry::new();
    let prefix = cfg.command_prefix;

    registry.register(Arc::new(RegisterUserCommand::new(
        store.clone(),
        messenger.clone(),
        cfg.auth.default_rank.clone(),
        prefix,
    )))?;
    registry.register(Arc::new(UnregisterUserCommand::new(
        store.clone(),
        messenger.clone(),
        prefix,
    )))?;
    registry.register(Arc::new(RegisterGroupCommand::new(
        store.clone(),
        messenger.clone(),
        prefix,
    )))?;
    registry.register(Arc::new(UnregisterGroupCommand::new(
        store.clone(),
        messenger.clone(),
        prefix,
    )))?;
    registry.register(Arc::new(RankCommand::new(store, messenger.clone(), prefix)))?;
    match LatexCommand::new(
        messenger.clone(),
        &cfg.latex.renderer,
        cfg.latex.timeout,
        prefix,
    ) {
        Some(latex) => registry.register(Arc::new(latex))?,
        None => tracing::info!("no latex renderer configured, latex disabled"),
    }

    let help = HelpCommand::new(messenger, prefix, &registry);
    registry.register(Arc::new(help))?;
    Ok(registry)
}

/// User-facing text for a store failure. Infrastructure details stay in the logs.
pub(crate) fn store_error_message(e: &StoreError) -> String {
    match e {
        StoreError::UserNotFound(id) => format!("User `{id}` is not registered."),
        StoreError::UserAlreadyExists(id) => format!("User `{id}` is already registered."),
        StoreError::InvalidRank(r) | StoreError::RankNotFound(r) => {
            format!("Rank `{r}` does not exist.")
        }
        StoreError::RankAlreadyExists(r) => format!("Rank `{r}` already exists."),
        StoreError::RankLevelTaken { level, holder } => {
            format!("Level {level} is already used by rank `{holder}`.")
        }
        StoreError::RankInUse { rank, users } => {
            format!("Rank `{rank}` is still assigned to {users} user(s).")
        }
        StoreError::GroupNotFound(g) => format!("Group `{g}` is not registered."),
        StoreError::GroupAlreadyExists(g) => format!("Group `{g}` is already registered."),
        StoreError::RegistrarNotFound(_) => {
            "Only registered users can register a group.".to_string()
        }
        StoreError::InvalidInput(msg) => format!("Invalid input: {msg}"),
        StoreError::AdminUnavailable(_)
        | StoreError::Closed
        | StoreError::Corrupt(_)
        | StoreError::Database(_) => "Something went wrong. Please try again later.".to_string(),
    }
}

/// Shared plumbing for commands that talk back and consult the rank hierarchy.
pub(crate) struct Responder {
    pub store: Arc<dyn AccessControlStore>,
    pub messenger: Arc<dyn MessagingPort>,
}

impl Responder {
    pub async fn reply(&self, ctx: &CommandContext, text: &str) -> Result<()> {
        self.messenger.send_text(&ctx.chat(), text).await
    }

    /// Tell the user why nothing happened and fail the command.
    pub async fn refuse(&self, ctx: &CommandContext, text: impl Into<String>) -> Error {
        let text = text.into();
        if let Err(e) = self.reply(ctx, &text).await {
            tracing::warn!(error = %e, "failed to send command reply");
        }
        Error::Command(text)
    }

    pub async fn store_failure(&self, ctx: &CommandContext, e: StoreError) -> Error {
        match &e {
            StoreError::AdminUnavailable(_)
            | StoreError::Closed
            | StoreError::Corrupt(_)
            | StoreError::Database(_) => {
                tracing::error!(command = %ctx.command, user = %ctx.sender(), error = %e, "store failure");
            }
            _ => {}
        }
        self.refuse(ctx, store_error_message(&e)).await
    }

    /// The caller's own rank, used for hierarchy checks.
    pub async fn caller_rank(&self, ctx: &CommandContext) -> std::result::Result<Rank, Error> {
        let Some(name) = ctx.user_rank.as_deref() else {
            return Err(self.refuse(ctx, "Unable to determine your rank.").await);
        };
        match self.store.get_rank(name).await {
            Ok(rank) => Ok(rank),
            Err(e) => Err(self.store_failure(ctx, e).await),
        }
    }
}

/// A caller may hand out ranks at or below their own level.
pub(crate) fn may_assign(caller: &Rank, target: &Rank) -> bool {
    caller.level <= target.level
}

/// Rank definitions can only be changed from strictly above, except by the owner.
pub(crate) fn may_manage(caller: &Rank, target_level: i64) -> bool {
    caller.name == OWNER_RANK || caller.level < target_level
}

/// Only the owner hands out the wildcard; everyone else grants what they hold.
pub(crate) fn may_grant(caller: &Rank, command: &str) -> bool {
    caller.name == OWNER_RANK || (command != WILDCARD && caller.allows(command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{inbound, seeded_store, RecordingMessenger, ALICE};

    struct Noop(&'static str);

    #[async_trait]
    impl Command for Noop {
        fn name(&self) -> &str {
            self.0
        }

        fn info(&self) -> CommandInfo {
            CommandInfo {
                description: format!("{} things", self.0),
                ..CommandInfo::default()
            }
        }

        async fn handle(&self, _ctx: CommandContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_rejects_duplicates_and_bad_names() {
        let mut reg = CommandRegistry::new();
        reg.register(Arc::new(Noop("latex"))).unwrap();
        assert!(matches!(
            reg.register(Arc::new(Noop("latex"))),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            reg.register(Arc::new(Noop("bad name"))),
            Err(Error::Config(_))
        ));
        assert!(reg.get("LaTeX").is_some());
        assert!(reg.get("missing").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn catalog_is_sorted() {
        let mut reg = CommandRegistry::new();
        reg.register(Arc::new(Noop("zeta"))).unwrap();
        reg.register(Arc::new(Noop("alpha"))).unwrap();
        let names: Vec<String> = reg.catalog().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn builtin_registry_has_management_commands() {
        let store = seeded_store().await;
        let messenger = Arc::new(RecordingMessenger::default());
        let reg = builtin_registry(store, messenger, &Config::default()).unwrap();
        assert_eq!(
            reg.names(),
            vec![
                "help",
                "rank",
                "register_group",
                "register_user",
                "unregister_group",
                "unregister_user"
            ]
        );
    }

    #[tokio::test]
    async fn latex_is_registered_with_a_renderer() {
        let store = seeded_store().await;
        let messenger = Arc::new(RecordingMessenger::default());
        let mut cfg = Config::default();
        cfg.latex.renderer = vec!["render-tex".to_string()];
        let reg = builtin_registry(store, messenger.clone(), &cfg).unwrap();
        assert!(reg.get("latex").is_some());
        assert_eq!(reg.len(), 7);

        let help = reg.get("help").unwrap();
        let ctx = CommandContext {
            message: inbound(ALICE, None, "!help"),
            command: "help".to_string(),
            args: String::new(),
            user_rank: Some("user".to_string()),
            is_platform_admin: false,
            cancel: CancellationToken::new(),
        };
        help.handle(ctx).await.unwrap();
        assert!(messenger
            .last_text()
            .unwrap()
            .contains("`!latex` - Render a LaTeX equation as an image"));
    }

    #[test]
    fn hierarchy_rules() {
        let owner = Rank::new("owner", 0, vec!["*".into()]);
        let moderator = Rank::new("moderator", 10, vec![]);
        let user = Rank::new("user", 50, vec![]);

        assert!(may_assign(&moderator, &user));
        assert!(may_assign(&moderator, &moderator));
        assert!(!may_assign(&moderator, &owner));

        assert!(may_manage(&owner, 0));
        assert!(may_manage(&moderator, 50));
        assert!(!may_manage(&moderator, 10));
    }

    #[test]
    fn only_held_commands_can_be_granted() {
        let owner = Rank::new("owner", 0, vec!["*".into()]);
        let moderator = Rank::new("moderator", 10, vec!["rank".into(), "help".into()]);
        let deputy = Rank::new("deputy", 5, vec!["*".into()]);

        assert!(may_grant(&owner, "*"));
        assert!(may_grant(&owner, "latex"));
        assert!(may_grant(&moderator, "help"));
        assert!(!may_grant(&moderator, "latex"));
        assert!(!may_grant(&moderator, "*"));
        // A wildcard holder below the owner still cannot pass the wildcard on.
        assert!(may_grant(&deputy, "latex"));
        assert!(!may_grant(&deputy, "*"));
    }

    #[test]
    fn store_errors_never_leak_database_text() {
        let msg = store_error_message(&StoreError::Database(sqlx::Error::PoolClosed));
        assert_eq!(msg, "Something went wrong. Please try again later.");
        let msg = store_error_message(&StoreError::RankInUse {
            rank: "user".into(),
            users: 2,
        });
        assert_eq!(msg, "Rank `user` is still assigned to 2 user(s).");
    }
}
