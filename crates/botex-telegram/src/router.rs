use std::sync::Arc;

use anyhow::Context;
use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use botex_core::{
    auth::{ensure_owner, AccessControlStore, SqliteAccessStore},
    commands::builtin_registry,
    config::Config,
    dispatcher::Dispatcher as CommandDispatcher,
    domain::UserId,
    messaging::{MessagingPort, PlatformAdminPort},
};

use crate::{inbound_from_message, TelegramMessenger};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub dispatcher: Arc<CommandDispatcher>,
}

/// Wire store, commands and dispatcher to a long-polling Telegram bot. Returns on Ctrl-C.
pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let token = cfg
        .telegram_bot_token
        .clone()
        .context("BOTEX_TELEGRAM_TOKEN is not set")?;
    let bot = Bot::new(token);
    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));

    match bot.get_me().await {
        Ok(me) => {
            messenger.set_connected(true);
            tracing::info!(username = %me.username(), "connected to telegram");
        }
        Err(e) => tracing::warn!(error = %e, "get_me failed, continuing"),
    }

    let admin: Option<Arc<dyn PlatformAdminPort>> = if cfg.auth.enable_platform_admin {
        Some(messenger.clone())
    } else {
        None
    };
    let store = Arc::new(
        SqliteAccessStore::open(&cfg.db_path, admin)
            .await
            .with_context(|| format!("opening access store at {}", cfg.db_path))?,
    );
    store.init_schema(&cfg.auth.default_rank).await?;

    if let Some(owner) = &cfg.auth.owner_id {
        let owner = UserId::from(owner.as_str());
        if ensure_owner(&*store, &owner).await? {
            tracing::info!(user = %owner, "bootstrap owner registered");
        }
    }

    let outbound: Arc<dyn MessagingPort> = messenger.clone();
    let registry = builtin_registry(store.clone(), outbound.clone(), &cfg)?;
    tracing::info!(commands = ?registry.names(), "command registry ready");

    let dispatcher = Arc::new(CommandDispatcher::new(
        &cfg,
        store.clone(),
        registry,
        outbound,
    ));

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        dispatcher: dispatcher.clone(),
    });

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("polling stopped, shutting down");
    dispatcher.shutdown().await;
    store.close().await?;
    Ok(())
}

/// Hand each command-looking message to the dispatcher on its own task.
///
/// Teloxide serializes updates per chat; spawning lets the admission controller,
/// not the chat, decide how many commands run at once.
pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(inbound) = inbound_from_message(&msg) else {
        return Ok(());
    };
    if !inbound.text.trim_start().starts_with(state.cfg.command_prefix) {
        return Ok(());
    }

    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        dispatcher.handle_inbound_message(inbound).await;
    });
    Ok(())
}
