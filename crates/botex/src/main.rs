use std::sync::Arc;

use botex_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), botex_core::Error> {
    let cfg = Arc::new(Config::load()?);
    botex_core::logging::init("botex", &cfg.log_level)?;

    tracing::info!(
        prefix = %cfg.command_prefix,
        max_concurrent = cfg.max_concurrent,
        rate_limit = cfg.rate_limit.requests,
        "starting botex"
    );

    botex_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| botex_core::Error::External(format!("telegram bot failed: {e:#}")))?;

    Ok(())
}
