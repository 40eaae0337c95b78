use tracing_subscriber::{fmt, EnvFilter};

use crate::{Error, Result};

/// Initialize tracing for the bot.
///
/// `level` is the configured default (`BOTEX_LOG_LEVEL`); `RUST_LOG` wins when set.
pub fn init(service_name: &str, level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(service_name, level)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to initialise logging: {e}")))
}

fn default_directives(service_name: &str, level: &str) -> String {
    let level = match level.trim().to_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error") => l.to_string(),
        _ => "info".to_string(),
    };
    // Quiet third-party crates; our own crates follow the configured level.
    let service = service_name.replace('-', "_");
    format!("warn,{service}={level},botex_core={level},botex_telegram={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_use_configured_level_for_own_crates() {
        let d = default_directives("botex", "debug");
        assert!(d.starts_with("warn,"));
        assert!(d.contains("botex_core=debug"));
        assert!(d.contains("botex=debug"));
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        let d = default_directives("botex", "loud");
        assert!(d.contains("botex_core=info"));
    }
}
