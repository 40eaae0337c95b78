use std::{env, fs, path::Path, str::FromStr, time::Duration};

use regex::Regex;

use crate::{
    auth::{validation::validate_rank_name, CheckOrder},
    errors::Error,
    timing::TimingLevel,
    Result,
};

/// Typed configuration, read from `BOTEX_*` environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// Required by the Telegram binary; the core never reads it.
    pub telegram_bot_token: Option<String>,
    pub db_path: String,
    pub command_prefix: char,
    pub max_concurrent: usize,
    pub admission_wait: Duration,
    pub handle_timeout: Duration,
    pub log_level: String,
    pub rate_limit: RateLimitConfig,
    pub timing: TimingConfig,
    pub auth: AuthConfig,
    pub latex: LatexConfig,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub requests: usize,
    pub period: Duration,
    pub notification_cooldown: Duration,
    pub cleanup_interval: Duration,
}

#[derive(Clone, Copy, Debug)]
pub struct TimingConfig {
    pub level: TimingLevel,
    pub threshold: Duration,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub default_rank: String,
    pub check_order: CheckOrder,
    pub enable_platform_admin: bool,
    pub group_bootstrap_commands: Vec<String>,
    pub owner_id: Option<String>,
}

/// External equation renderer. An empty command line leaves `latex` unregistered.
#[derive(Clone, Debug)]
pub struct LatexConfig {
    pub renderer: Vec<String>,
    pub timeout: Duration,
}

impl Default for LatexConfig {
    fn default() -> Self {
        Self {
            renderer: Vec::new(),
            timeout: Duration::from_secs(45),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 5,
            period: Duration::from_secs(60),
            notification_cooldown: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            level: TimingLevel::Disabled,
            threshold: Duration::from_millis(100),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_rank: "basic".to_string(),
            check_order: CheckOrder::GroupFirst,
            enable_platform_admin: true,
            group_bootstrap_commands: vec!["register_group".to_string()],
            owner_id: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            db_path: "sqlite://botex.db?mode=rwc".to_string(),
            command_prefix: '!',
            max_concurrent: 10,
            admission_wait: Duration::ZERO,
            handle_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
            rate_limit: RateLimitConfig::default(),
            timing: TimingConfig::default(),
            auth: AuthConfig::default(),
            latex: LatexConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (env, map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_bot_token = get("BOTEX_TELEGRAM_TOKEN");
        let db_path = get("BOTEX_DB_PATH").unwrap_or(defaults.db_path);

        let command_prefix = match get("BOTEX_COMMAND_PREFIX") {
            None => defaults.command_prefix,
            Some(raw) => {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(Error::Config(format!(
                            "BOTEX_COMMAND_PREFIX must be a single character, got {raw:?}"
                        )))
                    }
                }
            }
        };

        let max_concurrent =
            parse_positive_usize(get("BOTEX_MAX_CONCURRENT"), "BOTEX_MAX_CONCURRENT")?
                .unwrap_or(defaults.max_concurrent);
        let admission_wait = parse_duration_var(get("BOTEX_ADMISSION_WAIT"), "BOTEX_ADMISSION_WAIT")?
            .unwrap_or(defaults.admission_wait);
        let handle_timeout = positive(
            parse_duration_var(get("BOTEX_HANDLE_TIMEOUT"), "BOTEX_HANDLE_TIMEOUT")?
                .unwrap_or(defaults.handle_timeout),
            "BOTEX_HANDLE_TIMEOUT",
        )?;
        let log_level = get("BOTEX_LOG_LEVEL").unwrap_or(defaults.log_level);

        // Rate limiting
        let rl = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            requests: parse_positive_usize(
                get("BOTEX_RATE_LIMIT_REQUESTS"),
                "BOTEX_RATE_LIMIT_REQUESTS",
            )?
            .unwrap_or(rl.requests),
            period: positive(
                parse_duration_var(get("BOTEX_RATE_LIMIT_PERIOD"), "BOTEX_RATE_LIMIT_PERIOD")?
                    .unwrap_or(rl.period),
                "BOTEX_RATE_LIMIT_PERIOD",
            )?,
            notification_cooldown: positive(
                parse_duration_var(
                    get("BOTEX_RATE_LIMIT_NOTIFICATION_COOLDOWN"),
                    "BOTEX_RATE_LIMIT_NOTIFICATION_COOLDOWN",
                )?
                .unwrap_or(rl.notification_cooldown),
                "BOTEX_RATE_LIMIT_NOTIFICATION_COOLDOWN",
            )?,
            cleanup_interval: positive(
                parse_duration_var(
                    get("BOTEX_RATE_LIMIT_CLEANUP_INTERVAL"),
                    "BOTEX_RATE_LIMIT_CLEANUP_INTERVAL",
                )?
                .unwrap_or(rl.cleanup_interval),
                "BOTEX_RATE_LIMIT_CLEANUP_INTERVAL",
            )?,
        };

        // Timing
        let timing = TimingConfig {
            level: get("BOTEX_TIMING_LEVEL")
                .map(|s| TimingLevel::from_str(&s).unwrap_or_default())
                .unwrap_or(defaults.timing.level),
            threshold: parse_duration_var(get("BOTEX_TIMING_THRESHOLD"), "BOTEX_TIMING_THRESHOLD")?
                .unwrap_or(defaults.timing.threshold),
        };

        // Access control
        let ac = AuthConfig::default();
        let default_rank = get("BOTEX_AUTH_DEFAULT_RANK").unwrap_or(ac.default_rank);
        validate_rank_name(&default_rank)
            .map_err(|e| Error::Config(format!("BOTEX_AUTH_DEFAULT_RANK: {e}")))?;
        let check_order = match get("BOTEX_AUTH_CHECK_ORDER") {
            None => ac.check_order,
            Some(raw) => CheckOrder::from_str(&raw)
                .map_err(|e| Error::Config(format!("BOTEX_AUTH_CHECK_ORDER: {e}")))?,
        };
        let enable_platform_admin = get("BOTEX_AUTH_ENABLE_PLATFORM_ADMIN")
            .map(|s| parse_bool(&s))
            .unwrap_or(ac.enable_platform_admin);
        let group_bootstrap_commands = get("BOTEX_GROUP_BOOTSTRAP_COMMANDS")
            .map(|s| parse_csv_lower(&s))
            .unwrap_or(ac.group_bootstrap_commands);
        let owner_id = get("BOTEX_OWNER_ID");

        let latex = LatexConfig {
            renderer: get("BOTEX_LATEX_RENDERER")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            timeout: positive(
                parse_duration_var(get("BOTEX_LATEX_TIMEOUT"), "BOTEX_LATEX_TIMEOUT")?
                    .unwrap_or(defaults.latex.timeout),
                "BOTEX_LATEX_TIMEOUT",
            )?,
        };

        Ok(Self {
            telegram_bot_token,
            db_path,
            command_prefix,
            max_concurrent,
            admission_wait,
            handle_timeout,
            log_level,
            rate_limit,
            timing,
            auth: AuthConfig {
                default_rank,
                check_order,
                enable_platform_admin,
                group_bootstrap_commands,
                owner_id,
            },
            latex,
        })
    }
}

/// Parse `250ms`, `30s`, `5m`, `1h`, `1h30m` or a bare integer in milliseconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Error::Config("empty duration".to_string()));
    }
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let whole = Regex::new(r"^(?:\d+(?:ms|h|m|s))+$")
        .map_err(|e| Error::Config(format!("duration pattern: {e}")))?;
    if !whole.is_match(s) {
        return Err(Error::Config(format!("invalid duration: {raw:?}")));
    }
    let part = Regex::new(r"(\d+)(ms|h|m|s)")
        .map_err(|e| Error::Config(format!("duration pattern: {e}")))?;

    let mut total = Duration::ZERO;
    for cap in part.captures_iter(s) {
        let n: u64 = cap[1]
            .parse()
            .map_err(|_| Error::Config(format!("invalid duration: {raw:?}")))?;
        let d = match &cap[2] {
            "ms" => Duration::from_millis(n),
            "s" => Duration::from_secs(n),
            "m" => Duration::from_secs(n.saturating_mul(60)),
            _ => Duration::from_secs(n.saturating_mul(3600)),
        };
        total = total.saturating_add(d);
    }
    Ok(total)
}

fn parse_duration_var(v: Option<String>, key: &str) -> Result<Option<Duration>> {
    v.map(|s| parse_duration(&s).map_err(|e| Error::Config(format!("{key}: {e}"))))
        .transpose()
}

fn positive(d: Duration, key: &str) -> Result<Duration> {
    if d.is_zero() {
        return Err(Error::Config(format!("{key} must be greater than zero")));
    }
    Ok(d)
}

fn parse_positive_usize(v: Option<String>, key: &str) -> Result<Option<usize>> {
    let Some(s) = v else {
        return Ok(None);
    };
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(Error::Config(format!(
            "{key} must be a positive integer, got {s:?}"
        ))),
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv_lower(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue; // never override the real environment
        }

        let mut val = v.trim();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = &val[1..val.len() - 1];
        }

        env::set_var(key, val);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.command_prefix, '!');
        assert_eq!(cfg.max_concurrent, 10);
        assert_eq!(cfg.rate_limit.requests, 5);
        assert_eq!(cfg.rate_limit.period, Duration::from_secs(60));
        assert_eq!(cfg.rate_limit.notification_cooldown, Duration::from_secs(300));
        assert_eq!(cfg.rate_limit.cleanup_interval, Duration::from_secs(3600));
        assert_eq!(cfg.handle_timeout, Duration::from_secs(30));
        assert_eq!(cfg.admission_wait, Duration::ZERO);
        assert_eq!(cfg.timing.level, TimingLevel::Disabled);
        assert_eq!(cfg.auth.default_rank, "basic");
        assert_eq!(cfg.auth.check_order, CheckOrder::GroupFirst);
        assert_eq!(cfg.auth.group_bootstrap_commands, vec!["register_group"]);
        assert!(cfg.telegram_bot_token.is_none());
        assert!(cfg.latex.renderer.is_empty());
        assert_eq!(cfg.latex.timeout, Duration::from_secs(45));
    }

    #[test]
    fn reads_overrides() {
        let cfg = load(&[
            ("BOTEX_COMMAND_PREFIX", "/"),
            ("BOTEX_MAX_CONCURRENT", "2"),
            ("BOTEX_RATE_LIMIT_PERIOD", "1h30m"),
            ("BOTEX_HANDLE_TIMEOUT", "1500"),
            ("BOTEX_TIMING_LEVEL", "detailed"),
            ("BOTEX_AUTH_CHECK_ORDER", "user_first"),
            ("BOTEX_AUTH_ENABLE_PLATFORM_ADMIN", "off"),
            ("BOTEX_GROUP_BOOTSTRAP_COMMANDS", "Register_Group, help"),
            ("BOTEX_OWNER_ID", "42"),
            ("BOTEX_LATEX_RENDERER", "/opt/bin/render-tex --dpi 300"),
            ("BOTEX_LATEX_TIMEOUT", "10s"),
        ])
        .unwrap();
        assert_eq!(cfg.command_prefix, '/');
        assert_eq!(cfg.max_concurrent, 2);
        assert_eq!(cfg.rate_limit.period, Duration::from_secs(5400));
        assert_eq!(cfg.handle_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.timing.level, TimingLevel::Detailed);
        assert_eq!(cfg.auth.check_order, CheckOrder::UserFirst);
        assert!(!cfg.auth.enable_platform_admin);
        assert_eq!(cfg.auth.group_bootstrap_commands, vec!["register_group", "help"]);
        assert_eq!(cfg.auth.owner_id.as_deref(), Some("42"));
        assert_eq!(cfg.latex.renderer, vec!["/opt/bin/render-tex", "--dpi", "300"]);
        assert_eq!(cfg.latex.timeout, Duration::from_secs(10));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            load(&[("BOTEX_MAX_CONCURRENT", "0")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            load(&[("BOTEX_COMMAND_PREFIX", "!!")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            load(&[("BOTEX_RATE_LIMIT_PERIOD", "0s")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            load(&[("BOTEX_HANDLE_TIMEOUT", "soon")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            load(&[("BOTEX_AUTH_DEFAULT_RANK", "Not A Rank")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            load(&[("BOTEX_AUTH_CHECK_ORDER", "random")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn duration_formats() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2000").unwrap(), Duration::from_secs(2));
        assert!(parse_duration("5 minutes").is_err());
        assert!(parse_duration("m5").is_err());
    }
}
