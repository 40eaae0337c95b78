//! Per-message pipeline: parse, permission, rate limit, admission, execute, feedback.

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    admission::{AdmissionController, AdmissionError},
    auth::{
        evaluator::REASON_LOOKUP_FAILED, AccessControlStore, Denial, EvaluatorPolicy,
        PermissionEvaluator, PermissionResult,
    },
    commands::{CommandContext, CommandRegistry},
    config::Config,
    messaging::{InboundMessage, MessagingPort},
    ratelimit::{RateLimitService, RateOutcome},
    timing::Tracker,
    Error,
};

pub const REACTION_DENIED: &str = "🚫";
pub const REACTION_WARNING: &str = "⚠️";
pub const REACTION_SUCCESS: &str = "✅";
pub const REACTION_FAILURE: &str = "❌";

pub const BUSY_MESSAGE: &str = "Too many concurrent requests. Please try again later.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: String,
}

/// `!name rest of line` -> (`name`, `rest of line`). The name is lowercased.
pub fn parse_command(prefix: char, text: &str) -> Option<ParsedCommand> {
    let rest = text.trim().strip_prefix(prefix)?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        name: name.to_lowercase(),
        args: args.to_string(),
    })
}

/// How one message ended. Only used for logs and tests; the user sees reactions/texts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored,
    Denied(Denial),
    RateLimited { notified: bool },
    Busy,
    Completed,
    Failed,
    TimedOut,
}

#[derive(Clone, Copy, Debug)]
pub struct DispatchSettings {
    pub prefix: char,
    pub handle_timeout: Duration,
    pub admission_wait: Duration,
}

impl From<&Config> for DispatchSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            prefix: cfg.command_prefix,
            handle_timeout: cfg.handle_timeout,
            admission_wait: cfg.admission_wait,
        }
    }
}

pub struct Dispatcher {
    settings: DispatchSettings,
    evaluator: PermissionEvaluator,
    rate_limits: RateLimitService,
    admission: AdmissionController,
    registry: Arc<CommandRegistry>,
    messenger: Arc<dyn MessagingPort>,
    tracker: Tracker,
    /// Parent of every per-message token.
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Build the pipeline and start the rate-limit reaper (needs a tokio runtime).
    pub fn new(
        cfg: &Config,
        store: Arc<dyn AccessControlStore>,
        registry: CommandRegistry,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        let rate_limits = RateLimitService::new(&cfg.rate_limit);
        rate_limits.start();

        Self {
            settings: DispatchSettings::from(cfg),
            evaluator: PermissionEvaluator::new(store, EvaluatorPolicy::from(&cfg.auth)),
            rate_limits,
            admission: AdmissionController::new(cfg.max_concurrent),
            registry: Arc::new(registry),
            messenger,
            tracker: Tracker::new(cfg.timing.level, cfg.timing.threshold),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Entry point for the transport: one call per inbound message, outcome via side channel.
    pub async fn handle_inbound_message(&self, msg: InboundMessage) {
        let outcome = self.dispatch(msg).await;
        tracing::trace!(?outcome, "dispatch finished");
    }

    pub async fn dispatch(&self, msg: InboundMessage) -> DispatchOutcome {
        let Some(parsed) = parse_command(self.settings.prefix, &msg.text) else {
            tracing::trace!(user = %msg.sender, "not a command");
            return DispatchOutcome::Ignored;
        };

        let span = tracing::info_span!(
            "dispatch",
            user = %msg.sender,
            group = msg.group.as_ref().map(|g| g.as_str()).unwrap_or("-"),
            command = %parsed.name,
        );
        self.run(msg, parsed).instrument(span).await
    }

    async fn run(&self, msg: InboundMessage, parsed: ParsedCommand) -> DispatchOutcome {
        let deadline = Instant::now() + self.settings.handle_timeout;
        let cancel = self.shutdown.child_token();

        // Permission strictly precedes rate limiting and admission.
        let permission = self.check_permission(&msg, &parsed.name, deadline).await;
        if !permission.allowed {
            return self.deny(&msg, &permission).await;
        }
        tracing::debug!(rank = ?permission.user_rank, "permission granted");

        if let RateOutcome::Limited {
            reset_after,
            notify,
        } = self.rate_limits.check(&msg.sender)
        {
            tracing::warn!(reset_after_ms = reset_after.as_millis() as u64, notify, "rate limited");
            self.react(&msg, REACTION_WARNING).await;
            if notify {
                let secs = ceil_secs(reset_after);
                self.say(&msg, &format!("Too many requests. Please wait {secs} seconds."))
                    .await;
            }
            return DispatchOutcome::RateLimited { notified: notify };
        }

        let wait = self
            .settings
            .admission_wait
            .min(deadline.saturating_duration_since(Instant::now()));
        let permit = match self.admission.acquire(wait, &cancel).await {
            Ok(permit) => permit,
            Err(e) => {
                match e {
                    AdmissionError::Cancelled => tracing::warn!("cancelled waiting for a slot"),
                    AdmissionError::Closed => tracing::warn!("admission closed, shutting down"),
                    AdmissionError::Busy { max } => tracing::warn!(max, "concurrency limit reached"),
                }
                self.react(&msg, REACTION_WARNING).await;
                self.say(&msg, BUSY_MESSAGE).await;
                return DispatchOutcome::Busy;
            }
        };

        let Some(command) = self.registry.get(&parsed.name) else {
            tracing::error!("command allowed by rank but not registered");
            self.react(&msg, REACTION_FAILURE).await;
            return DispatchOutcome::Failed;
        };

        let ctx = CommandContext {
            message: msg.clone(),
            command: parsed.name.clone(),
            args: parsed.args,
            user_rank: permission.user_rank,
            is_platform_admin: permission.is_platform_admin,
            cancel: cancel.clone(),
        };

        // Own task so a panicking handler is contained; the permit lives and dies with it.
        let tracker = self.tracker;
        let name = parsed.name;
        let mut task = tokio::spawn(
            async move {
                let _permit = permit;
                tracker.track_command(&name, command.handle(ctx)).await
            }
            .in_current_span(),
        );

        let outcome = match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!("command completed");
                DispatchOutcome::Completed
            }
            Ok(Ok(Err(Error::Command(reason)))) => {
                tracing::warn!(%reason, "command refused");
                DispatchOutcome::Failed
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "command failed");
                DispatchOutcome::Failed
            }
            Ok(Err(join)) if join.is_panic() => {
                tracing::error!("command handler panicked");
                DispatchOutcome::Failed
            }
            Ok(Err(join)) => {
                tracing::error!(error = %join, "command task aborted");
                DispatchOutcome::Failed
            }
            Err(_elapsed) => {
                cancel.cancel();
                task.abort();
                tracing::warn!(
                    timeout_ms = self.settings.handle_timeout.as_millis() as u64,
                    "command timed out"
                );
                DispatchOutcome::TimedOut
            }
        };

        let reaction = if outcome == DispatchOutcome::Completed {
            REACTION_SUCCESS
        } else {
            REACTION_FAILURE
        };
        self.react(&msg, reaction).await;
        outcome
    }

    async fn check_permission(
        &self,
        msg: &InboundMessage,
        command: &str,
        deadline: Instant,
    ) -> PermissionResult {
        let check = self.evaluator.check(&msg.sender, msg.group.as_ref(), command);
        let timed = self.tracker.track_sub_operation("permission_check", check);
        match tokio::time::timeout_at(deadline, timed).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("permission check timed out");
                PermissionResult::denied(Denial::LookupFailed, REASON_LOOKUP_FAILED, None)
            }
        }
    }

    async fn deny(&self, msg: &InboundMessage, permission: &PermissionResult) -> DispatchOutcome {
        let denial = permission.denial.unwrap_or(Denial::LookupFailed);
        if denial == Denial::InvalidCommand {
            tracing::debug!("malformed command name, ignoring");
            return DispatchOutcome::Ignored;
        }

        tracing::warn!(reason = %permission.reason, "permission denied");
        self.react(msg, REACTION_DENIED).await;
        self.say(msg, &permission.reason).await;
        DispatchOutcome::Denied(denial)
    }

    async fn react(&self, msg: &InboundMessage, emoji: &str) {
        if let Err(e) = self.messenger.send_reaction(&msg.message, emoji).await {
            tracing::warn!(error = %e, emoji, "failed to send reaction");
        }
    }

    async fn say(&self, msg: &InboundMessage, text: &str) {
        if let Err(e) = self.messenger.send_text(&msg.chat(), text).await {
            tracing::warn!(error = %e, "failed to send message");
        }
    }

    /// Refuse new executions and cancel every waiting or running command, then stop the reaper.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.admission.close();
        self.rate_limits.stop().await;
        tracing::info!("dispatcher stopped");
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}
