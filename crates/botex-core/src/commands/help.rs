use std::sync::Arc;

use async_trait::async_trait;

use crate::{messaging::MessagingPort, Result};

use super::{Command, CommandContext, CommandInfo, CommandRegistry};

pub const HELP_COMMAND: &str = "help";

/// Lists commands, or shows usage for one.
///
/// Holds a snapshot of the registry taken when it is built, so register it last.
pub struct HelpCommand {
    messenger: Arc<dyn MessagingPort>,
    prefix: char,
    catalog: Vec<(String, CommandInfo)>,
}

impl HelpCommand {
    pub fn new(messenger: Arc<dyn MessagingPort>, prefix: char, registry: &CommandRegistry) -> Self {
        let mut catalog = registry.catalog();
        catalog.push((HELP_COMMAND.to_string(), help_info(prefix)));
        catalog.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            messenger,
            prefix,
            catalog,
        }
    }

    pub fn render_list(&self) -> String {
        let p = self.prefix;
        let mut out = String::from("*Available Commands*\n\n");
        for (name, info) in self.catalog.iter().filter(|(n, _)| n != HELP_COMMAND) {
            out.push_str(&format!("`{p}{name}` - {}\n", info.description));
        }
        out.push_str(&format!(
            "\nUse `{p}help <command>` for detailed usage."
        ));
        out
    }

    pub fn render_details(&self, wanted: &str) -> String {
        let p = self.prefix;
        let wanted = wanted.trim_start_matches(p).to_lowercase();
        let Some((name, info)) = self.catalog.iter().find(|(n, _)| *n == wanted) else {
            return format!(
                "Command `{wanted}` not found. Use `{p}help` to see available commands."
            );
        };

        let mut out = format!("*{p}{name}*\n{}\n", info.description);
        if !info.usage.is_empty() {
            out.push_str(&format!("\n*Usage:* `{}`\n", info.usage));
        }
        if !info.examples.is_empty() {
            out.push_str("\n*Examples:*\n");
            for ex in &info.examples {
                out.push_str(&format!("• `{ex}`\n"));
            }
        }
        out
    }
}

fn help_info(prefix: char) -> CommandInfo {
    CommandInfo {
        description: "Show available commands".to_string(),
        usage: format!("{prefix}help [command]"),
        examples: vec![format!("{prefix}help"), format!("{prefix}help rank")],
    }
}

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &str {
        HELP_COMMAND
    }

    fn info(&self) -> CommandInfo {
        help_info(self.prefix)
    }

    async fn handle(&self, ctx: CommandContext) -> Result<()> {
        let text = match ctx.arg_list().first() {
            Some(name) => self.render_details(name),
            None => self.render_list(),
        };
        self.messenger.send_text(&ctx.chat(), &text).await
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::test_support::{inbound, RecordingMessenger};

    struct Latex;

    #[async_trait]
    impl Command for Latex {
        fn name(&self) -> &str {
            "latex"
        }

        fn info(&self) -> CommandInfo {
            CommandInfo {
                description: "Render an equation".to_string(),
                usage: "!latex <equation>".to_string(),
                examples: vec!["!latex x^2".to_string()],
            }
        }

        async fn handle(&self, _ctx: CommandContext) -> Result<()> {
            Ok(())
        }
    }

    fn help(messenger: Arc<RecordingMessenger>) -> HelpCommand {
        let mut reg = CommandRegistry::new();
        reg.register(Arc::new(Latex)).unwrap();
        HelpCommand::new(messenger, '!', &reg)
    }

    fn ctx(args: &str) -> CommandContext {
        CommandContext {
            message: inbound("alice", None, "!help"),
            command: "help".to_string(),
            args: args.to_string(),
            user_rank: Some("user".to_string()),
            is_platform_admin: false,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn lists_commands_without_itself() {
        let m = Arc::new(RecordingMessenger::default());
        help(m.clone()).handle(ctx("")).await.unwrap();

        let text = m.last_text().unwrap();
        assert!(text.starts_with("*Available Commands*\n\n"));
        assert!(text.contains("`!latex` - Render an equation"));
        assert!(!text.contains("`!help` -"));
        assert!(text.ends_with("Use `!help <command>` for detailed usage."));
    }

    #[tokio::test]
    async fn shows_details_for_one_command() {
        let m = Arc::new(RecordingMessenger::default());
        let h = help(m.clone());

        h.handle(ctx("!latex")).await.unwrap();
        let text = m.last_text().unwrap();
        assert!(text.contains("*!latex*"));
        assert!(text.contains("*Usage:* `!latex <equation>`"));
        assert!(text.contains("• `!latex x^2`"));

        h.handle(ctx("nope")).await.unwrap();
        assert_eq!(
            m.last_text().unwrap(),
            "Command `nope` not found. Use `!help` to see available commands."
        );
    }
}
