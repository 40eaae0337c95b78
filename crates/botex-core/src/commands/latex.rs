use std::{io::ErrorKind, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command as Process, time::Instant};

use crate::{messaging::MessagingPort, Error, Result};

use super::{Command, CommandContext, CommandInfo};

pub const MAX_CODE_LEN: usize = 1000;

/// File access, shell escape and macro redefinition.
const DISALLOWED: &[&str] = &["\\input", "\\include", "\\write18", "\\def", "\\let"];

const STDERR_LOG_LIMIT: usize = 500;

/// `latex <equation>`: render through an external program and send the picture back.
///
/// The renderer gets a complete standalone document on stdin and must write the
/// image to stdout, exiting non-zero on failure.
pub struct LatexCommand {
    messenger: Arc<dyn MessagingPort>,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    prefix: char,
}

impl LatexCommand {
    /// `renderer` is a program followed by its arguments. `None` when it is empty.
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        renderer: &[String],
        timeout: Duration,
        prefix: char,
    ) -> Option<Self> {
        let (program, args) = renderer.split_first()?;
        Some(Self {
            messenger,
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            prefix,
        })
    }

    async fn refuse(&self, ctx: &CommandContext, text: impl Into<String>) -> Error {
        let text = text.into();
        if let Err(e) = self.messenger.send_text(&ctx.chat(), &text).await {
            tracing::warn!(error = %e, "failed to send command reply");
        }
        Error::Command(text)
    }

    async fn run_renderer(&self, document: &str) -> Result<Vec<u8>> {
        let started = Instant::now();
        let mut child = Process::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(document.as_bytes()).await {
                Ok(()) => {}
                // Exited without reading; the exit status tells the rest.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        let out = child.wait_with_output().await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let stderr: String = stderr.trim().chars().take(STDERR_LOG_LIMIT).collect();
            tracing::error!(program = %self.program, status = %out.status, elapsed_ms, %stderr, "latex renderer failed");
            return Err(Error::External(format!("renderer exited with {}", out.status)));
        }
        if out.stdout.is_empty() {
            return Err(Error::External("renderer produced no output".to_string()));
        }

        tracing::debug!(elapsed_ms, bytes = out.stdout.len(), "latex rendered");
        Ok(out.stdout)
    }
}

/// First forbidden primitive found in `code`.
pub fn disallowed_command(code: &str) -> Option<&'static str> {
    DISALLOWED.iter().copied().find(|cmd| code.contains(cmd))
}

pub fn wrap_document(code: &str) -> String {
    format!(
        "\\documentclass[preview]{{standalone}}\n\
         \\usepackage{{amsmath,amssymb,amsfonts}}\n\
         \\begin{{document}}\n\
         \\thispagestyle{{empty}}\n\
         {code}\n\
         \\end{{document}}\n"
    )
}

#[async_trait]
impl Command for LatexCommand {
    fn name(&self) -> &str {
        "latex"
    }

    fn info(&self) -> CommandInfo {
        let p = self.prefix;
        CommandInfo {
            description: "Render a LaTeX equation as an image".to_string(),
            usage: format!("{p}latex <equation>"),
            examples: vec![
                format!("{p}latex x = \\frac{{-b \\pm \\sqrt{{b^2 - 4ac}}}}{{2a}}"),
                format!("{p}latex \\int_{{a}}^{{b}} f(x)\\,dx = F(b) - F(a)"),
            ],
        }
    }

    async fn handle(&self, ctx: CommandContext) -> Result<()> {
        let code = ctx.args.trim();
        if code.is_empty() {
            return Err(self
                .refuse(&ctx, format!("Usage: {}latex <equation>", self.prefix))
                .await);
        }
        if code.chars().count() > MAX_CODE_LEN {
            return Err(self
                .refuse(
                    &ctx,
                    format!("LaTeX code is limited to {MAX_CODE_LEN} characters."),
                )
                .await);
        }
        if let Some(cmd) = disallowed_command(code) {
            return Err(self.refuse(&ctx, format!("`{cmd}` is not allowed.")).await);
        }

        let document = wrap_document(code);
        let rendered = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(Error::External("latex render cancelled".to_string()));
            }
            res = tokio::time::timeout(self.timeout, self.run_renderer(&document)) => res,
        };

        let image = match rendered {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "latex render failed");
                return Err(self.refuse(&ctx, "Failed to render the equation.").await);
            }
            Err(_elapsed) => {
                tracing::warn!(timeout = ?self.timeout, "latex render timed out");
                return Err(self
                    .refuse(&ctx, format!("Rendering timed out after {:?}.", self.timeout))
                    .await);
            }
        };

        self.messenger
            .send_image(&ctx.chat(), image, "LaTeX render")
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::test_support::{inbound, RecordingMessenger, ALICE};

    fn ctx(args: &str) -> CommandContext {
        CommandContext {
            message: inbound(ALICE, None, "!latex"),
            command: "latex".to_string(),
            args: args.to_string(),
            user_rank: Some("user".to_string()),
            is_platform_admin: false,
            cancel: CancellationToken::new(),
        }
    }

    fn latex(m: &Arc<RecordingMessenger>, renderer: &[&str], timeout: Duration) -> LatexCommand {
        let renderer: Vec<String> = renderer.iter().map(|s| s.to_string()).collect();
        LatexCommand::new(m.clone(), &renderer, timeout, '!').unwrap()
    }

    #[test]
    fn needs_a_program() {
        let m: Arc<dyn MessagingPort> = Arc::new(RecordingMessenger::default());
        assert!(LatexCommand::new(m, &[], Duration::from_secs(1), '!').is_none());
    }

    #[test]
    fn flags_dangerous_primitives() {
        assert_eq!(disallowed_command("\\input{/etc/passwd}"), Some("\\input"));
        assert_eq!(disallowed_command("\\immediate\\write18{ls}"), Some("\\write18"));
        assert_eq!(disallowed_command("\\def\\x{1}"), Some("\\def"));
        assert_eq!(disallowed_command("x = \\frac{1}{2}"), None);
    }

    #[test]
    fn wraps_code_in_a_standalone_document() {
        let doc = wrap_document("x^2");
        assert!(doc.starts_with("\\documentclass[preview]{standalone}\n"));
        assert!(doc.contains("\\thispagestyle{empty}\nx^2\n\\end{document}"));
    }

    #[tokio::test]
    async fn renderer_output_is_sent_as_an_image() {
        let m = Arc::new(RecordingMessenger::default());
        let cmd = latex(&m, &["cat"], Duration::from_secs(5));

        cmd.handle(ctx("  e^{i\\pi} + 1 = 0 ")).await.unwrap();
        assert_eq!(
            m.images(),
            vec![wrap_document("e^{i\\pi} + 1 = 0").into_bytes()]
        );
        assert!(m.texts().is_empty());
    }

    #[tokio::test]
    async fn input_is_checked_before_rendering() {
        let m = Arc::new(RecordingMessenger::default());
        let cmd = latex(&m, &["cat"], Duration::from_secs(5));

        cmd.handle(ctx("   ")).await.unwrap_err();
        assert_eq!(m.last_text().unwrap(), "Usage: !latex <equation>");

        cmd.handle(ctx(&"x".repeat(MAX_CODE_LEN + 1))).await.unwrap_err();
        assert_eq!(
            m.last_text().unwrap(),
            "LaTeX code is limited to 1000 characters."
        );

        cmd.handle(ctx("\\include{secret}")).await.unwrap_err();
        assert_eq!(m.last_text().unwrap(), "`\\include` is not allowed.");
        assert!(m.images().is_empty());
    }

    #[tokio::test]
    async fn renderer_failures_are_reported_without_details() {
        let m = Arc::new(RecordingMessenger::default());

        latex(&m, &["false"], Duration::from_secs(5))
            .handle(ctx("x"))
            .await
            .unwrap_err();
        latex(&m, &["/nonexistent/botex-renderer"], Duration::from_secs(5))
            .handle(ctx("x"))
            .await
            .unwrap_err();

        assert_eq!(
            m.texts(),
            vec!["Failed to render the equation.", "Failed to render the equation."]
        );
        assert!(m.images().is_empty());
    }

    #[tokio::test]
    async fn slow_renderer_times_out() {
        let m = Arc::new(RecordingMessenger::default());
        let cmd = latex(&m, &["sleep", "5"], Duration::from_millis(50));

        let started = Instant::now();
        cmd.handle(ctx("x")).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(m.last_text().unwrap(), "Rendering timed out after 50ms.");
    }

    #[tokio::test]
    async fn cancellation_stops_the_renderer_quietly() {
        let m = Arc::new(RecordingMessenger::default());
        let cmd = latex(&m, &["sleep", "5"], Duration::from_secs(5));

        let c = ctx("x");
        c.cancel.cancel();
        let started = Instant::now();
        assert!(matches!(cmd.handle(c).await, Err(Error::External(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(m.texts().is_empty());
    }
}
