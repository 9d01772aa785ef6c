//! Terminal front end
//!
//! Drives a [`ReplSession`] from a terminal so snippets, shell commands and
//! the pager can be exercised without a chat platform. Output goes through
//! [`ConsoleTarget`], which prints every send and edit.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use crate::codeblock;
use crate::compiler::compile;
use crate::config::Config;
use crate::display::{
    DisplayError, DisplayTarget, MessageId, PlatformLimits, StatusMarker, UserId,
};
use crate::executor::Val;
use crate::live_view::LiveViewHandle;
use crate::pager::{NavAction, RenderedPage};
use crate::scope::Scope;
use crate::session::{Delivery, InvocationContext, Outcome, ReplSession, SessionError};

#[derive(Parser)]
#[command(name = "replcog")]
#[command(about = "replcog - evaluate snippets and page their output from a terminal", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides REPLCOG_CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate one snippet
    Eval {
        /// Snippet source, optionally fenced
        code: String,
    },

    /// Interactive session; a line ending in `\` continues on the next line
    Repl {
        /// Start every snippet from an empty scope
        #[arg(long)]
        fresh: bool,
    },

    /// Evaluate one snippet and inspect every value it produces
    Inspect {
        /// Snippet source, optionally fenced
        code: String,
    },

    /// Run a snippet repeatedly and report its timing
    Timeit {
        /// Snippet source, optionally fenced
        code: String,
    },

    /// Run a shell command and stream its output
    Shell {
        /// Command line passed to the shell
        command: String,
    },

    /// Print the compiled program as JSON
    Parse {
        /// Snippet source, optionally fenced
        code: String,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let config = Config::builder()
        .config_path(cli.config)
        .build()
        .context("failed to load configuration")?;
    let target: Arc<dyn DisplayTarget> = Arc::new(ConsoleTarget::from_config(&config));
    let ctx = console_context();

    match cli.command {
        Commands::Parse { code } => {
            let source = codeblock::parse(&code).content;
            let unit = compile(&source, &Scope::new()).map_err(|e| anyhow::anyhow!(e.render()))?;
            for warning in &unit.warnings {
                eprintln!("warning: {}", warning);
            }
            println!("{}", serde_json::to_string_pretty(&unit.program())?);
        }

        Commands::Eval { code } => {
            let session = ReplSession::new(config);
            let report = interruptible(&session, session.evaluate(&ctx, &code, target)).await?;
            finish_deliveries(report.deliveries, &ctx).await?;
            if report.outcome != Outcome::Completed {
                std::process::exit(1);
            }
        }

        Commands::Inspect { code } => {
            let session = ReplSession::new(config);
            let report = interruptible(&session, session.inspect(&ctx, &code, target)).await?;
            finish_deliveries(report.deliveries, &ctx).await?;
            if report.outcome != Outcome::Completed {
                std::process::exit(1);
            }
        }

        Commands::Timeit { code } => {
            let session = ReplSession::new(config);
            let report = interruptible(&session, session.timeit(&ctx, &code, target)).await?;
            if report.outcome != Outcome::Completed {
                std::process::exit(1);
            }
        }

        Commands::Shell { command } => {
            let session = ReplSession::new(config);
            let report = interruptible(&session, session.shell(&ctx, &command, target)).await?;
            match report.exit_code {
                Some(0) => {}
                Some(code) => std::process::exit(code),
                None => std::process::exit(1),
            }
        }

        Commands::Repl { fresh } => {
            let session = ReplSession::new(config);
            session.set_retain(!fresh);
            repl(&session, &ctx, target).await?;
        }
    }

    Ok(())
}

/// Await `work`, cancelling the newest task on Ctrl-C
async fn interruptible<T>(
    session: &ReplSession,
    work: impl Future<Output = Result<T, SessionError>>,
) -> Result<T> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            result = &mut work => return Ok(result?),
            _ = tokio::signal::ctrl_c() => {
                if let Some(task) = session.tasks().cancel_last() {
                    eprintln!("cancelling task {} ({})", task.index, task.command);
                }
            }
        }
    }
}

fn print_remaining_pages(view: &LiveViewHandle) {
    for page in view.pages().iter().skip(1) {
        println!("{}", page);
    }
}

/// Print and close every paged result; nobody is left to navigate them
async fn finish_deliveries(deliveries: Vec<Delivery>, ctx: &InvocationContext) -> Result<()> {
    for delivery in deliveries {
        if let Delivery::Paginated(view) = delivery {
            print_remaining_pages(&view);
            view.close(ctx.author_id.as_ref());
            view.wait().await?;
        }
    }
    Ok(())
}

/// The newest paged result, if any
fn latest_view(deliveries: Vec<Delivery>) -> Option<LiveViewHandle> {
    deliveries.into_iter().rev().find_map(|d| match d {
        Delivery::Paginated(v) => Some(v),
        _ => None,
    })
}

/* ===================== REPL ===================== */

/// One line of REPL input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Quit,
    Retain(bool),
    Navigate(NavAction),
    Close,
    Shell(String),
    Inspect(String),
    Timeit(String),
    Tasks,
    Snippet(String),
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return ReplCommand::Empty;
        }
        let Some(command) = trimmed.strip_prefix(':') else {
            return ReplCommand::Snippet(input.to_string());
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map(|(n, r)| (n, r.trim()))
            .unwrap_or((command, ""));
        match (name, rest) {
            ("q" | "quit", _) => ReplCommand::Quit,
            ("retain", "on") => ReplCommand::Retain(true),
            ("retain", "off") => ReplCommand::Retain(false),
            ("first", _) => ReplCommand::Navigate(NavAction::First),
            ("p" | "prev", _) => ReplCommand::Navigate(NavAction::Previous),
            ("n" | "next", _) => ReplCommand::Navigate(NavAction::Next),
            ("last", _) => ReplCommand::Navigate(NavAction::Last),
            ("page", n) => match n.parse::<usize>() {
                Ok(page) if page > 0 => ReplCommand::Navigate(NavAction::GoTo(page - 1)),
                _ => ReplCommand::Unknown(trimmed.to_string()),
            },
            ("close", _) => ReplCommand::Close,
            ("sh", command) if !command.is_empty() => ReplCommand::Shell(command.to_string()),
            ("inspect" | "i", code) if !code.is_empty() => ReplCommand::Inspect(code.to_string()),
            ("timeit", code) if !code.is_empty() => ReplCommand::Timeit(code.to_string()),
            ("tasks", _) => ReplCommand::Tasks,
            _ => ReplCommand::Unknown(trimmed.to_string()),
        }
    }
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

async fn repl(
    session: &ReplSession,
    ctx: &InvocationContext,
    target: Arc<dyn DisplayTarget>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view: Option<LiveViewHandle> = None;
    let mut buffer = String::new();

    prompt(">>> ");
    while let Some(line) = lines.next_line().await? {
        if let Some(rest) = line.strip_suffix('\\') {
            buffer.push_str(rest);
            buffer.push('\n');
            prompt("... ");
            continue;
        }
        buffer.push_str(&line);
        let input = std::mem::take(&mut buffer);

        match ReplCommand::parse(&input) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Retain(on) => {
                if session.set_retain(on) {
                    println!("retain {}", if on { "on" } else { "off" });
                } else {
                    println!("retain is already {}", if on { "on" } else { "off" });
                }
            }
            ReplCommand::Navigate(action) => match &view {
                Some(v) if v.navigate(ctx.author_id.as_ref(), action) => {}
                Some(_) => println!("no such page"),
                None => println!("nothing to page through"),
            },
            ReplCommand::Close => {
                if let Some(v) = view.take() {
                    v.close(ctx.author_id.as_ref());
                    v.wait().await?;
                }
            }
            ReplCommand::Shell(command) => {
                let report =
                    interruptible(session, session.shell(ctx, &command, target.clone())).await?;
                debug!(?report, "shell finished");
            }
            ReplCommand::Tasks => {
                for task in session.tasks().list() {
                    println!("{} {} {}", task.index, task.command, task.invoked_at);
                }
            }
            ReplCommand::Snippet(source) => {
                match interruptible(session, session.evaluate(ctx, &source, target.clone())).await
                {
                    Ok(report) => {
                        if let Some(latest) = latest_view(report.deliveries) {
                            view = Some(latest);
                        }
                    }
                    Err(err) => eprintln!("{:#}", err),
                }
            }
            ReplCommand::Inspect(source) => {
                match interruptible(session, session.inspect(ctx, &source, target.clone())).await {
                    Ok(report) => {
                        if let Some(latest) = latest_view(report.deliveries) {
                            view = Some(latest);
                        }
                    }
                    Err(err) => eprintln!("{:#}", err),
                }
            }
            ReplCommand::Timeit(source) => {
                match interruptible(session, session.timeit(ctx, &source, target.clone())).await {
                    Ok(report) => debug!(iterations = report.iterations(), "timing finished"),
                    Err(err) => eprintln!("{:#}", err),
                }
            }
            ReplCommand::Unknown(command) => println!("unknown command: {}", command),
        }
        prompt(">>> ");
    }

    if let Some(v) = view {
        v.finish(None).await?;
    }
    Ok(())
}

/* ===================== Console target ===================== */

/// Display target that prints to the terminal
#[derive(Debug, Clone)]
pub struct ConsoleTarget {
    limits: PlatformLimits,
}

impl ConsoleTarget {
    pub fn new(limits: PlatformLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(PlatformLimits {
            max_message_len: config.pager.max_message_len,
            min_edit_interval: config.throttle(),
            max_file_preview: config.pager.max_file_preview,
        })
    }
}

fn new_message_id() -> MessageId {
    MessageId(Uuid::new_v4().to_string())
}

#[async_trait]
impl DisplayTarget for ConsoleTarget {
    fn limits(&self) -> PlatformLimits {
        self.limits
    }

    async fn send(&self, page: &RenderedPage) -> Result<MessageId, DisplayError> {
        println!("{}", page.to_text());
        Ok(new_message_id())
    }

    async fn edit(&self, id: &MessageId, page: &RenderedPage) -> Result<(), DisplayError> {
        debug!(%id, "message edited");
        println!("{}", page.to_text());
        Ok(())
    }

    async fn send_file(&self, name: &str, bytes: &[u8]) -> Result<MessageId, DisplayError> {
        println!("[{}, {} bytes]", name, bytes.len());
        println!("{}", String::from_utf8_lossy(bytes));
        Ok(new_message_id())
    }

    async fn delete(&self, id: &MessageId) -> Result<(), DisplayError> {
        debug!(%id, "message deleted");
        Ok(())
    }

    async fn react(&self, marker: StatusMarker) -> Result<(), DisplayError> {
        debug!(marker = marker.emoji(), "status");
        Ok(())
    }

    async fn send_private(&self, page: &RenderedPage) -> Result<MessageId, DisplayError> {
        eprintln!("{}", page.to_text());
        Ok(new_message_id())
    }
}

fn named(name: &str) -> Val {
    Val::Obj(
        [("name".to_string(), Val::Str(name.to_string()))]
            .into_iter()
            .collect(),
    )
}

/// Invocation context for the local user
pub fn console_context() -> InvocationContext {
    let user = std::env::var("USER").unwrap_or_else(|_| "console".to_string());
    InvocationContext {
        author: named(&user),
        channel: named("console"),
        bot: named("replcog"),
        author_id: Some(UserId(user)),
        ..InvocationContext::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_eval_args() {
        let cli = Cli::try_parse_from(["replcog", "--config", "cog.toml", "eval", "1 + 1"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cog.toml")));
        match cli.command {
            Commands::Eval { code } => assert_eq!(code, "1 + 1"),
            _ => panic!("Expected Eval command"),
        }
    }

    #[test]
    fn test_parse_repl_flag() {
        let cli = Cli::try_parse_from(["replcog", "repl", "--fresh"]).unwrap();
        assert!(matches!(cli.command, Commands::Repl { fresh: true }));
    }

    #[test]
    fn test_parse_inspect_and_timeit_args() {
        let cli = Cli::try_parse_from(["replcog", "inspect", "[1]"]).unwrap();
        assert!(matches!(cli.command, Commands::Inspect { ref code } if code == "[1]"));
        let cli = Cli::try_parse_from(["replcog", "timeit", "1 + 1"]).unwrap();
        assert!(matches!(cli.command, Commands::Timeit { ref code } if code == "1 + 1"));
    }

    #[test]
    fn test_missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["replcog"]).is_err());
    }

    #[test]
    fn test_repl_commands() {
        assert_eq!(ReplCommand::parse("   "), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse(":q"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse(":retain on"), ReplCommand::Retain(true));
        assert_eq!(ReplCommand::parse(":retain off"), ReplCommand::Retain(false));
        assert_eq!(
            ReplCommand::parse(":n"),
            ReplCommand::Navigate(NavAction::Next)
        );
        assert_eq!(
            ReplCommand::parse(":page 3"),
            ReplCommand::Navigate(NavAction::GoTo(2))
        );
        assert_eq!(
            ReplCommand::parse(":sh  ls -la "),
            ReplCommand::Shell("ls -la".into())
        );
        assert_eq!(ReplCommand::parse(":tasks"), ReplCommand::Tasks);
        assert_eq!(
            ReplCommand::parse(":inspect [1, 2]"),
            ReplCommand::Inspect("[1, 2]".into())
        );
        assert_eq!(
            ReplCommand::parse(":timeit sum(range(100))"),
            ReplCommand::Timeit("sum(range(100))".into())
        );
    }

    #[test]
    fn test_repl_command_errors() {
        assert_eq!(
            ReplCommand::parse(":page 0"),
            ReplCommand::Unknown(":page 0".into())
        );
        assert_eq!(
            ReplCommand::parse(":retain maybe"),
            ReplCommand::Unknown(":retain maybe".into())
        );
        assert_eq!(ReplCommand::parse(":sh"), ReplCommand::Unknown(":sh".into()));
        assert_eq!(
            ReplCommand::parse(":timeit"),
            ReplCommand::Unknown(":timeit".into())
        );
    }

    #[test]
    fn test_snippet_keeps_its_lines() {
        assert_eq!(
            ReplCommand::parse("x = 1\nx"),
            ReplCommand::Snippet("x = 1\nx".into())
        );
    }

    #[test]
    fn test_console_context_binds_user() {
        let ctx = console_context();
        assert!(ctx.author_id.is_some());
        match &ctx.channel {
            Val::Obj(fields) => assert_eq!(fields.get("name"), Some(&Val::Str("console".into()))),
            other => panic!("Expected Obj, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_console_ids_are_unique() {
        let target = ConsoleTarget::new(PlatformLimits::default());
        let a = target.send(&RenderedPage::text("a")).await.unwrap();
        let b = target.send(&RenderedPage::text("b")).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.0.len(), 36);
    }
}
