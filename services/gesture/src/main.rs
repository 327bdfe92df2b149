//! Gesture Dispatch CLI
//!
//! `run` consumes hand-landmark frames from stdin and dispatches commands on
//! confirmed gestures; `dispatch` runs a single action directly, bypassing the
//! gesture pipeline.

mod clipboard;
mod context;
mod frames;
mod sink;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clipboard::{Clipboard, SystemClipboard};
use context::PromptContext;
use gesture_core::{
    CommandCatalog, CommandDispatcher, ContextSource, Dispatched, GesturePipeline, SessionOutcome,
    StreamConsumer, command::FALLBACK_CONTEXT,
};
use sink::ConsoleSink;
use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::io::BufReader;
use tracing::{Level, info, warn};

#[derive(Debug, Parser)]
#[command(name = "gesture-dispatch", version, about = "Hand gestures to streamed LLM commands")]
struct Cli {
    /// Relay chat endpoint.
    #[arg(long, env = "RELAY_URL", default_value = "http://localhost:3000/api/chat", global = true)]
    relay_url: String,

    /// Directory of `<action>.md` files overriding the built-in prompt templates.
    #[arg(long, env = "PROMPTS_PATH", global = true)]
    prompts_path: Option<PathBuf>,

    /// Abandon a stream after this many seconds without data.
    #[arg(long, env = "STALL_TIMEOUT_SECS", global = true)]
    stall_timeout_secs: Option<u64>,

    /// File whose contents are substituted into prompts. Defaults to the
    /// clipboard.
    #[arg(long, env = "CONTEXT_FILE", global = true)]
    context_file: Option<PathBuf>,

    /// Leave the system clipboard alone.
    #[arg(long, env = "NO_CLIPBOARD", global = true)]
    no_clipboard: bool,

    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read newline-delimited JSON frames from stdin.
    Run {
        /// How long a gesture must be held before it fires.
        #[arg(long, env = "HOLD_MS", default_value_t = 800)]
        hold_ms: u64,
    },
    /// Run one action (`fix`, `explain`, `commit`, `test` or `stop`).
    Dispatch { action: String },
}

fn build_dispatcher(cli: &Cli, console: Arc<ConsoleSink<std::io::Stdout>>) -> Result<CommandDispatcher> {
    let mut catalog = CommandCatalog::default();
    if let Some(dir) = &cli.prompts_path {
        catalog = catalog
            .with_prompt_overrides(dir)
            .context("Failed to load prompt overrides")?;
    }
    let consumer = StreamConsumer::new(cli.relay_url.clone())
        .with_stall_timeout(cli.stall_timeout_secs.map(Duration::from_secs));
    Ok(CommandDispatcher::new(catalog, Arc::new(consumer), console))
}

async fn run_pipeline(
    dispatcher: CommandDispatcher,
    context: PromptContext,
    console: &ConsoleSink<std::io::Stdout>,
    hold: Duration,
) -> Result<()> {
    let base = Instant::now();
    let mut pipeline = GesturePipeline::new(dispatcher, context, hold, base);
    console.activity(&format!("Listening for gestures (hold {} ms)", hold.as_millis()));

    let stdin = BufReader::new(tokio::io::stdin());
    let summary = frames::run_frames(stdin, &mut pipeline, console, base).await?;
    info!(
        frames = summary.frames,
        skipped = summary.skipped,
        fired = summary.fired,
        peak_progress = summary.peak_progress,
        "Frame input closed"
    );
    Ok(())
}

async fn run_dispatch(
    dispatcher: CommandDispatcher,
    context: PromptContext,
    action: &str,
) -> Result<()> {
    let context = context
        .read_context()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_CONTEXT.to_string());

    match dispatcher.dispatch(action, &context)? {
        Dispatched::Started(handle) => match handle.outcome().await? {
            SessionOutcome::Completed(_) => Ok(()),
            SessionOutcome::Fallback(_) => {
                warn!("Relay unavailable; printed cached result");
                Ok(())
            }
            SessionOutcome::Cancelled => bail!("session was cancelled"),
        },
        Dispatched::Stopped { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(relay_url = %cli.relay_url, "Starting gesture dispatch");

    let clipboard: Option<Arc<dyn Clipboard>> = if cli.no_clipboard {
        None
    } else {
        let detected = SystemClipboard::detect();
        if detected.is_none() {
            warn!("No display detected; results will not be copied to the clipboard");
        }
        detected.map(|c| Arc::new(c) as Arc<dyn Clipboard>)
    };

    let console = Arc::new(ConsoleSink::stdout().with_clipboard(clipboard.clone()));
    let dispatcher = build_dispatcher(&cli, console.clone())?;
    let context = PromptContext::new(cli.context_file.clone(), clipboard);

    match &cli.command {
        Command::Run { hold_ms } => {
            run_pipeline(dispatcher, context, &console, Duration::from_millis(*hold_ms)).await
        }
        Command::Dispatch { action } => run_dispatch(dispatcher, context, action).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_and_dispatch() {
        let cli = Cli::try_parse_from(["gesture-dispatch", "run", "--hold-ms", "500"]).unwrap();
        assert!(matches!(cli.command, Command::Run { hold_ms: 500 }));

        let cli = Cli::try_parse_from([
            "gesture-dispatch",
            "dispatch",
            "explain",
            "--relay-url",
            "http://127.0.0.1:9000/api/chat",
            "--stall-timeout-secs",
            "10",
        ])
        .unwrap();
        assert!(matches!(&cli.command, Command::Dispatch { action } if action == "explain"));
        assert_eq!(cli.relay_url, "http://127.0.0.1:9000/api/chat");
        assert_eq!(cli.stall_timeout_secs, Some(10));
        assert!(!cli.no_clipboard);

        let cli = Cli::try_parse_from(["gesture-dispatch", "--no-clipboard", "run"]).unwrap();
        assert!(cli.no_clipboard);
    }

    #[test]
    fn test_cli_rejects_bad_log_level() {
        assert!(
            Cli::try_parse_from(["gesture-dispatch", "--log-level", "loud", "run"]).is_err()
        );
    }
}
