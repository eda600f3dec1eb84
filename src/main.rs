use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use afk_relay::cli::{self, Toggle};
use afk_relay::config::{Mode, Settings};
use afk_relay::hook::HookKind;

#[derive(Parser)]
#[command(name = "afk-relay", version, about = "Answer your coding assistant from your phone")]
struct Cli {
    /// Config file (default: ~/.config/afk-relay/config.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay daemon in the foreground
    Daemon,
    /// Hook entry point, invoked by the assistant with the hook payload on stdin
    Hook {
        #[arg(value_enum)]
        kind: HookKind,
    },
    /// Show daemon status
    Status,
    /// Switch every session between local and AFK handling
    Mode { mode: Mode },
    /// Toggle AFK for a single session
    Afk {
        session_id: String,
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Toggle voice output
    Voice {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Re-read the config file
    Reload,
    /// Speak a line through the voice backend
    Speak { text: String },
    /// Inspect or prune the pending request queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Release every waiting hook and return to local mode
    Deactivate,
    /// Stream daemon events
    Monitor,
    /// Stop the daemon
    Stop,
}

#[derive(Subcommand)]
enum QueueAction {
    /// List pending requests
    List,
    /// Skip the pending requests of a session
    Skip { session_id: String },
    /// Skip every pending request
    Flush,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Hooks talk to the assistant over stdout, so keep them quiet.
    let default_level = match cli.command {
        Commands::Hook { .. } => "warn",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AFK_RELAY_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    if let Commands::Hook { kind } = cli.command {
        cli::hook::run_hook(kind, config_path).await?;
        return Ok(());
    }

    let settings = Settings::load(config_path)?;

    match cli.command {
        Commands::Daemon => cli::daemon::run_daemon(settings, cli.config.clone()).await?,
        Commands::Hook { .. } => {}
        Commands::Status => cli::daemon::run_status(&settings).await?,
        Commands::Mode { mode } => cli::daemon::run_mode(&settings, mode).await?,
        Commands::Afk { session_id, state } => {
            cli::daemon::run_afk(&settings, &session_id, state.is_on()).await?
        }
        Commands::Voice { state } => cli::daemon::run_voice(&settings, state.is_on()).await?,
        Commands::Reload => cli::daemon::run_reload(&settings).await?,
        Commands::Speak { text } => cli::daemon::run_speak(&settings, &text).await?,
        Commands::Queue { action } => match action {
            QueueAction::List => cli::queue::run_queue_list(&settings).await?,
            QueueAction::Skip { session_id } => {
                cli::queue::run_queue_skip(&settings, &session_id).await?
            }
            QueueAction::Flush => cli::queue::run_queue_flush(&settings).await?,
        },
        Commands::Deactivate => cli::daemon::run_deactivate(&settings).await?,
        Commands::Monitor => cli::monitor::run_monitor(&settings).await?,
        Commands::Stop => cli::daemon::run_stop(&settings).await?,
    }

    Ok(())
}
