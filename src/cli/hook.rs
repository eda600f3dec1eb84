use std::path::Path;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{AfkError, Result};
use crate::handoff::WaitOutcome;
use crate::hook::{self, HookKind};

/// Hook entry point. Reads the hook payload from stdin and, when an answer
/// comes back, prints the hook output document. Every failure falls through
/// to the assistant's local behavior: the hook never fails the tool call.
pub async fn run_hook(kind: HookKind, config_path: Option<&Path>) -> Result<()> {
    let mut raw = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut raw).await {
        tracing::warn!(error = %e, "failed to read hook input");
        return Ok(());
    }

    let settings = match Settings::load(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config");
            return Ok(());
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        super::shutdown_signal().await;
        on_signal.cancel();
    });

    match hook::execute(kind, &settings, &raw, &cancel).await {
        Ok(Some(outcome)) => {
            match outcome {
                WaitOutcome::Deactivated => {
                    eprintln!("afk-relay: remote flow aborted, continuing locally")
                }
                WaitOutcome::Skipped => {
                    eprintln!("afk-relay: request skipped remotely, continuing locally")
                }
                _ => {}
            }
            if let Some(document) = hook::render(kind, &outcome) {
                println!("{}", document);
            }
        }
        Ok(None) => {}
        Err(AfkError::SocketNotFound { .. }) => {
            tracing::debug!("daemon not running, continuing locally");
        }
        Err(e) => tracing::warn!(error = %e, "hook failed, continuing locally"),
    }
    Ok(())
}
