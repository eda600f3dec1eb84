use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Mode, Settings};
use crate::daemon::render::short_session;
use crate::daemon::voice::LoggingVoice;
use crate::daemon::Daemon;
use crate::error::{AfkError, Result};
use crate::ipc::{ControlCommand, ResponseData};
use crate::transport::{ChatTransport, TelegramTransport};

use super::control_client;

/// Run the relay daemon in the foreground until Ctrl+C, SIGTERM or `stop`.
pub async fn run_daemon(settings: Settings, config_path: Option<PathBuf>) -> Result<()> {
    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(&settings.telegram)?);
    let voice = Arc::new(LoggingVoice::new(false));
    let daemon = Daemon::new(settings, config_path, transport, voice);

    let cancel = daemon.cancel_token();
    tokio::spawn(async move {
        super::shutdown_signal().await;
        tracing::info!("shutdown signal received");
        cancel.cancel();
    });

    daemon.run().await
}

pub async fn run_stop(settings: &Settings) -> Result<()> {
    control_client(settings).call(&ControlCommand::Stop).await?;
    eprintln!("afk-relay: daemon stopping");
    Ok(())
}

pub async fn run_status(settings: &Settings) -> Result<()> {
    let report = match control_client(settings).call(&ControlCommand::Status).await? {
        ResponseData::Status(report) => report,
        other => return Err(unexpected(&other)),
    };

    println!("afk-relay status");
    println!("================");
    println!("Mode:      {}", report.mode);
    println!("Voice:     {}", if report.voice_enabled { "on" } else { "off" });
    println!("Transport: {}", report.transport);
    println!("Pending:   {}", report.pending);
    println!("Uptime:    {}s", report.uptime_secs);

    if !report.sessions.is_empty() {
        println!("\nSessions:");
        for session in &report.sessions {
            println!(
                "  {}  afk={}  waiting={}  last active {}",
                short_session(&session.session_id),
                session.afk_active,
                session.waiting_on.is_some(),
                session.last_activity_at.format("%H:%M:%S"),
            );
        }
    }
    Ok(())
}

pub async fn run_mode(settings: &Settings, mode: Mode) -> Result<()> {
    control_client(settings)
        .call(&ControlCommand::SetMode { mode })
        .await?;
    eprintln!("afk-relay: mode set to {}", mode);
    Ok(())
}

pub async fn run_afk(settings: &Settings, session_id: &str, active: bool) -> Result<()> {
    control_client(settings)
        .call(&ControlCommand::SetAfk {
            session_id: session_id.to_string(),
            active,
        })
        .await?;
    eprintln!(
        "afk-relay: session {} AFK {}",
        session_id,
        if active { "on" } else { "off" }
    );
    Ok(())
}

pub async fn run_voice(settings: &Settings, enabled: bool) -> Result<()> {
    control_client(settings)
        .call(&ControlCommand::Voice { enabled })
        .await?;
    eprintln!("afk-relay: voice {}", if enabled { "on" } else { "off" });
    Ok(())
}

pub async fn run_reload(settings: &Settings) -> Result<()> {
    control_client(settings).call(&ControlCommand::Reload).await?;
    eprintln!("afk-relay: config reloaded");
    Ok(())
}

pub async fn run_speak(settings: &Settings, text: &str) -> Result<()> {
    control_client(settings)
        .call(&ControlCommand::Speak {
            text: text.to_string(),
        })
        .await?;
    Ok(())
}

pub async fn run_deactivate(settings: &Settings) -> Result<()> {
    let sessions = match control_client(settings)
        .call(&ControlCommand::Deactivate)
        .await?
    {
        ResponseData::Released { sessions } => sessions,
        other => return Err(unexpected(&other)),
    };
    eprintln!(
        "afk-relay: back to local mode, released {} waiting session(s)",
        sessions.len()
    );
    for session_id in &sessions {
        eprintln!("  {}", session_id);
    }
    Ok(())
}

pub(crate) fn unexpected(data: &ResponseData) -> AfkError {
    AfkError::Ipc {
        reason: format!("unexpected response: {data:?}"),
    }
}
