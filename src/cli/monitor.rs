use crate::config::Settings;
use crate::daemon::render::{short_session, truncate};
use crate::error::Result;
use crate::ipc::DaemonEvent;

use super::control_client;

/// Stream daemon events in real time until the daemon stops or Ctrl+C.
pub async fn run_monitor(settings: &Settings) -> Result<()> {
    let mut events = control_client(settings).subscribe().await?;

    eprintln!(
        "afk-relay: monitoring {}",
        settings.socket_path().display()
    );
    eprintln!("Press Ctrl+C to stop.\n");

    loop {
        let event = tokio::select! {
            event = events.next_event() => event?,
            _ = super::shutdown_signal() => break,
        };
        let Some(event) = event else {
            eprintln!("afk-relay: daemon closed the stream");
            break;
        };
        let now = chrono::Local::now().format("%H:%M:%S");
        println!("[{}] {}", now, describe(&event));
        if event == DaemonEvent::ShuttingDown {
            break;
        }
    }
    Ok(())
}

fn describe(event: &DaemonEvent) -> String {
    match event {
        DaemonEvent::Subscribed {
            mode,
            voice_enabled,
            pending,
        } => format!(
            "connected: mode={} voice={} pending={}",
            mode,
            if *voice_enabled { "on" } else { "off" },
            pending
        ),
        DaemonEvent::ModeChanged { mode } => format!("mode -> {}", mode),
        DaemonEvent::SessionChanged {
            session_id,
            afk_active,
        } => format!(
            "session {} AFK {}",
            short_session(session_id),
            if *afk_active { "on" } else { "off" }
        ),
        DaemonEvent::RequestQueued { request } => format!(
            "queued   {} [{}] {}: {}",
            short_session(&request.id),
            short_session(&request.session_id),
            request.kind.name(),
            truncate(&request.kind.summary(), 60)
        ),
        DaemonEvent::RequestResolved {
            request_id,
            session_id,
            status,
        } => format!(
            "{:<8} {} [{}]",
            status.to_string(),
            short_session(request_id),
            short_session(session_id)
        ),
        DaemonEvent::VoiceChanged { enabled } => {
            format!("voice {}", if *enabled { "on" } else { "off" })
        }
        DaemonEvent::Deactivated { sessions } => {
            format!("deactivated, released {} session(s)", sessions.len())
        }
        DaemonEvent::ConfigReloaded => "config reloaded".to_string(),
        DaemonEvent::ShuttingDown => "daemon shutting down".to_string(),
    }
}
