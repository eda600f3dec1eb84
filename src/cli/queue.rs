use crate::config::Settings;
use crate::daemon::render::truncate;
use crate::error::Result;
use crate::ipc::{ControlCommand, ResponseData};
use crate::request::PendingRequest;

use super::control_client;
use super::daemon::unexpected;

/// List pending requests in arrival order.
pub async fn run_queue_list(settings: &Settings) -> Result<()> {
    let pending = match control_client(settings).call(&ControlCommand::QueueList).await? {
        ResponseData::Queue { requests } => requests,
        other => return Err(unexpected(&other)),
    };

    if pending.is_empty() {
        println!("No pending requests.");
        return Ok(());
    }

    for request in &pending {
        println!(
            "ID: {}\n  Session: {}\n  Kind: {}\n  Request: {}\n  Announced: {}\n  Queued: {}\n",
            request.id,
            request.session_id,
            request.kind.name(),
            truncate(&request.kind.summary(), 80),
            if request.announced_message_id.is_some() { "yes" } else { "no" },
            request.created_at,
        );
    }

    println!("{} pending request(s)", pending.len());
    Ok(())
}

/// Skip every pending request of one session. Its waiting hook continues
/// locally.
pub async fn run_queue_skip(settings: &Settings, session_id: &str) -> Result<()> {
    let removed = removed(
        control_client(settings)
            .call(&ControlCommand::QueueSkip {
                session_id: session_id.to_string(),
            })
            .await?,
    )?;
    eprintln!(
        "afk-relay: skipped {} request(s) for {}",
        removed.len(),
        session_id
    );
    Ok(())
}

/// Skip every pending request.
pub async fn run_queue_flush(settings: &Settings) -> Result<()> {
    let removed = removed(control_client(settings).call(&ControlCommand::QueueFlush).await?)?;
    eprintln!("afk-relay: flushed {} request(s)", removed.len());
    Ok(())
}

fn removed(data: ResponseData) -> Result<Vec<PendingRequest>> {
    match data {
        ResponseData::Removed { requests } => Ok(requests),
        other => Err(unexpected(&other)),
    }
}
