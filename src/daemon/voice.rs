use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::Result;

/// Speech output collaborator. Synthesis lives outside this crate; the daemon
/// only toggles it and forwards one-shot utterances.
#[async_trait]
pub trait VoiceControl: Send + Sync {
    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    async fn speak(&self, text: &str) -> Result<()>;
}

/// Default voice backend: records the toggle and logs utterances.
#[derive(Debug, Default)]
pub struct LoggingVoice {
    enabled: AtomicBool,
}

impl LoggingVoice {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }
}

#[async_trait]
impl VoiceControl for LoggingVoice {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn speak(&self, text: &str) -> Result<()> {
        tracing::info!(text, "speak");
        Ok(())
    }
}
