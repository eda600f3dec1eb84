use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AfkError, Result};

/// Global routing mode of the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Requests are answered at the local terminal; hooks fall through.
    #[default]
    Local,
    /// Requests are routed to the remote operator.
    Afk,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Local => write!(f, "local"),
            Mode::Afk => write!(f, "afk"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Mode::Local),
            "afk" | "away" | "remote" => Ok(Mode::Afk),
            _ => Err(format!("unknown mode: {s}")),
        }
    }
}

/// Daemon and hook configuration from `~/.config/afk-relay/config.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Control socket. Default: `<runtime dir>/control.sock`.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Directory holding handoff slots. Default: `<runtime dir>/handoff`.
    #[serde(default)]
    pub handoff_dir: Option<PathBuf>,

    /// How often a waiting hook checks its slot. Default: 250.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a hook waits for the operator before falling through. Default: 900.
    #[serde(default = "default_hook_timeout")]
    pub hook_timeout_secs: u64,

    /// Timeout for a single control request to the daemon. Default: 5.
    #[serde(default = "default_daemon_timeout")]
    pub daemon_timeout_secs: u64,

    /// Requests older than this are expired by the sweep. 0 disables. Default: 3600.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// How often the staleness sweep runs. Default: 30.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Queue depth limit per session. Default: 8.
    #[serde(default = "default_max_pending")]
    pub max_pending_per_session: usize,

    /// Mode the daemon starts in. Default: local.
    #[serde(default)]
    pub start_mode: Mode,

    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_poll_interval_ms() -> u64 {
    250
}
fn default_hook_timeout() -> u64 {
    900
}
fn default_daemon_timeout() -> u64 {
    5
}
fn default_stale_after() -> u64 {
    3600
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_max_pending() -> usize {
    crate::queue::DEFAULT_MAX_PENDING_PER_SESSION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            socket_path: None,
            handoff_dir: None,
            poll_interval_ms: default_poll_interval_ms(),
            hook_timeout_secs: default_hook_timeout(),
            daemon_timeout_secs: default_daemon_timeout(),
            stale_after_secs: default_stale_after(),
            sweep_interval_secs: default_sweep_interval(),
            max_pending_per_session: default_max_pending(),
            start_mode: Mode::Local,
            telegram: TelegramConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file. Returns defaults if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| AfkError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load from `path`, or the global config file when `None`, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = super::config_file();
        let mut settings = Self::load_from(path.unwrap_or(default_path.as_path()))?;
        settings.apply_env();
        Ok(settings)
    }

    /// `AFK_RELAY_TELEGRAM_TOKEN`, `AFK_RELAY_CHAT_ID` and `AFK_RELAY_SOCKET`
    /// take precedence over the file.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("AFK_RELAY_TELEGRAM_TOKEN") {
            if !token.trim().is_empty() {
                self.telegram.bot_token = Some(token.trim().to_string());
            }
        }
        if let Some(chat_id) = std::env::var("AFK_RELAY_CHAT_ID")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.telegram.chat_id = Some(chat_id);
        }
        if let Ok(socket) = std::env::var("AFK_RELAY_SOCKET") {
            self.socket_path = Some(PathBuf::from(socket));
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| super::runtime_dir().join("control.sock"))
    }

    pub fn handoff_dir(&self) -> PathBuf {
        self.handoff_dir
            .clone()
            .unwrap_or_else(|| super::runtime_dir().join("handoff"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    /// `None` when the staleness sweep is disabled.
    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Telegram Bot API settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,

    /// The single chat the operator talks to the bot from. Updates from any
    /// other chat are ignored.
    pub chat_id: Option<i64>,

    /// Server-side wait of each getUpdates call. Default: 25.
    #[serde(default = "default_long_poll")]
    pub long_poll_secs: u64,

    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_long_poll() -> u64 {
    25
}
fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            long_poll_secs: default_long_poll(),
            api_base: default_api_base(),
        }
    }
}

// The bot token is a credential; keep it out of logs.
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .field("long_poll_secs", &self.long_poll_secs)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load_from(&tmp.path().join("nope.yml")).unwrap();
        assert_eq!(settings.poll_interval_ms, 250);
        assert_eq!(settings.start_mode, Mode::Local);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yml");
        std::fs::write(
            &path,
            "hook_timeout_secs: 30\nstart_mode: afk\ntelegram:\n  bot_token: \"123:abc\"\n  chat_id: 42\n",
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.hook_timeout_secs, 30);
        assert_eq!(settings.start_mode, Mode::Afk);
        assert_eq!(settings.telegram.chat_id, Some(42));
        assert_eq!(settings.telegram.long_poll_secs, 25);
        assert_eq!(settings.max_pending_per_session, 8);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yml");
        std::fs::write(&path, "poll_interval_ms: [oops").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(AfkError::ConfigParse { .. })
        ));
    }

    #[test]
    fn debug_output_hides_token() {
        let config = TelegramConfig {
            bot_token: Some("secret-token".into()),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("secret-token"));
    }
}
