pub mod settings;

pub use settings::*;

use std::path::PathBuf;

/// Returns the global config directory path: `~/.config/afk-relay/`
pub fn dirs_global() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".config").join("afk-relay")
}

/// Default config file: `~/.config/afk-relay/config.yml`
pub fn config_file() -> PathBuf {
    dirs_global().join("config.yml")
}

/// Directory for the control socket and handoff slots.
/// Prefers `$XDG_RUNTIME_DIR/afk-relay` (per-user, mode 0700); falls back to
/// a per-uid directory under /tmp.
pub fn runtime_dir() -> PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir).join("afk-relay"),
        _ => PathBuf::from("/tmp").join(format!("afk-relay-{}", current_uid())),
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}
