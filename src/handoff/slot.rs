//! On-disk representation of a handoff slot.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AfkError, Result};
use crate::request::Answer;

/// Reserved slot payload meaning "operator forced the waiter back to local".
/// It is not valid JSON, so it can never collide with a serialized answer.
/// The released request's id follows it after a space.
pub const DEACTIVATE_SENTINEL: &str = "__afk_relay_deactivate__";

const SLOT_EXTENSION: &str = "answer";

/// Decoded content of a slot file. Every payload names the request it
/// resolves, so a hook never picks up a payload meant for another request
/// of the same session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotContent {
    Answer { request_id: String, answer: Answer },
    Deactivated { request_id: String },
}

impl SlotContent {
    pub fn request_id(&self) -> &str {
        match self {
            SlotContent::Answer { request_id, .. } | SlotContent::Deactivated { request_id } => {
                request_id
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Delivery {
    request_id: String,
    answer: Answer,
}

/// File name for a session's slot. Session ids come from the assistant and
/// may contain anything, so the name is derived from their hash.
pub fn slot_file_name(session_id: &str) -> String {
    let digest = Sha256::digest(session_id.as_bytes());
    format!("{:x}.{}", digest, SLOT_EXTENSION)
}

pub fn encode(content: &SlotContent) -> Result<Vec<u8>> {
    match content {
        SlotContent::Answer { request_id, answer } => Ok(serde_json::to_vec(&Delivery {
            request_id: request_id.clone(),
            answer: answer.clone(),
        })?),
        SlotContent::Deactivated { request_id } => {
            Ok(format!("{DEACTIVATE_SENTINEL} {request_id}").into_bytes())
        }
    }
}

pub fn decode(bytes: &[u8]) -> Result<SlotContent> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if let Some(request_id) = text.strip_prefix(DEACTIVATE_SENTINEL) {
        return Ok(SlotContent::Deactivated {
            request_id: request_id.trim().to_string(),
        });
    }
    let delivery: Delivery = serde_json::from_str(text)?;
    Ok(SlotContent::Answer {
        request_id: delivery.request_id,
        answer: delivery.answer,
    })
}

/// Read a slot without claiming it. `None` when the slot is empty.
pub fn peek(path: &Path) -> Result<Option<SlotContent>> {
    match fs::read(path) {
        Ok(bytes) => decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Time since the slot at `path` was last written.
pub fn age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(SystemTime::now().duration_since(modified).unwrap_or_default())
}

/// Write `bytes` to `target` so that readers see either nothing or the whole
/// payload: the data goes to a temp file in the same directory which is then
/// renamed over the target.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    ensure_private_dir(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".slot-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    set_file_permissions_0600(tmp.path());
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically take ownership of the slot at `path` by renaming it to a name
/// unique to this reader. Only one concurrent claimant can win the rename.
/// Returns `None` when there is nothing to claim.
pub fn claim(path: &Path) -> std::io::Result<Option<PathBuf>> {
    let claimed = path.with_extension(format!(
        "{}.{}.claim",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));
    match fs::rename(path, &claimed) {
        Ok(()) => Ok(Some(claimed)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Claim, read and delete the slot if it holds a payload for `request_id`.
/// Payloads for other requests are left where they are.
pub fn consume(path: &Path, request_id: &str) -> Result<Option<SlotContent>> {
    match peek(path)? {
        Some(content) if content.request_id() == request_id => {}
        _ => return Ok(None),
    }
    let Some(claimed) = claim(path)? else {
        return Ok(None);
    };
    let bytes = fs::read(&claimed);
    let content = match bytes.map_err(AfkError::from).and_then(|b| decode(&b)) {
        Ok(content) => content,
        Err(e) => {
            let _ = fs::remove_file(&claimed);
            return Err(e);
        }
    };
    if content.request_id() != request_id {
        // Replaced between the peek and the claim: hand it back unless an even
        // newer payload already took its place.
        restore(&claimed, path);
        return Ok(None);
    }
    let _ = fs::remove_file(&claimed);
    Ok(Some(content))
}

fn restore(claimed: &Path, path: &Path) {
    if let Err(e) = fs::hard_link(claimed, path) {
        tracing::debug!(error = %e, "claimed payload superseded, dropping it");
    }
    let _ = fs::remove_file(claimed);
}

pub(crate) fn write_failure(session_id: &str, err: impl std::fmt::Display) -> AfkError {
    AfkError::HandoffWrite {
        session_id: session_id.to_string(),
        reason: err.to_string(),
    }
}

fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
    }
    Ok(())
}

/// Set file permissions to 0600 (owner read/write only).
#[cfg(unix)]
fn set_file_permissions_0600(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o600);
    let _ = fs::set_permissions(path, perms);
}

#[cfg(not(unix))]
fn set_file_permissions_0600(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::PermissionDecision;
    use tempfile::TempDir;

    #[test]
    fn slot_names_are_filesystem_safe() {
        let name = slot_file_name("../../etc/passwd");
        assert!(!name.contains('/'));
        assert!(name.ends_with(".answer"));
        assert_eq!(name, slot_file_name("../../etc/passwd"));
        assert_ne!(name, slot_file_name("other"));
    }

    fn allow(request_id: &str) -> SlotContent {
        SlotContent::Answer {
            request_id: request_id.into(),
            answer: Answer::Decision {
                decision: PermissionDecision::Allow,
            },
        }
    }

    #[test]
    fn sentinel_is_not_an_answer() {
        let sentinel = SlotContent::Deactivated {
            request_id: "r1".into(),
        };
        let bytes = encode(&sentinel).unwrap();
        assert!(bytes.starts_with(DEACTIVATE_SENTINEL.as_bytes()));
        assert_eq!(decode(&bytes).unwrap(), sentinel);

        let answer = allow("r1");
        assert_eq!(decode(&encode(&answer).unwrap()).unwrap(), answer);
    }

    #[test]
    fn consume_leaves_other_requests_payloads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("z.answer");
        write_atomic(&path, &encode(&allow("first")).unwrap()).unwrap();

        assert!(consume(&path, "second").unwrap().is_none());
        assert!(path.exists());
        assert_eq!(consume(&path, "first").unwrap(), Some(allow("first")));
        assert!(!path.exists());
    }

    #[test]
    fn restore_does_not_clobber_newer_payload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("w.answer");
        write_atomic(&path, b"old").unwrap();
        let claimed = claim(&path).unwrap().unwrap();
        write_atomic(&path, b"new").unwrap();

        restore(&claimed, &path);
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!claimed.exists());
    }

    #[test]
    fn only_one_claim_wins() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("x.answer");
        write_atomic(&path, b"payload").unwrap();

        let first = claim(&path).unwrap();
        let second = claim(&path).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("y.answer");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();

        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }
}
