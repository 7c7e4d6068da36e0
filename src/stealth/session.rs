//! Session persistence: storage snapshot plus device profile, keyed by
//! session id. Reloading a session restores both, so a returning visitor
//! presents the same cookies *and* the same fingerprint.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::profiles::DeviceProfile;
use crate::utils::atomic_write_json;

/// One cookie captured from a browsing context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub expires: Option<f64>,
}

/// Web storage entries for a single origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginStorage {
    pub origin: String,
    pub local_storage: Vec<StorageItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    pub name: String,
    pub value: String,
}

/// Snapshot of cookies and web storage for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    pub cookies: Vec<CookieRecord>,
    pub origins: Vec<OriginStorage>,
}

/// A persisted session: fingerprint and storage travel together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub profile: DeviceProfile,
    pub storage: StorageState,
}

/// Directory-backed session store: `{dir}/{session_id}/profile.json` and
/// `{dir}/{session_id}/storage_state.json`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Session ids come from the CLI; strip anything that could traverse
    /// out of the sessions directory.
    fn sanitize_id(session_id: &str) -> String {
        session_id
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect()
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.dir.join(Self::sanitize_id(session_id))
    }

    /// Load a session. Missing or corrupt files fall back to a fresh
    /// session (returns `None`) rather than failing the run.
    pub fn load(&self, session_id: &str) -> Option<SessionState> {
        let dir = self.session_dir(session_id);
        let profile_path = dir.join("profile.json");
        let storage_path = dir.join("storage_state.json");

        if !profile_path.exists() {
            info!(session = %Self::sanitize_id(session_id), "session not found, starting fresh");
            return None;
        }

        let profile: DeviceProfile = match std::fs::read_to_string(&profile_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
        {
            Some(p) => p,
            None => {
                warn!(
                    session = %Self::sanitize_id(session_id),
                    "session profile unreadable, starting fresh"
                );
                return None;
            }
        };

        let storage: StorageState = std::fs::read_to_string(&storage_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        Some(SessionState { profile, storage })
    }

    /// Persist a session atomically; a crash mid-save never corrupts an
    /// existing session on disk.
    pub fn save(&self, session_id: &str, state: &SessionState) -> anyhow::Result<()> {
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir)?;
        atomic_write_json(&dir.join("profile.json"), &state.profile)?;
        atomic_write_json(&dir.join("storage_state.json"), &state.storage)?;
        info!(session = %Self::sanitize_id(session_id), "session saved");
        Ok(())
    }
}

/// Deterministic per-session seed for fingerprint perturbations.
///
/// The same session id always produces the same canvas noise; different
/// sessions diverge.
pub fn seed_for_session(session_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::profiles::choose_profile;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        (dir, store)
    }

    #[test]
    fn test_missing_session_is_none() {
        let (_dir, store) = store();
        assert!(store.load("nope").is_none());
    }

    #[test]
    fn test_save_and_reload_restores_profile_and_storage() {
        let (_dir, store) = store();
        let state = SessionState {
            profile: choose_profile(None),
            storage: StorageState {
                cookies: vec![CookieRecord {
                    name: "sid".to_string(),
                    value: "abc123".to_string(),
                    domain: "example.com".to_string(),
                    path: "/".to_string(),
                    secure: true,
                    http_only: true,
                    expires: None,
                }],
                origins: vec![OriginStorage {
                    origin: "https://example.com".to_string(),
                    local_storage: vec![StorageItem {
                        name: "k".to_string(),
                        value: "v".to_string(),
                    }],
                }],
            },
        };

        store.save("sess-1", &state).unwrap();
        let loaded = store.load("sess-1").unwrap();
        assert_eq!(loaded.profile, state.profile);
        assert_eq!(loaded.storage, state.storage);
    }

    #[test]
    fn test_session_stickiness_across_reloads() {
        let (_dir, store) = store();
        let state = SessionState {
            profile: choose_profile(None),
            storage: StorageState::default(),
        };
        store.save("sticky", &state).unwrap();

        let first = store.load("sticky").unwrap();
        let second = store.load("sticky").unwrap();
        assert_eq!(first.profile.user_agent, second.profile.user_agent);
        assert_eq!(first.profile.viewport_width, second.profile.viewport_width);
        assert_eq!(first.profile.locale, second.profile.locale);
        assert_eq!(first.profile.timezone_id, second.profile.timezone_id);
        assert_eq!(first.profile.webgl_vendor, second.profile.webgl_vendor);
        assert_eq!(first.profile.webgl_renderer, second.profile.webgl_renderer);
    }

    #[test]
    fn test_corrupt_profile_falls_back_to_fresh() {
        let (_dir, store) = store();
        let session_dir = store.session_dir("broken");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(session_dir.join("profile.json"), "{not json").unwrap();
        assert!(store.load("broken").is_none());
    }

    #[test]
    fn test_session_id_sanitization_blocks_traversal() {
        let (_dir, store) = store();
        let dir = store.session_dir("../../etc/passwd");
        assert!(!dir.to_string_lossy().contains(".."));
    }

    #[test]
    fn test_seed_is_deterministic_per_session() {
        assert_eq!(seed_for_session("a"), seed_for_session("a"));
        assert_ne!(seed_for_session("a"), seed_for_session("b"));
    }
}
