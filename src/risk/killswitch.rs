//! Persisted binary halt.
//!
//! The flag survives restarts: activation writes `{active, reason,
//! activated_at}` to disk, and startup adopts whatever the file says. A
//! readable-but-unparseable file aborts startup rather than trading against
//! an unknown halt state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    active: bool,
    reason: String,
    activated_at: Option<DateTime<Utc>>,
}

pub struct KillSwitch {
    state: RwLock<PersistedState>,
    path: PathBuf,
}

impl KillSwitch {
    /// Load persisted state. A missing file means inactive; a corrupt file
    /// is unrecoverable.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<PersistedState>(&raw).map_err(|e| {
                Error::Config(format!(
                    "kill switch state at {} is unparseable: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => return Err(e.into()),
        };

        if state.active {
            warn!(
                reason = %state.reason,
                activated_at = ?state.activated_at,
                "kill switch is ACTIVE from previous session"
            );
        }

        Ok(Self {
            state: RwLock::new(state),
            path,
        })
    }

    fn persist(&self, state: &PersistedState) {
        match serde_json::to_vec(state) {
            Ok(data) => {
                if let Err(e) = std::fs::write(&self.path, data) {
                    error!(path = %self.path.display(), error = %e, "failed to persist kill switch state");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize kill switch state"),
        }
    }

    pub fn activate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.state.write();
        state.active = true;
        state.reason = reason.clone();
        state.activated_at = Some(Utc::now());
        self.persist(&state);
        error!(reason = %reason, "KILL SWITCH ACTIVATED");
    }

    /// Operator intent only.
    pub fn deactivate(&self) {
        let mut state = self.state.write();
        state.active = false;
        state.reason.clear();
        self.persist(&state);
        warn!("kill switch deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    pub fn reason(&self) -> String {
        self.state.read().reason.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("killswitch.json");

        let ks = KillSwitch::load(&path).unwrap();
        assert!(!ks.is_active());
        ks.activate("daily PnL breach");

        let reloaded = KillSwitch::load(&path).unwrap();
        assert!(reloaded.is_active());
        assert_eq!(reloaded.reason(), "daily PnL breach");

        reloaded.deactivate();
        let again = KillSwitch::load(&path).unwrap();
        assert!(!again.is_active());
    }

    #[test]
    fn corrupt_state_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("killswitch.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(KillSwitch::load(&path).is_err());
    }
}
