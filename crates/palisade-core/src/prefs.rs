// ── Process-visible status preferences ──
//
// Four booleans plus the active privileged backend, persisted so
// external readers (UI process, quick-toggle tile) observe the truth
// promptly. Writes are commit-like: the file hits disk (temp + rename)
// before the mutating call returns. Reads are lock-free off an
// `ArcSwap` snapshot.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::BackendKind;

/// The persisted flag set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    pub service_running: bool,
    pub interface_active: bool,
    pub privileged_service_running: bool,
    pub privileged_backend_type: Option<BackendKind>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Synchronous status-preference store.
pub struct StatusPrefs {
    path: PathBuf,
    snapshot: ArcSwap<StatusFlags>,
}

impl StatusPrefs {
    /// Open the store, loading existing flags if the file parses.
    /// A corrupt or missing file starts from defaults.
    pub fn open(path: PathBuf) -> Self {
        let flags = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "status file corrupt; resetting");
                StatusFlags::default()
            }),
            Err(_) => StatusFlags::default(),
        };
        Self {
            path,
            snapshot: ArcSwap::from_pointee(flags),
        }
    }

    pub fn snapshot(&self) -> Arc<StatusFlags> {
        self.snapshot.load_full()
    }

    /// Mutate and commit. The in-memory snapshot only advances after
    /// the file write succeeds, so readers never observe a state that
    /// did not reach disk.
    pub fn update(&self, mutate: impl FnOnce(&mut StatusFlags)) -> io::Result<()> {
        let mut flags = (*self.snapshot.load_full()).clone();
        mutate(&mut flags);
        flags.updated_at = Some(Utc::now());

        self.write_file(&flags)?;
        self.snapshot.store(Arc::new(flags));
        Ok(())
    }

    pub fn set_service_running(&self, running: bool) -> io::Result<()> {
        self.update(|f| f.service_running = running)
    }

    pub fn set_interface_active(&self, active: bool) -> io::Result<()> {
        self.update(|f| f.interface_active = active)
    }

    pub fn set_privileged_backend(&self, backend: Option<BackendKind>) -> io::Result<()> {
        self.update(|f| {
            f.privileged_service_running = backend.is_some();
            f.privileged_backend_type = backend;
        })
    }

    fn write_file(&self, flags: &StatusFlags) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(flags).map_err(io::Error::other)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flags_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let prefs = StatusPrefs::open(path.clone());
        prefs.set_service_running(true).unwrap();
        prefs
            .set_privileged_backend(Some(BackendKind::PacketFilter))
            .unwrap();

        let reopened = StatusPrefs::open(path);
        let snap = reopened.snapshot();
        assert!(snap.service_running);
        assert!(snap.privileged_service_running);
        assert_eq!(snap.privileged_backend_type, Some(BackendKind::PacketFilter));
    }

    #[test]
    fn corrupt_file_resets_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();

        let prefs = StatusPrefs::open(path);
        assert_eq!(*prefs.snapshot(), StatusFlags::default());
    }

    #[test]
    fn clearing_backend_clears_privileged_flag() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = StatusPrefs::open(dir.path().join("state.json"));

        prefs
            .set_privileged_backend(Some(BackendKind::ConnMgr))
            .unwrap();
        prefs.set_privileged_backend(None).unwrap();

        let snap = prefs.snapshot();
        assert!(!snap.privileged_service_running);
        assert_eq!(snap.privileged_backend_type, None);
    }
}
