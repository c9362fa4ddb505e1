//! # Overlay Mount Manager
//!
//! Composes a read-only snapshot directory and an ephemeral writable layer
//! into a union mount for a container, tracks active mounts, and guarantees
//! cleanup - including after a process crash.
//!
//! ## Lifecycle
//!
//! ```text
//!   ∅ ──create──▶ Mounted ──cleanup──▶ ∅
//!                    │
//!                    └──process crash──▶ orphan (on disk, unregistered)
//!                                           │
//!                                           └──recover_orphans──▶ ∅
//! ```
//!
//! ## On-Disk Layout
//!
//! ```text
//! {overlay_root}/
//! ├── {overlay_id}/
//! │   ├── upper/    (writable layer, discarded on cleanup)
//! │   ├── work/     (overlayfs internal metadata)
//! │   └── merged/   (mount point, bind-mounted into the container)
//! └── state.json    (registry snapshot for crash recovery)
//! ```
//!
//! `state.json` is rewritten inside the registry lock on every change, so
//! on-disk state never trails in-memory state. When the registry empties
//! the file is removed. A process that crashes with live mounts leaves the
//! file behind; [`OverlayManager::recover_orphans`] replays it at the next
//! start, unmounting and deleting everything it lists.
//!
//! The snapshot (lower) directory is owned by the caller and is never
//! created, mutated, or removed by the manager.

use crate::constants::{
    DEFAULT_OVERLAY_DIR_NAME, ENV_OVERLAY_DIR, OVERLAY_ID_PREFIX_LEN, STATE_FILE_NAME,
};
use crate::error::{Error, Result};
use crate::platform::{default_backend, MountBackend};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// An active overlay filesystem mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayMount {
    /// Unique mount id, derived from the container id and creation time.
    pub id: String,
    /// Container this mount belongs to.
    pub container_id: String,
    /// Read-only snapshot directory (owned by the caller).
    pub lower_dir: PathBuf,
    /// Writable layer receiving all changes.
    pub upper_dir: PathBuf,
    /// Overlayfs working directory.
    pub work_dir: PathBuf,
    /// Merged view, bind-mounted into the container.
    pub merged_dir: PathBuf,
    /// Mount path inside the container.
    pub container_path: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Overlay manager configuration.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Directory where overlay trees and the state file live.
    pub base_dir: PathBuf,
}

impl OverlayConfig {
    /// Builds a configuration from the environment: `HIVE_OVERLAY_DIR` if
    /// set, otherwise `{cwd}/.hive/overlays`.
    pub fn from_env() -> Self {
        let base_dir = match std::env::var_os(ENV_OVERLAY_DIR) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                cwd.join(DEFAULT_OVERLAY_DIR_NAME)
            }
        };
        Self { base_dir }
    }
}

/// Manages overlay mounts for containers.
///
/// All mutating operations hold the registry write lock; lookups take the
/// shared lock. Mount syscalls are fast and run inside the critical
/// section so registry, state file, and kernel state stay in step.
#[derive(Debug)]
pub struct OverlayManager {
    base_dir: PathBuf,
    backend: Arc<dyn MountBackend>,
    /// container_id → mount.
    overlays: RwLock<HashMap<String, OverlayMount>>,
}

impl OverlayManager {
    /// Creates a manager with the environment-derived configuration and the
    /// platform mount backend.
    pub fn new() -> Result<Self> {
        Self::with_config(OverlayConfig::from_env(), default_backend())
    }

    /// Creates a manager with an explicit configuration and backend.
    pub fn with_config(config: OverlayConfig, backend: Arc<dyn MountBackend>) -> Result<Self> {
        std::fs::create_dir_all(&config.base_dir)?;
        Ok(Self {
            base_dir: config.base_dir,
            backend,
            overlays: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the overlay base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Creates a new overlay mount for a container.
    ///
    /// `snapshot_dir` becomes the read-only lower layer; the returned
    /// mount's `merged_dir` is what the caller bind-mounts into the
    /// container at `container_path`.
    ///
    /// Fails with [`Error::OverlayExists`] if the container already has a
    /// mount. On any failure the freshly allocated directories are removed
    /// and nothing is registered.
    pub async fn create(
        &self,
        container_id: &str,
        snapshot_dir: &Path,
        container_path: &str,
    ) -> Result<OverlayMount> {
        let mut overlays = self.overlays.write().await;

        if overlays.contains_key(container_id) {
            return Err(Error::OverlayExists(container_id.to_string()));
        }

        let meta = match std::fs::metadata(snapshot_dir) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SnapshotNotFound(snapshot_dir.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        if !meta.is_dir() {
            return Err(Error::SnapshotNotDirectory(snapshot_dir.to_path_buf()));
        }

        let id = overlay_id(container_id);
        let overlay_dir = self.base_dir.join(&id);
        let upper_dir = overlay_dir.join("upper");
        let work_dir = overlay_dir.join("work");
        let merged_dir = overlay_dir.join("merged");

        for dir in [&upper_dir, &work_dir, &merged_dir] {
            if let Err(err) = std::fs::create_dir_all(dir) {
                let _ = std::fs::remove_dir_all(&overlay_dir);
                return Err(err.into());
            }
        }

        let mount = OverlayMount {
            id: id.clone(),
            container_id: container_id.to_string(),
            lower_dir: snapshot_dir.to_path_buf(),
            upper_dir,
            work_dir,
            merged_dir,
            container_path: container_path.to_string(),
            created_at: Utc::now(),
        };

        if let Err(err) = self.backend.mount(&mount).await {
            let _ = std::fs::remove_dir_all(&overlay_dir);
            return Err(err);
        }

        overlays.insert(container_id.to_string(), mount.clone());
        self.persist_state(&overlays);

        info!(
            "created overlay {id} for container {container_id} (snapshot {}, merged {})",
            mount.lower_dir.display(),
            mount.merged_dir.display()
        );
        Ok(mount)
    }

    /// Unmounts and removes the overlay for a container.
    ///
    /// Idempotent: a container without a registered overlay cleans up
    /// successfully. If unmounting fails after full escalation the registry
    /// entry is retained so a later call can retry.
    pub async fn cleanup(&self, container_id: &str) -> Result<()> {
        let mut overlays = self.overlays.write().await;

        let Some(mount) = overlays.get(container_id).cloned() else {
            debug!("no overlay registered for container {container_id}");
            return Ok(());
        };

        if let Err(err) = self.teardown(&mount).await {
            error!("failed to clean up overlay for container {container_id}: {err}");
            return Err(err);
        }

        overlays.remove(container_id);
        self.persist_state(&overlays);

        info!("cleaned up overlay {} for container {container_id}", mount.id);
        Ok(())
    }

    /// Unmounts and removes all managed overlays.
    ///
    /// Continues past individual failures and returns the last error seen.
    /// The registry and state file are cleared unconditionally.
    pub async fn cleanup_all(&self) -> Result<()> {
        let mut overlays = self.overlays.write().await;

        let mut last_err = None;
        for (container_id, mount) in overlays.iter() {
            if let Err(err) = self.teardown(mount).await {
                error!("failed to clean up overlay for container {container_id}: {err}");
                last_err = Some(err);
            }
        }

        overlays.clear();
        let _ = std::fs::remove_file(self.state_path());

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Cleans up mounts left behind by a previous crashed process.
    ///
    /// Reads `state.json`, unmounts and removes every overlay recorded
    /// there, and deletes the file. Call once at process start, before any
    /// [`create`](Self::create). A malformed state file is logged and
    /// removed; there is nothing else to recover from it.
    pub async fn recover_orphans(&self) -> Result<()> {
        let mut overlays = self.overlays.write().await;

        let state_path = self.state_path();
        let data = match std::fs::read(&state_path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let state: HashMap<String, OverlayMount> = match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(err) => {
                warn!("failed to parse overlay state file, removing: {err}");
                let _ = std::fs::remove_file(&state_path);
                return Ok(());
            }
        };

        for (container_id, mount) in &state {
            info!("recovering orphaned overlay {} (container {container_id})", mount.id);
            if let Err(err) = self.teardown(mount).await {
                error!("failed to clean up orphaned overlay {}: {err}", mount.id);
            }
        }

        overlays.clear();
        let _ = std::fs::remove_file(&state_path);
        Ok(())
    }

    /// Looks up the overlay for a container, if any.
    pub async fn overlay(&self, container_id: &str) -> Option<OverlayMount> {
        self.overlays.read().await.get(container_id).cloned()
    }

    /// Unmounts a mount and removes its directory tree.
    async fn teardown(&self, mount: &OverlayMount) -> Result<()> {
        self.backend.unmount(mount).await?;

        let overlay_dir = self.base_dir.join(&mount.id);
        debug!("removing overlay directories at {}", overlay_dir.display());
        match std::fs::remove_dir_all(&overlay_dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!("failed to remove overlay directory {}: {err}", overlay_dir.display());
                Err(err.into())
            }
        }
    }

    /// Writes the registry snapshot to `state.json`, or removes the file
    /// when the registry is empty. Persistence failures are logged and
    /// suppressed; the in-memory registry stays authoritative for the
    /// process lifetime.
    fn persist_state(&self, overlays: &HashMap<String, OverlayMount>) {
        let state_path = self.state_path();

        if overlays.is_empty() {
            let _ = std::fs::remove_file(&state_path);
            return;
        }

        let result = serde_json::to_vec_pretty(overlays)
            .map_err(Error::from)
            .and_then(|data| std::fs::write(&state_path, data).map_err(Error::from));
        if let Err(err) = result {
            warn!("failed to persist overlay state: {err}");
        }
    }

    fn state_path(&self) -> PathBuf {
        self.base_dir.join(STATE_FILE_NAME)
    }
}

/// Generates a unique overlay id from a container-id prefix and the
/// current time in nanoseconds.
fn overlay_id(container_id: &str) -> String {
    let prefix: String = container_id.chars().take(OVERLAY_ID_PREFIX_LEN).collect();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("{prefix}_{nanos}")
}
