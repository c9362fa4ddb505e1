//! # hivesnap
//!
//! **Snapshot caching and overlay mounts for execution-client benchmarking**
//!
//! This crate accelerates startup of blockchain execution clients under
//! test: instead of syncing from genesis, a client container starts on a
//! pre-synced chain-state directory (a *snapshot*) presented through an
//! overlay filesystem. The snapshot stays read-only and cached; every
//! container gets its own ephemeral writable layer whose changes vanish
//! when the container stops.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                            hivesnap                                │
//! ├────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────┐     ┌───────────────────────────┐    │
//! │  │     SnapshotFetcher      │     │      OverlayManager       │    │
//! │  │ ensure(id) → data dir    │     │ create / cleanup /        │    │
//! │  │                          │     │ cleanup_all /             │    │
//! │  │  resolve "latest"        │     │ recover_orphans           │    │
//! │  │  download (resumable)    │     │                           │    │
//! │  │  extract tar.zst         │     │  registry + state.json    │    │
//! │  │  .complete marker        │     │  (crash recovery)         │    │
//! │  └────────────┬─────────────┘     └─────────────┬─────────────┘    │
//! │               │                                 │                  │
//! │  ┌────────────┴─────────────┐     ┌─────────────┴─────────────┐    │
//! │  │ CacheLayout │ Downloader │     │       MountBackend        │    │
//! │  │      │      Extractor    │     │  OverlayFs │ Unsupported  │    │
//! │  └──────────────────────────┘     └───────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! The test harness drives both halves around a container launch:
//!
//! ```text
//! harness                    fetcher                     manager
//!    │  ensure(config) ─────────▶ │                         │
//!    │ ◀───── snapshot data dir ──│                         │
//!    │  create(container, dir, "/data") ───────────────────▶│
//!    │ ◀──────────────────────────── merged dir to bind ────│
//!    │              (container runs)                        │
//!    │  cleanup(container) ────────────────────────────────▶│
//! ```
//!
//! On process start, [`OverlayManager::recover_orphans`] replays
//! `state.json` to unmount anything a crashed predecessor left behind,
//! before any new mounts are created.
//!
//! # Cache Layout
//!
//! ```text
//! {cache_root}/{network}/{client}/{block}/
//!   ├── snapshot.tar.zst   (transient)
//!   ├── data/              (the snapshot)
//!   └── .complete          (marker: data/ is usable)
//! {overlay_root}/
//!   ├── {overlay_id}/{upper,work,merged}/
//!   └── state.json
//! ```
//!
//! Roots default to `{cwd}/.hive/snapshots` and `{cwd}/.hive/overlays`,
//! overridable via `HIVE_SNAPSHOT_DIR` and `HIVE_OVERLAY_DIR`.
//!
//! # Platform Support
//!
//! Overlay mounts require Linux (and privileges for the mount syscall).
//! On other platforms [`OverlayManager::create`] fails with
//! [`Error::OverlayNotSupported`]; snapshot fetching works everywhere.
//!
//! # Example
//!
//! ```rust,ignore
//! use hivesnap::{FetchConfig, OverlayManager, SnapshotFetcher};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> hivesnap::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let fetcher = SnapshotFetcher::new();
//!     let manager = OverlayManager::new()?;
//!     manager.recover_orphans().await?;
//!
//!     // Host path of a cached (or freshly fetched) snapshot.
//!     let snapshot = fetcher
//!         .ensure(
//!             &FetchConfig {
//!                 network: "mainnet".to_string(),
//!                 client: "geth".to_string(),
//!                 ..Default::default()
//!             },
//!             &cancel,
//!         )
//!         .await?;
//!
//!     // Writable view for one container; bind mount.merged_dir into it.
//!     let mount = manager.create("c0ffee123456", &snapshot, "/data").await?;
//!     println!("bind {} into the container", mount.merged_dir.display());
//!
//!     // After the container stops, discard its changes.
//!     manager.cleanup("c0ffee123456").await?;
//!     Ok(())
//! }
//! ```

// =============================================================================
// Modules
// =============================================================================

pub mod constants;
mod download;
mod error;
mod extract;
mod fetcher;
mod layout;
mod options;
mod overlay;
mod platform;

// =============================================================================
// Facade
// =============================================================================

pub use constants::{KNOWN_CLIENTS, KNOWN_NETWORKS};
pub use error::{Error, Result};
pub use fetcher::{FetchConfig, SnapshotFetcher, SnapshotMetadata};
pub use layout::{archive_url, latest_url, CacheLayout, SnapshotId, LATEST_BLOCK};
pub use options::{ClientSnapshotConfig, OverlaySpec};
pub use overlay::{OverlayConfig, OverlayManager, OverlayMount};
pub use platform::{default_backend, MountBackend, Unsupported};

#[cfg(target_os = "linux")]
pub use platform::OverlayFs;

/// Low-level building blocks, exposed for tooling that inspects the cache
/// or drives downloads directly.
pub mod raw {
    pub use crate::download::download_to;
    pub use crate::extract::extract;
}
