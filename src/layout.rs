//! # Snapshot Cache Layout
//!
//! Deterministic mapping from a snapshot identifier to on-disk cache paths.
//!
//! ## Cache Model
//!
//! Each `(network, client, block)` triple owns one entry directory:
//!
//! ```text
//! {cache_root}/
//! └── mainnet/
//!     └── geth/
//!         └── 23100000/
//!             ├── snapshot.tar.zst   (transient, removed after extraction)
//!             ├── data/              (the extracted snapshot tree)
//!             ├── .complete          (completion marker)
//!             └── metadata.json      (informational)
//! ```
//!
//! The `.complete` marker is the single source of truth for entry usability:
//! it exists if and only if `data/` is a finished, consistent extraction.
//!
//! ## Normalization
//!
//! Identifiers are normalized before any path is derived: `network` and
//! `client` are folded to lowercase, a `_nametag` suffix on the client is
//! stripped (`"nethermind_default"` → `"nethermind"`), harness-native client
//! names are remapped to their registry names (`"go-ethereum"` → `"geth"`),
//! and an empty block becomes `"latest"`. Equality after normalization
//! defines the cache key.

use crate::constants::{
    ARCHIVE_FILE_NAME, CLIENT_NAME_MAP, COMPLETE_MARKER_NAME, DATA_DIR_NAME,
    DEFAULT_CACHE_DIR_NAME, ENV_SNAPSHOT_DIR, METADATA_FILE_NAME,
};
use std::path::{Path, PathBuf};

/// Block selector in a snapshot identifier.
pub const LATEST_BLOCK: &str = "latest";

/// A normalized snapshot identifier.
///
/// Construct via [`SnapshotId::normalized`]; the fields are stored already
/// lowercased and remapped so that two identifiers naming the same snapshot
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId {
    /// Network name (e.g. "mainnet", "sepolia").
    pub network: String,
    /// Registry client name (e.g. "geth", "reth").
    pub client: String,
    /// Block number as a decimal string, or `"latest"`.
    pub block: String,
}

impl SnapshotId {
    /// Builds a normalized identifier from raw harness inputs.
    ///
    /// An empty `block` selects `"latest"`.
    pub fn normalized(network: &str, client: &str, block: &str) -> Self {
        let block = if block.is_empty() {
            LATEST_BLOCK.to_string()
        } else {
            block.to_string()
        };
        Self {
            network: network.to_lowercase(),
            client: map_client_name(client),
            block,
        }
    }

    /// Returns true if this identifier still points at the floating
    /// `"latest"` block.
    pub fn is_latest(&self) -> bool {
        self.block == LATEST_BLOCK
    }

    /// Returns a copy of this identifier pinned to a concrete block.
    pub fn with_block(&self, block: impl Into<String>) -> Self {
        Self {
            network: self.network.clone(),
            client: self.client.clone(),
            block: block.into(),
        }
    }

    /// Cache key string, unique per normalized identifier.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.network, self.client, self.block)
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.network, self.client, self.block)
    }
}

/// Maps a harness client name to its snapshot-registry name.
///
/// Strips the `_nametag` suffix first, then folds to lowercase and applies
/// the remap table. Unknown names pass through unchanged.
fn map_client_name(name: &str) -> String {
    let base = match name.find('_') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    };
    let base = base.to_lowercase();
    for (harness, registry) in CLIENT_NAME_MAP {
        if *harness == base {
            return (*registry).to_string();
        }
    }
    base
}

/// Deterministic path derivation for cached snapshot entries.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Creates a layout rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a layout from the environment: `HIVE_SNAPSHOT_DIR` if set,
    /// otherwise `{cwd}/.hive/snapshots`.
    pub fn from_env() -> Self {
        let root = match std::env::var_os(ENV_SNAPSHOT_DIR) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                cwd.join(DEFAULT_CACHE_DIR_NAME)
            }
        };
        Self { root }
    }

    /// Returns the cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry directory for an identifier.
    pub fn entry_dir(&self, id: &SnapshotId) -> PathBuf {
        self.root.join(&id.network).join(&id.client).join(&id.block)
    }

    /// Path of the (transient) downloaded archive.
    pub fn archive_path(&self, id: &SnapshotId) -> PathBuf {
        self.entry_dir(id).join(ARCHIVE_FILE_NAME)
    }

    /// Path of the extracted snapshot tree.
    pub fn data_dir(&self, id: &SnapshotId) -> PathBuf {
        self.entry_dir(id).join(DATA_DIR_NAME)
    }

    /// Path of the completion marker.
    pub fn marker_path(&self, id: &SnapshotId) -> PathBuf {
        self.entry_dir(id).join(COMPLETE_MARKER_NAME)
    }

    /// Path of the informational metadata file.
    pub fn metadata_path(&self, id: &SnapshotId) -> PathBuf {
        self.entry_dir(id).join(METADATA_FILE_NAME)
    }

    /// Returns true if the entry's completion marker exists.
    pub fn is_complete(&self, id: &SnapshotId) -> bool {
        self.marker_path(id).exists()
    }
}

/// Builds the archive URL for an identifier.
pub fn archive_url(base: &str, id: &SnapshotId) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        base.trim_end_matches('/'),
        id.network,
        id.client,
        id.block,
        ARCHIVE_FILE_NAME
    )
}

/// Builds the plain-text latest-block resolution URL for an identifier.
pub fn latest_url(base: &str, id: &SnapshotId) -> String {
    format!(
        "{}/{}/{}/latest",
        base.trim_end_matches('/'),
        id.network,
        id.client
    )
}
