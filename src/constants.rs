//! Constants for the snapshot and overlay layer.
//!
//! All defaults, file names, and timeouts are defined here to ensure
//! consistency and prevent magic numbers throughout the codebase.

use std::time::Duration;

// =============================================================================
// Remote Snapshot Registry
// =============================================================================

/// Default base URL for the ethpandaops snapshot registry.
pub const DEFAULT_BASE_URL: &str = "https://snapshots.ethpandaops.io";

/// File name of the snapshot archive on the registry and in the cache.
pub const ARCHIVE_FILE_NAME: &str = "snapshot.tar.zst";

/// Maximum number of bytes read from the `latest` block-resolution endpoint.
pub const LATEST_RESPONSE_LIMIT: usize = 64;

// =============================================================================
// Cache Layout
// =============================================================================

/// Default cache directory, relative to the current working directory.
pub const DEFAULT_CACHE_DIR_NAME: &str = ".hive/snapshots";

/// Environment variable overriding the snapshot cache directory.
pub const ENV_SNAPSHOT_DIR: &str = "HIVE_SNAPSHOT_DIR";

/// Directory holding the extracted snapshot tree inside a cache entry.
pub const DATA_DIR_NAME: &str = "data";

/// Marker file certifying that a cache entry's `data/` directory is a
/// complete, consistent extraction.
pub const COMPLETE_MARKER_NAME: &str = ".complete";

/// Informational metadata file written next to the completion marker.
/// Never consulted for correctness.
pub const METADATA_FILE_NAME: &str = "metadata.json";

// =============================================================================
// Overlay Layout
// =============================================================================

/// Default overlay directory, relative to the current working directory.
pub const DEFAULT_OVERLAY_DIR_NAME: &str = ".hive/overlays";

/// Environment variable overriding the overlay directory.
pub const ENV_OVERLAY_DIR: &str = "HIVE_OVERLAY_DIR";

/// File recording the live mount registry for crash recovery.
pub const STATE_FILE_NAME: &str = "state.json";

/// Number of leading container-id bytes used in overlay ids.
pub const OVERLAY_ID_PREFIX_LEN: usize = 12;

/// Default mount path of a snapshot overlay inside the container.
pub const DEFAULT_CONTAINER_PATH: &str = "/data";

// =============================================================================
// Timing
// =============================================================================

/// Minimum interval between download progress reports.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Settle time after a lazy (detached) unmount.
pub const LAZY_UNMOUNT_SETTLE: Duration = Duration::from_millis(100);

/// Settle time after killing processes that hold a mount point open.
pub const KILL_PROCESS_SETTLE: Duration = Duration::from_millis(500);

// =============================================================================
// Client Name Mapping
// =============================================================================

/// Harness-native client names mapped to their snapshot-registry names.
/// Names absent from this table are used as-is after normalization.
pub const CLIENT_NAME_MAP: &[(&str, &str)] = &[
    ("go-ethereum", "geth"),
    ("nethermind", "nethermind"),
    ("besu", "besu"),
    ("reth", "reth"),
    ("erigon", "erigon"),
];

/// Networks commonly published on the default snapshot registry.
pub const KNOWN_NETWORKS: &[&str] = &["mainnet", "sepolia", "holesky", "hoodi"];

/// Execution clients commonly published on the default snapshot registry.
pub const KNOWN_CLIENTS: &[&str] = &["geth", "nethermind", "besu", "reth", "erigon"];
