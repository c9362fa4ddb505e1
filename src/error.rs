//! Error types for the snapshot and overlay layer.

use std::path::PathBuf;

/// Result type alias for snapshot and overlay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the snapshot and overlay layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Snapshot Fetching Errors
    // =========================================================================
    /// Resolving "latest" to a concrete block number failed.
    #[error("failed to resolve latest snapshot block for {network}/{client}: {reason}")]
    ResolveLatestFailed {
        network: String,
        client: String,
        reason: String,
    },

    /// The snapshot server answered with an unexpected HTTP status.
    #[error("snapshot download failed: HTTP {status} for {url}")]
    DownloadHttp { url: String, status: u16 },

    /// No extraction strategy is available on this host.
    #[error("no extraction strategy available: {0}")]
    ExtractorUnavailable(String),

    /// Archive extraction failed. The archive is preserved for retry.
    #[error("failed to extract {}: {reason}", .archive.display())]
    ExtractFailed { archive: PathBuf, reason: String },

    // =========================================================================
    // Overlay Errors
    // =========================================================================
    /// Overlay filesystems are not available on this platform.
    #[error("overlay filesystem not supported: {0}")]
    OverlayNotSupported(String),

    /// The snapshot path given to the overlay manager does not exist.
    #[error("snapshot path not found: {}", .0.display())]
    SnapshotNotFound(PathBuf),

    /// The snapshot path given to the overlay manager is not a directory.
    #[error("snapshot path is not a directory: {}", .0.display())]
    SnapshotNotDirectory(PathBuf),

    /// Insufficient privileges for mount operations.
    #[error("insufficient privileges for overlay mount: {0}")]
    PermissionDenied(String),

    /// The mount syscall failed.
    #[error("overlay mount failed: {0}")]
    MountFailed(String),

    /// Unmounting failed after the full escalation ladder.
    #[error("overlay unmount failed for {}: {reason}", .path.display())]
    UnmountFailed { path: PathBuf, reason: String },

    /// An overlay is already registered for this container.
    #[error("overlay already exists for container: {0}")]
    OverlayExists(String),

    /// No overlay is registered for this container.
    #[error("overlay not found for container: {0}")]
    OverlayNotFound(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A required configuration field is missing or invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Cancellation
    // =========================================================================
    /// The operation was canceled via its cancellation token.
    #[error("operation canceled: {0}")]
    Canceled(String),

    // =========================================================================
    // Transport / I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
