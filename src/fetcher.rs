//! # Snapshot Fetcher
//!
//! Resolves a snapshot identifier to a cached on-disk directory,
//! downloading and extracting the remote archive when necessary.
//!
//! ## Ensure Algorithm
//!
//! ```text
//! ensure(config)
//!   ├── normalize identifier, derive cache paths
//!   ├── .complete exists?  ──yes──▶ return data/        (zero network I/O)
//!   ├── block == "latest"? ──yes──▶ resolve to concrete block, re-check
//!   ├── lock per-identifier mutex, re-check .complete
//!   ├── download archive           (resumable, partial preserved)
//!   ├── extract into data/         (on failure: remove data/, keep archive)
//!   ├── remove archive, write .complete
//!   └── return data/
//! ```
//!
//! Every step is idempotent: a crashed or canceled `ensure` resumes from
//! the furthest-advanced on-disk state on the next call. The fetcher never
//! retries internally; callers decide when to re-invoke.
//!
//! ## Concurrency
//!
//! Concurrent `ensure` calls for the same identifier are serialized on a
//! keyed mutex so that only one download runs per archive path. Calls for
//! different identifiers proceed in parallel.

use crate::constants::{DEFAULT_BASE_URL, LATEST_RESPONSE_LIMIT};
use crate::download;
use crate::error::{Error, Result};
use crate::extract;
use crate::layout::{archive_url, latest_url, CacheLayout, SnapshotId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Snapshot fetch request.
///
/// `network` and `client` are required; everything else has defaults.
#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    /// Network name (e.g. "mainnet", "sepolia", "hoodi").
    pub network: String,
    /// Execution client name (e.g. "geth", "nethermind").
    pub client: String,
    /// Block number. `None` fetches the latest published snapshot.
    pub block: Option<String>,
    /// Base URL override for the snapshot registry.
    pub base_url: Option<String>,
    /// Cache directory override.
    pub cache_dir: Option<PathBuf>,
}

/// Informational record written next to the completion marker.
///
/// Kept separate from the marker so a missing or corrupt metadata file can
/// never block a cache hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub network: String,
    pub client: String,
    pub block_number: String,
    pub local_path: PathBuf,
    pub fetched_at: String,
}

/// Downloads and caches snapshots on the host.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
#[derive(Debug)]
pub struct SnapshotFetcher {
    layout: CacheLayout,
    base_url: String,
    http: reqwest::Client,
    /// Per-identifier locks serializing concurrent fetches of one entry.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SnapshotFetcher {
    /// Creates a fetcher with the environment-derived cache layout and the
    /// default registry URL.
    pub fn new() -> Self {
        Self::with_layout(CacheLayout::from_env())
    }

    /// Creates a fetcher with an explicit cache layout.
    pub fn with_layout(layout: CacheLayout) -> Self {
        Self {
            layout,
            base_url: DEFAULT_BASE_URL.to_string(),
            // No timeout: snapshot archives are multi-gigabyte.
            http: reqwest::Client::new(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the default registry base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Ensures a snapshot is available locally, downloading if needed.
    ///
    /// Returns the path of the extracted snapshot directory.
    pub async fn ensure(&self, config: &FetchConfig, cancel: &CancellationToken) -> Result<PathBuf> {
        if config.network.is_empty() {
            return Err(Error::InvalidConfig("network is required".to_string()));
        }
        if config.client.is_empty() {
            return Err(Error::InvalidConfig("client is required".to_string()));
        }

        let id = SnapshotId::normalized(
            &config.network,
            &config.client,
            config.block.as_deref().unwrap_or(""),
        );
        let base_url = config.base_url.as_deref().unwrap_or(&self.base_url);
        let layout = match &config.cache_dir {
            Some(dir) => CacheLayout::new(dir.clone()),
            None => self.layout.clone(),
        };

        // Fast path: the entry may already be complete.
        if layout.is_complete(&id) {
            info!("using cached snapshot {id}");
            return Ok(layout.data_dir(&id));
        }

        // Pin "latest" to a concrete block; the concrete entry may itself
        // already be cached.
        let id = if id.is_latest() {
            let block = self.resolve_latest(base_url, &id, cancel).await?;
            info!("resolved latest snapshot block for {}/{}: {block}", id.network, id.client);
            id.with_block(block)
        } else {
            id
        };

        let guard = self.entry_lock(&layout, &id);
        let _held = guard.lock().await;

        if layout.is_complete(&id) {
            info!("using cached snapshot {id}");
            return Ok(layout.data_dir(&id));
        }

        self.fetch_into_cache(base_url, &layout, &id, cancel).await?;
        Ok(layout.data_dir(&id))
    }

    /// Returns the cached data directory for an identifier, or `None` if
    /// the entry is absent or incomplete. Performs no I/O beyond a stat.
    pub fn cached_path(&self, id: &SnapshotId) -> Option<PathBuf> {
        if self.layout.is_complete(id) {
            Some(self.layout.data_dir(id))
        } else {
            None
        }
    }

    /// Returns the lock serializing fetches of one cache entry.
    fn entry_lock(&self, layout: &CacheLayout, id: &SnapshotId) -> Arc<tokio::sync::Mutex<()>> {
        let key = format!("{}|{}", layout.root().display(), id.cache_key());
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight.entry(key).or_default().clone()
    }

    /// Resolves the floating "latest" block to a concrete block number by
    /// reading the first bytes of the registry's `latest` endpoint.
    async fn resolve_latest(
        &self,
        base_url: &str,
        id: &SnapshotId,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let url = latest_url(base_url, id);
        let resolve_failed = |reason: String| Error::ResolveLatestFailed {
            network: id.network.clone(),
            client: id.client.clone(),
            reason,
        };

        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Canceled(format!("resolution of {url}"))),
            response = self.http.get(&url).send() => response?,
        };
        if !response.status().is_success() {
            return Err(resolve_failed(format!("HTTP {}", response.status().as_u16())));
        }

        let mut buf: Vec<u8> = Vec::with_capacity(LATEST_RESPONSE_LIMIT);
        while buf.len() < LATEST_RESPONSE_LIMIT {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Canceled(format!("resolution of {url}"))),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else { break };
            let take = (LATEST_RESPONSE_LIMIT - buf.len()).min(chunk.len());
            buf.extend_from_slice(&chunk[..take]);
        }

        let block = String::from_utf8_lossy(&buf).trim().to_string();
        if block.is_empty() {
            return Err(resolve_failed("empty response from latest endpoint".to_string()));
        }
        Ok(block)
    }

    /// Downloads, extracts, and marks one cache entry complete.
    async fn fetch_into_cache(
        &self,
        base_url: &str,
        layout: &CacheLayout,
        id: &SnapshotId,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let entry_dir = layout.entry_dir(id);
        tokio::fs::create_dir_all(&entry_dir).await?;

        let archive_path = layout.archive_path(id);
        let url = archive_url(base_url, id);
        match tokio::fs::metadata(&archive_path).await {
            Ok(meta) if meta.len() > 0 => {
                info!(
                    "found existing archive for {id} ({} MB), resuming",
                    meta.len() / (1024 * 1024)
                );
            }
            _ => info!("downloading snapshot {id} from {url}"),
        }

        // A failed or canceled download keeps the partial archive so the
        // next call can resume.
        download::download_to(&self.http, &url, &archive_path, cancel).await?;

        let data_dir = layout.data_dir(id);
        tokio::fs::create_dir_all(&data_dir).await?;
        info!("extracting snapshot {id}");
        if let Err(err) = extract::extract(&archive_path, &data_dir, cancel).await {
            // Partial extractions are unusable; the archive stays for retry.
            let _ = tokio::fs::remove_dir_all(&data_dir).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::remove_file(&archive_path).await {
            warn!("failed to remove extracted archive {}: {err}", archive_path.display());
        }

        tokio::fs::write(layout.marker_path(id), Utc::now().to_rfc3339()).await?;

        let metadata = SnapshotMetadata {
            network: id.network.clone(),
            client: id.client.clone(),
            block_number: id.block.clone(),
            local_path: data_dir.clone(),
            fetched_at: Utc::now().to_rfc3339(),
        };
        if let Err(err) = self.write_metadata(layout, id, &metadata).await {
            warn!("failed to write snapshot metadata for {id}: {err}");
        }

        info!("snapshot {id} ready at {}", data_dir.display());
        Ok(())
    }

    async fn write_metadata(
        &self,
        layout: &CacheLayout,
        id: &SnapshotId,
        metadata: &SnapshotMetadata,
    ) -> Result<()> {
        let data = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(layout.metadata_path(id), data).await?;
        Ok(())
    }
}

impl Default for SnapshotFetcher {
    fn default() -> Self {
        Self::new()
    }
}
