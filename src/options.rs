//! # Container Start Options
//!
//! Wire shapes through which the harness requests overlay mounts when
//! launching a client container, and their resolution into a host path
//! that the overlay manager can use as a lower directory.
//!
//! ## Request Shapes
//!
//! An [`OverlaySpec`] travels inside the container-launch request. Two
//! ways to name the snapshot:
//!
//! - **Local**: `snapshotPath` points at an existing host directory.
//! - **Remote**: `network` (+ optional `client`, `block`, `url`) selects a
//!   registry snapshot, fetched and cached by the host.
//!
//! Client definitions may carry a default [`ClientSnapshotConfig`]; the
//! harness turns it into an [`OverlaySpec`] when the simulator does not
//! supply one. The container mount path defaults to `/data`.

use crate::constants::DEFAULT_CONTAINER_PATH;
use crate::error::{Error, Result};
use crate::fetcher::{FetchConfig, SnapshotFetcher};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// An overlay mount request attached to a container launch.
///
/// Changes made by the container are discarded when it stops; the snapshot
/// itself is never written to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OverlaySpec {
    /// Host path to the read-only snapshot directory. When set, the remote
    /// fields are ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,

    /// Mount path inside the container. Defaults to `/data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_path: Option<String>,

    /// Network of the remote snapshot (e.g. "mainnet").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Client of the remote snapshot. Defaults to the client being started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    /// Specific block number. Defaults to "latest".
    #[serde(rename = "block", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,

    /// Custom registry base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl OverlaySpec {
    /// Overlay backed by a pre-resolved local snapshot directory.
    pub fn local(snapshot_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            snapshot_path: Some(snapshot_path.into()),
            container_path: Some(container_path.into()),
            ..Default::default()
        }
    }

    /// Overlay backed by the latest registry snapshot for a network/client.
    pub fn remote(
        network: impl Into<String>,
        client: impl Into<String>,
        container_path: impl Into<String>,
    ) -> Self {
        Self {
            network: Some(network.into()),
            client: Some(client.into()),
            container_path: Some(container_path.into()),
            ..Default::default()
        }
    }

    /// Overlay backed by a registry snapshot at a specific block.
    pub fn remote_at(
        network: impl Into<String>,
        client: impl Into<String>,
        block: impl Into<String>,
        container_path: impl Into<String>,
    ) -> Self {
        Self {
            block_number: Some(block.into()),
            ..Self::remote(network, client, container_path)
        }
    }

    /// Overlay backed by a snapshot from a custom registry URL.
    pub fn remote_url(
        network: impl Into<String>,
        client: impl Into<String>,
        base_url: impl Into<String>,
        container_path: impl Into<String>,
    ) -> Self {
        Self {
            url: Some(base_url.into()),
            ..Self::remote(network, client, container_path)
        }
    }

    /// Mount path inside the container, defaulting to `/data`.
    pub fn container_path(&self) -> &str {
        self.container_path
            .as_deref()
            .unwrap_or(DEFAULT_CONTAINER_PATH)
    }

    /// Resolves this spec to a host snapshot directory.
    ///
    /// A local `snapshotPath` is returned as-is; remote specs go through
    /// the fetcher. `fallback_client` names the client being started and is
    /// used when the spec does not pin one.
    pub async fn resolve(
        &self,
        fetcher: &SnapshotFetcher,
        fallback_client: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if let Some(path) = &self.snapshot_path {
            return Ok(path.clone());
        }

        let Some(network) = self.network.as_deref().filter(|n| !n.is_empty()) else {
            return Err(Error::InvalidConfig(
                "overlay spec needs either snapshotPath or a network".to_string(),
            ));
        };
        let client = self
            .client
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(fallback_client);

        fetcher
            .ensure(
                &FetchConfig {
                    network: network.to_string(),
                    client: client.to_string(),
                    block: self.block_number.clone(),
                    base_url: self.url.clone(),
                    cache_dir: None,
                },
                cancel,
            )
            .await
    }
}

/// Default snapshot configuration carried by a client definition.
///
/// Lets `client-config.yaml` opt a client into snapshot-backed startup
/// without every simulator spelling out the details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSnapshotConfig {
    /// Network of the snapshot (e.g. "mainnet", "sepolia", "hoodi").
    pub network: String,

    /// Custom registry base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Specific block number. Defaults to "latest".
    #[serde(rename = "block", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,

    /// Mount path inside the container. Defaults to `/data`.
    #[serde(rename = "path", skip_serializing_if = "Option::is_none")]
    pub container_path: Option<String>,

    /// Cache directory override.
    #[serde(rename = "cache_dir", skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl ClientSnapshotConfig {
    /// Returns true if this configuration selects a snapshot.
    pub fn is_configured(&self) -> bool {
        !self.network.is_empty()
    }

    /// Mount path inside the container, defaulting to `/data`.
    pub fn container_path(&self) -> &str {
        self.container_path
            .as_deref()
            .unwrap_or(DEFAULT_CONTAINER_PATH)
    }

    /// Builds the overlay request for a launch of `client_name`.
    ///
    /// The host maps the harness client name to its registry name.
    pub fn to_overlay_spec(&self, client_name: &str) -> OverlaySpec {
        OverlaySpec {
            network: Some(self.network.clone()),
            client: Some(client_name.to_string()),
            block_number: self.block_number.clone(),
            url: self.url.clone(),
            container_path: Some(self.container_path().to_string()),
            snapshot_path: None,
        }
    }

    /// Resolves this configuration to a host snapshot directory for a
    /// launch of `client_name`, honoring the cache-directory override.
    pub async fn resolve(
        &self,
        fetcher: &SnapshotFetcher,
        client_name: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if !self.is_configured() {
            return Err(Error::InvalidConfig(
                "client snapshot config has no network".to_string(),
            ));
        }
        fetcher
            .ensure(
                &FetchConfig {
                    network: self.network.clone(),
                    client: client_name.to_string(),
                    block: self.block_number.clone(),
                    base_url: self.url.clone(),
                    cache_dir: self.cache_dir.clone(),
                },
                cancel,
            )
            .await
    }
}
