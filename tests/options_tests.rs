//! Tests for the container start-option surface.

use hivesnap::{CacheLayout, ClientSnapshotConfig, OverlaySpec, SnapshotFetcher, SnapshotId};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Builds a tar.zst archive containing the given entries.
fn make_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.finish().unwrap();
    }
    zstd::encode_all(&tar_bytes[..], 3).unwrap()
}

// =============================================================================
// Wire Format Tests
// =============================================================================

#[test]
fn test_overlay_spec_parses_harness_json() {
    let json = r#"{
        "network": "mainnet",
        "client": "geth",
        "block": "12345",
        "containerPath": "/data"
    }"#;

    let spec: OverlaySpec = serde_json::from_str(json).unwrap();
    assert_eq!(spec, OverlaySpec::remote_at("mainnet", "geth", "12345", "/data"));
}

#[test]
fn test_local_overlay_spec_parses_harness_json() {
    let json = r#"{"snapshotPath": "/srv/snap", "containerPath": "/chain"}"#;

    let spec: OverlaySpec = serde_json::from_str(json).unwrap();
    assert_eq!(spec, OverlaySpec::local("/srv/snap", "/chain"));
    assert_eq!(spec.container_path(), "/chain");
}

#[test]
fn test_client_snapshot_config_parses_client_config_entry() {
    let json = r#"{"network": "hoodi", "block": "999", "path": "/db", "cache_dir": "/var/cache"}"#;

    let config: ClientSnapshotConfig = serde_json::from_str(json).unwrap();
    assert!(config.is_configured());
    assert_eq!(config.network, "hoodi");
    assert_eq!(config.block_number.as_deref(), Some("999"));
    assert_eq!(config.container_path(), "/db");
    assert_eq!(config.cache_dir.as_deref(), Some(std::path::Path::new("/var/cache")));
}

// =============================================================================
// Resolution Tests
// =============================================================================

#[tokio::test]
async fn test_remote_spec_resolves_through_the_fetcher() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/mainnet/geth/100/snapshot.tar.zst")
        .with_status(200)
        .with_body(make_archive(&[("chaindata", b"state")]))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let layout = CacheLayout::new(temp.path());
    let fetcher =
        SnapshotFetcher::with_layout(CacheLayout::new(temp.path())).with_base_url(server.url());

    // The spec leaves the client unset; the started client fills it in.
    let spec = OverlaySpec {
        network: Some("mainnet".to_string()),
        block_number: Some("100".to_string()),
        ..Default::default()
    };
    let path = spec
        .resolve(&fetcher, "go-ethereum", &CancellationToken::new())
        .await
        .unwrap();

    let id = SnapshotId::normalized("mainnet", "geth", "100");
    assert_eq!(path, layout.data_dir(&id));
}

#[tokio::test]
async fn test_client_snapshot_config_resolves_with_cache_override() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/sepolia/reth/7/snapshot.tar.zst")
        .with_status(200)
        .with_body(make_archive(&[("chaindata", b"state")]))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let cache_override = temp.path().join("custom-cache");

    // The fetcher's own layout points elsewhere; the config wins.
    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path().join("default-cache")))
        .with_base_url(server.url());

    let config = ClientSnapshotConfig {
        network: "sepolia".to_string(),
        block_number: Some("7".to_string()),
        cache_dir: Some(cache_override.clone()),
        ..Default::default()
    };

    let path = config
        .resolve(&fetcher, "reth", &CancellationToken::new())
        .await
        .unwrap();

    let id = SnapshotId::normalized("sepolia", "reth", "7");
    assert_eq!(path, CacheLayout::new(&cache_override).data_dir(&id));
    assert!(path.starts_with(&cache_override));
}
