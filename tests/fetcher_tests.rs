//! Tests for the snapshot fetcher.
//!
//! Covers the cache fast path, fresh fetches, download resumption,
//! latest-block resolution, and recovery from failed extractions, all
//! against a mock snapshot registry.

use hivesnap::{CacheLayout, Error, FetchConfig, SnapshotFetcher, SnapshotId};
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

fn config(network: &str, client: &str, block: Option<&str>, base_url: &str) -> FetchConfig {
    FetchConfig {
        network: network.to_string(),
        client: client.to_string(),
        block: block.map(str::to_string),
        base_url: Some(base_url.to_string()),
        cache_dir: None,
    }
}

// =============================================================================
// Cache Hit Tests
// =============================================================================

#[tokio::test]
async fn test_complete_entry_is_served_without_network_io() {
    let temp = TempDir::new().unwrap();
    let layout = CacheLayout::new(temp.path());
    let id = SnapshotId::normalized("mainnet", "geth", "12345");

    std::fs::create_dir_all(layout.data_dir(&id)).unwrap();
    std::fs::write(layout.data_dir(&id).join("chaindata"), b"state").unwrap();
    std::fs::write(layout.marker_path(&id), "2026-08-02T00:00:00Z").unwrap();

    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));

    // An unroutable base URL proves the fast path makes no HTTP calls.
    let path = fetcher
        .ensure(
            &config("mainnet", "geth", Some("12345"), "http://127.0.0.1:1"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(path, layout.data_dir(&id));
}

#[tokio::test]
async fn test_repeated_ensure_downloads_once() {
    let mut server = mockito::Server::new_async().await;
    let archive = server
        .mock("GET", "/mainnet/geth/100/snapshot.tar.zst")
        .with_status(200)
        .with_body(make_archive(&[("chaindata", b"state")]))
        .expect(1)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));
    let cfg = config("mainnet", "geth", Some("100"), &server.url());
    let cancel = CancellationToken::new();

    let first = fetcher.ensure(&cfg, &cancel).await.unwrap();
    let second = fetcher.ensure(&cfg, &cancel).await.unwrap();

    assert_eq!(first, second);
    archive.assert_async().await;
}

// =============================================================================
// Fresh Fetch Tests
// =============================================================================

#[tokio::test]
async fn test_fresh_fetch_downloads_extracts_and_marks_complete() {
    let entries: Vec<(String, Vec<u8>)> = (0..10)
        .map(|i| (format!("file{i}"), format!("payload {i}").into_bytes()))
        .collect();
    let borrowed: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect();

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/mainnet/geth/100/snapshot.tar.zst")
        .with_status(200)
        .with_body(make_archive(&borrowed))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let layout = CacheLayout::new(temp.path());
    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));

    let path = fetcher
        .ensure(
            &config("mainnet", "geth", Some("100"), &server.url()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let id = SnapshotId::normalized("mainnet", "geth", "100");
    assert_eq!(path, layout.data_dir(&id));
    for (name, data) in &entries {
        assert_eq!(&std::fs::read(path.join(name)).unwrap(), data);
    }
    assert!(layout.marker_path(&id).exists(), ".complete must exist");
    assert!(
        !layout.archive_path(&id).exists(),
        "the archive is removed after extraction"
    );
    assert!(layout.metadata_path(&id).exists(), "metadata is written");

    // The cached entry is now visible through the probe as well.
    assert_eq!(fetcher.cached_path(&id), Some(layout.data_dir(&id)));
}

// =============================================================================
// Resume Tests
// =============================================================================

#[tokio::test]
async fn test_interrupted_download_resumes_with_range_request() {
    let archive_bytes = make_archive(&[("chaindata", &[0xabu8; 4096][..])]);
    let split = archive_bytes.len() / 2;

    let mut server = mockito::Server::new_async().await;
    let resumed = server
        .mock("GET", "/mainnet/geth/100/snapshot.tar.zst")
        .match_header("range", format!("bytes={split}-").as_str())
        .with_status(206)
        .with_body(&archive_bytes[split..])
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let layout = CacheLayout::new(temp.path());
    let id = SnapshotId::normalized("mainnet", "geth", "100");

    // Simulate a previous run that died mid-download.
    std::fs::create_dir_all(layout.entry_dir(&id)).unwrap();
    std::fs::write(layout.archive_path(&id), &archive_bytes[..split]).unwrap();

    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));
    let path = fetcher
        .ensure(
            &config("mainnet", "geth", Some("100"), &server.url()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(path.join("chaindata")).unwrap(), vec![0xabu8; 4096]);
    resumed.assert_async().await;
}

// =============================================================================
// Latest Resolution Tests
// =============================================================================

#[tokio::test]
async fn test_latest_resolves_to_concrete_block_and_caches_under_it() {
    let mut server = mockito::Server::new_async().await;
    let latest = server
        .mock("GET", "/mainnet/geth/latest")
        .with_status(200)
        .with_body("200\n")
        .expect(1)
        .create_async()
        .await;
    let archive = server
        .mock("GET", "/mainnet/geth/200/snapshot.tar.zst")
        .with_status(200)
        .with_body(make_archive(&[("chaindata", b"state")]))
        .expect(1)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let layout = CacheLayout::new(temp.path());
    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));
    let cancel = CancellationToken::new();

    let path = fetcher
        .ensure(&config("mainnet", "geth", None, &server.url()), &cancel)
        .await
        .unwrap();

    let resolved = SnapshotId::normalized("mainnet", "geth", "200");
    assert_eq!(path, layout.data_dir(&resolved));

    // Asking for the concrete block afterwards is a pure cache hit.
    let hit = fetcher
        .ensure(&config("mainnet", "geth", Some("200"), &server.url()), &cancel)
        .await
        .unwrap();
    assert_eq!(hit, path);

    latest.assert_async().await;
    archive.assert_async().await;
}

#[tokio::test]
async fn test_unresolvable_latest_fails() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/mainnet/geth/latest")
        .with_status(404)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));

    let result = fetcher
        .ensure(
            &config("mainnet", "geth", None, &server.url()),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(Error::ResolveLatestFailed { .. })));
}

#[tokio::test]
async fn test_empty_latest_response_fails() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/mainnet/geth/latest")
        .with_status(200)
        .with_body("\n")
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));

    let result = fetcher
        .ensure(
            &config("mainnet", "geth", None, &server.url()),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(Error::ResolveLatestFailed { .. })));
}

// =============================================================================
// Failure Recovery Tests
// =============================================================================

#[tokio::test]
async fn test_failed_extraction_keeps_archive_and_removes_data() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/mainnet/geth/100/snapshot.tar.zst")
        .with_status(200)
        .with_body("definitely not a zstd archive")
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let layout = CacheLayout::new(temp.path());
    let id = SnapshotId::normalized("mainnet", "geth", "100");
    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));

    let result = fetcher
        .ensure(
            &config("mainnet", "geth", Some("100"), &server.url()),
            &CancellationToken::new(),
        )
        .await;

    assert!(result.is_err());
    assert!(
        layout.archive_path(&id).exists(),
        "the archive is preserved for retry"
    );
    assert!(!layout.data_dir(&id).exists(), "partial data/ is removed");
    assert!(!layout.marker_path(&id).exists(), "no marker after failure");
    assert_eq!(fetcher.cached_path(&id), None);
}

#[tokio::test]
async fn test_download_error_preserves_cache_entry_for_retry() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/mainnet/geth/100/snapshot.tar.zst")
        .with_status(503)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let layout = CacheLayout::new(temp.path());
    let id = SnapshotId::normalized("mainnet", "geth", "100");
    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));

    let result = fetcher
        .ensure(
            &config("mainnet", "geth", Some("100"), &server.url()),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(Error::DownloadHttp { status: 503, .. })));
    assert!(!layout.marker_path(&id).exists());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[tokio::test]
async fn test_concurrent_ensures_share_one_download() {
    let mut server = mockito::Server::new_async().await;
    let archive = server
        .mock("GET", "/mainnet/geth/100/snapshot.tar.zst")
        .with_status(200)
        .with_body(make_archive(&[("chaindata", b"state")]))
        .expect(1)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = std::sync::Arc::new(SnapshotFetcher::with_layout(CacheLayout::new(temp.path())));
    let cfg = config("mainnet", "geth", Some("100"), &server.url());
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(fetcher.ensure(&cfg, &cancel), fetcher.ensure(&cfg, &cancel));

    assert_eq!(a.unwrap(), b.unwrap());
    archive.assert_async().await;
}

// =============================================================================
// Normalization Integration Tests
// =============================================================================

#[tokio::test]
async fn test_harness_client_names_hit_registry_names() {
    let mut server = mockito::Server::new_async().await;
    let archive = server
        .mock("GET", "/mainnet/geth/100/snapshot.tar.zst")
        .with_status(200)
        .with_body(make_archive(&[("chaindata", b"state")]))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = SnapshotFetcher::with_layout(CacheLayout::new(temp.path()));

    // The harness knows this client as "go-ethereum_default".
    let path = fetcher
        .ensure(
            &config("Mainnet", "go-ethereum_default", Some("100"), &server.url()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let id = SnapshotId::normalized("mainnet", "geth", "100");
    assert_eq!(path, CacheLayout::new(temp.path()).data_dir(&id));
    archive.assert_async().await;
}
