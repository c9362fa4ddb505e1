//! # Resumable HTTP Downloader
//!
//! Streams a remote resource to a local file, resuming interrupted
//! downloads with `Range` requests.
//!
//! ## Resume Protocol
//!
//! If the destination file already exists with non-zero size, the request
//! carries `Range: bytes=N-` where `N` is the existing size. The response
//! status decides what happens next:
//!
//! | Status | Behavior |
//! |--------|----------|
//! | 200    | Server sent the full body; truncate and start over |
//! | 206    | Append the body; expected total = existing + `Content-Length` |
//! | 416    | Delete the local file and retry once from scratch |
//! | other  | [`Error::DownloadHttp`] |
//!
//! A second 416 after the retry is a hard error. There is no built-in retry
//! on transport failures; the partial file is preserved so the next call
//! can resume.
//!
//! ## Cancellation
//!
//! The cancellation token is honored at every chunk boundary. A canceled
//! download leaves the partial file intact for later resumption.

use crate::constants::PROGRESS_INTERVAL;
use crate::error::{Error, Result};
use reqwest::{header, StatusCode};
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Downloads `url` to `dest`, resuming a partial file if one exists.
///
/// Returns the total number of bytes on disk after completion.
pub async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<u64> {
    match download_once(client, url, dest, cancel).await {
        Err(Error::DownloadHttp { status: 416, .. }) => {
            // The server rejected our resume offset. Start over, once.
            warn!("range not satisfiable for {url}, restarting download from scratch");
            if let Err(err) = tokio::fs::remove_file(dest).await
                && err.kind() != std::io::ErrorKind::NotFound
            {
                return Err(err.into());
            }
            download_once(client, url, dest, cancel).await
        }
        other => other,
    }
}

async fn download_once(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<u64> {
    let existing = match tokio::fs::metadata(dest).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    let mut request = client.get(url);
    if existing > 0 {
        request = request.header(header::RANGE, format!("bytes={existing}-"));
        info!(
            "resuming download of {url} from {} MB",
            existing / (1024 * 1024)
        );
    }

    let mut response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Canceled(format!("download of {url}"))),
        response = request.send() => response?,
    };

    let status = response.status();
    let (mut out, mut downloaded, total) = match status {
        StatusCode::OK => {
            // Full body, either because no partial file existed or because
            // the server ignored the range request.
            if existing > 0 {
                info!("server sent full body for {url}, overwriting partial file");
            }
            let out = tokio::fs::File::create(dest).await?;
            (out, 0u64, response.content_length())
        }
        StatusCode::PARTIAL_CONTENT => {
            let out = tokio::fs::OpenOptions::new().append(true).open(dest).await?;
            let total = response.content_length().map(|remaining| existing + remaining);
            info!(
                "resume accepted for {url}: {} MB existing, {} MB remaining",
                existing / (1024 * 1024),
                response.content_length().unwrap_or(0) / (1024 * 1024)
            );
            (out, existing, total)
        }
        status => {
            return Err(Error::DownloadHttp {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
    };

    let mut progress = Progress::new(total);
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Keep what we have; the next call resumes from here.
                out.flush().await?;
                return Err(Error::Canceled(format!("download of {url}")));
            }
            chunk = response.chunk() => chunk?,
        };
        let Some(chunk) = chunk else { break };
        out.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        progress.report(downloaded);
    }
    out.flush().await?;

    info!("download complete: {downloaded} bytes on disk for {url}");
    Ok(downloaded)
}

/// Rate-limited progress reporting for large downloads.
struct Progress {
    total: Option<u64>,
    last_report: Instant,
}

impl Progress {
    fn new(total: Option<u64>) -> Self {
        Self {
            total,
            last_report: Instant::now(),
        }
    }

    fn report(&mut self, downloaded: u64) {
        if self.last_report.elapsed() < PROGRESS_INTERVAL {
            return;
        }
        self.last_report = Instant::now();
        match self.total {
            Some(total) if total > 0 => {
                let pct = downloaded as f64 / total as f64 * 100.0;
                info!(
                    "download progress: {pct:.1}% ({} / {} MB)",
                    downloaded / (1024 * 1024),
                    total / (1024 * 1024)
                );
            }
            _ => {
                info!("download progress: {} MB", downloaded / (1024 * 1024));
            }
        }
    }
}
