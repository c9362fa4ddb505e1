//! # Snapshot Archive Extraction
//!
//! Streams a `.tar.zst` archive into a destination directory.
//!
//! ## Strategies
//!
//! Two strategies exist, tried in order:
//!
//! 1. **System pipeline** - `zstd -d -c <archive> | tar -x -C <dest>` when
//!    both utilities are on `PATH`. Decompression runs in a separate
//!    process, which keeps memory flat and lets `zstd` use its own worker
//!    threads.
//! 2. **In-process decoder** - a streaming [`zstd`] decoder feeding a
//!    [`tar`] archive reader, entry by entry. Compiled behind the
//!    default-on `zstd-decoder` feature.
//!
//! Neither strategy ever holds the whole archive (or a whole entry) in
//! memory. With the feature disabled and no system tools installed,
//! extraction fails with [`Error::ExtractorUnavailable`] naming what to
//! install.
//!
//! ## Failure Handling
//!
//! On any failure the destination directory is left as-is; the caller
//! owns removing partial output. The archive is never touched.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Extracts a `.tar.zst` archive into `dest`.
///
/// `dest` must already exist. Partially written files are left in place on
/// failure; the caller decides whether to remove them.
pub async fn extract(archive: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Canceled(format!("extraction of {}", archive.display())));
    }

    if find_in_path("zstd").is_some() && find_in_path("tar").is_some() {
        info!("extracting {} with system zstd pipeline", archive.display());
        extract_with_pipeline(archive, dest, cancel).await
    } else {
        extract_in_process(archive, dest, cancel).await
    }
}

/// Searches `PATH` for an executable.
fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Runs `zstd -d -c <archive> | tar -x -C <dest>`.
async fn extract_with_pipeline(
    archive: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    use std::process::Stdio;
    use tokio::process::Command;

    let mut zstd = Command::new("zstd")
        .args(["-d", "-c"])
        .arg(archive)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let zstd_stdout = zstd.stdout.take().ok_or_else(|| Error::ExtractFailed {
        archive: archive.to_path_buf(),
        reason: "failed to capture zstd stdout".to_string(),
    })?;
    let pipe: Stdio = zstd_stdout.try_into()?;

    let mut tar = Command::new("tar")
        .args(["-x", "-f", "-", "-C"])
        .arg(dest)
        .stdin(pipe)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut zstd_stderr = zstd.stderr.take();
    let mut tar_stderr = tar.stderr.take();

    let statuses = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        statuses = async {
            let zstd_status = zstd.wait().await;
            let tar_status = tar.wait().await;
            (zstd_status, tar_status)
        } => Some(statuses),
    };
    let Some((zstd_status, tar_status)) = statuses else {
        let _ = zstd.start_kill();
        let _ = tar.start_kill();
        return Err(Error::Canceled(format!("extraction of {}", archive.display())));
    };
    let (zstd_status, tar_status) = (zstd_status?, tar_status?);

    if !zstd_status.success() || !tar_status.success() {
        let mut reason = format!("pipeline failed (zstd: {zstd_status}, tar: {tar_status})");
        for stderr in [&mut zstd_stderr, &mut tar_stderr] {
            if let Some(stderr) = stderr {
                use tokio::io::AsyncReadExt;
                let mut output = String::new();
                let _ = stderr.read_to_string(&mut output).await;
                let output = output.trim();
                if !output.is_empty() {
                    reason.push_str(": ");
                    reason.push_str(output);
                }
            }
        }
        return Err(Error::ExtractFailed {
            archive: archive.to_path_buf(),
            reason,
        });
    }

    debug!("extraction pipeline finished for {}", archive.display());
    Ok(())
}

/// Streams the archive through the in-process zstd decoder into tar.
#[cfg(feature = "zstd-decoder")]
async fn extract_in_process(archive: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()> {
    info!("extracting {} with in-process decoder", archive.display());

    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let cancel = cancel.clone();
    let task_archive = archive.clone();

    tokio::task::spawn_blocking(move || {
        let failed = |reason: String| Error::ExtractFailed {
            archive: archive.clone(),
            reason,
        };

        let file = std::fs::File::open(&archive)?;
        let decoder = zstd::stream::read::Decoder::new(file)
            .map_err(|err| failed(format!("failed to open zstd stream: {err}")))?;
        let mut tar = tar::Archive::new(decoder);
        tar.set_preserve_permissions(true);

        let entries = tar
            .entries()
            .map_err(|err| failed(format!("failed to read tar stream: {err}")))?;
        for entry in entries {
            if cancel.is_cancelled() {
                return Err(Error::Canceled(format!(
                    "extraction of {}",
                    archive.display()
                )));
            }
            let mut entry = entry.map_err(|err| failed(format!("corrupt tar entry: {err}")))?;
            entry
                .unpack_in(&dest)
                .map_err(|err| failed(format!("failed to unpack entry: {err}")))?;
        }
        Ok(())
    })
    .await
    .map_err(|err| Error::ExtractFailed {
        archive: task_archive,
        reason: format!("extraction task failed: {err}"),
    })?
}

#[cfg(not(feature = "zstd-decoder"))]
async fn extract_in_process(_archive: &Path, _dest: &Path, _cancel: &CancellationToken) -> Result<()> {
    Err(Error::ExtractorUnavailable(
        "install the `zstd` and `tar` utilities (e.g. `apt-get install zstd tar`), \
         or build with the `zstd-decoder` feature enabled"
            .to_string(),
    ))
}
