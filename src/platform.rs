//! # Platform Mount Backends
//!
//! Union-mount syscalls and mount-table inspection, segregated behind the
//! [`MountBackend`] trait so the overlay manager stays portable.
//!
//! ## Backends
//!
//! | Backend | Platform | Behavior |
//! |---------|----------|----------|
//! | [`OverlayFs`] | Linux | Real overlayfs mounts via the mount syscall |
//! | [`Unsupported`] | everywhere else | `mount` fails with [`Error::OverlayNotSupported`] |
//!
//! Both backends are selected at compile time through [`default_backend`];
//! tests inject their own [`MountBackend`] implementations to exercise the
//! manager without privileges.
//!
//! ## Unmount Escalation
//!
//! Mount points can be held open by lingering container processes, so
//! unmounting escalates:
//!
//! 1. Skip entirely if the target is not in the kernel mount table.
//! 2. Normal unmount.
//! 3. Lazy (detached) unmount, then let the kernel settle.
//! 4. Kill processes holding the mount point open (best-effort).
//! 5. Force-and-lazy unmount; failure here is final.

use crate::error::{Error, Result};
use crate::overlay::OverlayMount;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Union-mount operations abstracted over platforms.
///
/// Implementations must be cheap to call concurrently; the overlay manager
/// invokes them while holding its registry lock.
#[async_trait]
pub trait MountBackend: Send + Sync + std::fmt::Debug {
    /// Mounts the overlay described by `mount` onto `mount.merged_dir`.
    async fn mount(&self, mount: &OverlayMount) -> Result<()>;

    /// Unmounts `mount.merged_dir`, escalating as needed. Returns `Ok` if
    /// the target is not mounted.
    async fn unmount(&self, mount: &OverlayMount) -> Result<()>;

    /// Reports whether `path` appears in the kernel mount table. Returns
    /// false on any read error so directory cleanup can still proceed.
    fn is_mount_point(&self, path: &Path) -> bool;
}

/// Returns the mount backend for the current platform.
pub fn default_backend() -> Arc<dyn MountBackend> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(OverlayFs)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(Unsupported)
    }
}

// =============================================================================
// Linux overlayfs backend
// =============================================================================

/// Overlayfs mounts through the Linux mount syscall.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct OverlayFs;

#[cfg(target_os = "linux")]
#[async_trait]
impl MountBackend for OverlayFs {
    async fn mount(&self, mount: &OverlayMount) -> Result<()> {
        use nix::errno::Errno;
        use nix::mount::MsFlags;
        use tracing::debug;

        // redirect_dir enables efficient directory renames across layers.
        let options = format!(
            "lowerdir={},upperdir={},workdir={},redirect_dir=on",
            mount.lower_dir.display(),
            mount.upper_dir.display(),
            mount.work_dir.display()
        );
        debug!("mounting overlay at {} ({options})", mount.merged_dir.display());

        nix::mount::mount(
            Some("overlay"),
            &mount.merged_dir,
            Some("overlay"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .map_err(|errno| match errno {
            Errno::EPERM | Errno::EACCES => Error::PermissionDenied(errno.desc().to_string()),
            errno => Error::MountFailed(format!("{}: {errno}", mount.merged_dir.display())),
        })
    }

    async fn unmount(&self, mount: &OverlayMount) -> Result<()> {
        use crate::constants::{KILL_PROCESS_SETTLE, LAZY_UNMOUNT_SETTLE};
        use nix::mount::MntFlags;
        use tracing::{debug, warn};

        let target = &mount.merged_dir;

        if !self.is_mount_point(target) {
            debug!("{} is not mounted, skipping unmount", target.display());
            return Ok(());
        }

        debug!("attempting normal unmount of {}", target.display());
        if nix::mount::umount(target).is_ok() {
            return Ok(());
        }

        debug!("attempting lazy unmount of {}", target.display());
        if nix::mount::umount2(target, MntFlags::MNT_DETACH).is_ok() {
            // Give the kernel time to actually detach the filesystem.
            tokio::time::sleep(LAZY_UNMOUNT_SETTLE).await;
            return Ok(());
        }

        warn!("killing processes holding {} open", target.display());
        kill_mount_users(target).await;
        tokio::time::sleep(KILL_PROCESS_SETTLE).await;

        debug!("attempting force unmount of {}", target.display());
        nix::mount::umount2(target, MntFlags::MNT_FORCE | MntFlags::MNT_DETACH).map_err(|errno| {
            Error::UnmountFailed {
                path: target.clone(),
                reason: errno.desc().to_string(),
            }
        })
    }

    fn is_mount_point(&self, path: &Path) -> bool {
        proc_mounts_contains(path).unwrap_or(false)
    }
}

/// Checks the kernel mount table for an exact mount-point match.
#[cfg(target_os = "linux")]
fn proc_mounts_contains(path: &Path) -> std::io::Result<bool> {
    let table = std::fs::read_to_string("/proc/mounts")?;
    let needle = path.to_string_lossy();
    Ok(table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| mount_point == needle))
}

/// Kills processes using a mount point via `fuser -km`. Best-effort: a
/// missing binary or lingering process is logged, never propagated.
#[cfg(target_os = "linux")]
async fn kill_mount_users(path: &Path) {
    use tracing::debug;

    match tokio::process::Command::new("fuser")
        .arg("-km")
        .arg(path)
        .output()
        .await
    {
        // fuser exits non-zero when no processes were found; that is fine.
        Ok(output) => debug!("fuser exited with {} for {}", output.status, path.display()),
        Err(err) => debug!("failed to run fuser for {}: {err}", path.display()),
    }
}

// =============================================================================
// Non-supporting platform stub
// =============================================================================

/// Stub backend for platforms without union-mount support.
///
/// `mount` fails, `is_mount_point` is always false, and `unmount` succeeds
/// so orphaned directory trees can still be cleaned up.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

#[async_trait]
impl MountBackend for Unsupported {
    async fn mount(&self, _mount: &OverlayMount) -> Result<()> {
        Err(Error::OverlayNotSupported(
            "overlay mounts require Linux".to_string(),
        ))
    }

    async fn unmount(&self, _mount: &OverlayMount) -> Result<()> {
        Ok(())
    }

    fn is_mount_point(&self, _path: &Path) -> bool {
        false
    }
}
