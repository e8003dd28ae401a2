use std::fs;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags};

use crate::container::BindMount;
use crate::syscall::Syscall;
use crate::utils;

use super::device::create_devices;
use super::{Result, RootfsError, RootfsMode};

/// On-disk layout of a container rootfs under its state directory.
#[derive(Debug, Clone)]
pub struct RootfsLayout {
    pub lower: PathBuf,
    pub upper: PathBuf,
    pub work: PathBuf,
    pub merged: PathBuf,
}

impl RootfsLayout {
    pub fn new(rootfs_dir: &Path) -> Self {
        Self {
            lower: rootfs_dir.join("lower"),
            upper: rootfs_dir.join("upper"),
            work: rootfs_dir.join("work"),
            merged: rootfs_dir.join("merged"),
        }
    }
}

/// How the prepared root is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotStrategy {
    PivotRoot,
    /// No mount namespace ownership; `/proc` and `/sys` stay unmounted
    /// and consumers must tolerate their absence.
    Chroot,
}

#[derive(Debug, Clone)]
pub struct PreparedRootfs {
    pub mode: RootfsMode,
    pub strategy: PivotStrategy,
    pub root: PathBuf,
}

pub struct RootfsBuilder<'a> {
    syscall: &'a dyn Syscall,
    layout: RootfsLayout,
    image_root: PathBuf,
    no_overlay: bool,
}

impl<'a> RootfsBuilder<'a> {
    pub fn new(
        syscall: &'a dyn Syscall,
        rootfs_dir: &Path,
        image_root: PathBuf,
        no_overlay: bool,
    ) -> Self {
        Self {
            syscall,
            layout: RootfsLayout::new(rootfs_dir),
            image_root,
            no_overlay,
        }
    }

    pub fn layout(&self) -> &RootfsLayout {
        &self.layout
    }

    /// Builds the merged root. Overlay first; kernels or filesystems that
    /// refuse it degrade to a read-only bind, and a process without mount
    /// privileges degrades further to a plain chroot layout.
    #[tracing::instrument(level = "debug", skip(self), fields(merged = ?self.layout.merged))]
    pub fn prepare(&self) -> Result<PreparedRootfs> {
        for dir in [&self.layout.upper, &self.layout.work, &self.layout.merged] {
            fs::create_dir_all(dir).map_err(|err| RootfsError::Io {
                err,
                path: dir.clone(),
            })?;
        }
        if fs::symlink_metadata(&self.layout.lower).is_err() {
            self.syscall.symlink(&self.image_root, &self.layout.lower)?;
        }

        if !self.no_overlay {
            match self.mount_overlay() {
                Ok(()) => {
                    return Ok(PreparedRootfs {
                        mode: RootfsMode::Overlay,
                        strategy: PivotStrategy::PivotRoot,
                        root: self.layout.merged.clone(),
                    })
                }
                Err(RootfsError::Syscall(err))
                    if matches!(
                        err.errno(),
                        Some(nix::Error::EOPNOTSUPP)
                            | Some(nix::Error::EPERM)
                            | Some(nix::Error::EINVAL)
                    ) =>
                {
                    tracing::warn!(%err, "overlay unavailable, falling back to bind mode");
                }
                Err(err) => return Err(err),
            }
        }

        self.prepare_bind()
    }

    fn mount_overlay(&self) -> Result<()> {
        let data = format!(
            "lowerdir={},upperdir={},workdir={}",
            self.layout.lower.display(),
            self.layout.upper.display(),
            self.layout.work.display()
        );
        self.syscall.mount(
            Some(Path::new("overlay")),
            &self.layout.merged,
            Some("overlay"),
            MsFlags::empty(),
            Some(&data),
        )?;
        Ok(())
    }

    fn prepare_bind(&self) -> Result<PreparedRootfs> {
        match self.syscall.mount(
            Some(&self.image_root),
            &self.layout.merged,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None,
        ) {
            Ok(()) => {
                self.syscall.mount(
                    None,
                    &self.layout.merged,
                    None,
                    MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                    None,
                )?;

                // the image itself is read-only in this mode; give the
                // container somewhere writable
                for writable in ["tmp", "run", "var/tmp"] {
                    let target = self.layout.merged.join(writable);
                    if target.is_dir() {
                        self.syscall.mount(
                            Some(Path::new("tmpfs")),
                            &target,
                            Some("tmpfs"),
                            MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                            Some("mode=1777"),
                        )?;
                    }
                }

                Ok(PreparedRootfs {
                    mode: RootfsMode::Bind,
                    strategy: PivotStrategy::PivotRoot,
                    root: self.layout.merged.clone(),
                })
            }
            Err(err) if err.errno() == Some(nix::Error::EPERM) => {
                tracing::warn!("no mount privileges, falling back to chroot layout");
                let root = match utils::hardlink_copy(&self.image_root, &self.layout.merged) {
                    Ok(()) => self.layout.merged.clone(),
                    Err(err) => {
                        tracing::warn!(%err, "hard-link copy failed, entering image directly");
                        self.image_root.clone()
                    }
                };
                Ok(PreparedRootfs {
                    mode: RootfsMode::Bind,
                    strategy: PivotStrategy::Chroot,
                    root,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Applies user-requested bind volumes onto the merged root. Runs
    /// before the pivot; relative container paths resolve against the
    /// merged root.
    pub fn mount_volumes(&self, mounts: &[BindMount]) -> Result<()> {
        for mount in mounts {
            if !mount.host_path.exists() {
                return Err(RootfsError::BindMissing(mount.host_path.clone()));
            }

            let target = utils::join_rootfs(&self.layout.merged, &mount.container_path);
            if mount.host_path.is_dir() {
                fs::create_dir_all(&target).map_err(|err| RootfsError::Io {
                    err,
                    path: target.clone(),
                })?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|err| RootfsError::Io {
                        err,
                        path: parent.to_owned(),
                    })?;
                }
                if !target.exists() {
                    fs::File::create(&target).map_err(|err| RootfsError::Io {
                        err,
                        path: target.clone(),
                    })?;
                }
            }

            self.syscall.mount(
                Some(&mount.host_path),
                &target,
                None,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None,
            )?;

            if mount.read_only {
                // bind mounts ignore MS_RDONLY on the first mount
                self.syscall.mount(
                    None,
                    &target,
                    None,
                    MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                    None,
                )?;
            }
        }
        Ok(())
    }

    /// Mounts `/proc`, `/sys` and a populated `/dev` under the merged
    /// root. Must not be called for the chroot strategy.
    pub fn mount_special(&self, tty: bool) -> Result<()> {
        let merged = &self.layout.merged;

        let proc = merged.join("proc");
        fs::create_dir_all(&proc).map_err(|err| RootfsError::Io {
            err,
            path: proc.clone(),
        })?;
        self.syscall.mount(
            Some(Path::new("proc")),
            &proc,
            Some("proc"),
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
            None,
        )?;

        let sys = merged.join("sys");
        fs::create_dir_all(&sys).map_err(|err| RootfsError::Io {
            err,
            path: sys.clone(),
        })?;
        if let Err(err) = self.syscall.mount(
            Some(Path::new("sysfs")),
            &sys,
            Some("sysfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_RDONLY,
            None,
        ) {
            // a user namespace that does not own the net namespace cannot
            // mount sysfs; bind the host view instead
            tracing::debug!(%err, "sysfs mount failed, bind mounting host /sys");
            self.syscall.mount(
                Some(Path::new("/sys")),
                &sys,
                None,
                MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_RDONLY,
                None,
            )?;
        }

        self.mount_dev(tty)?;
        Ok(())
    }

    fn mount_dev(&self, tty: bool) -> Result<()> {
        let dev = self.layout.merged.join("dev");
        fs::create_dir_all(&dev).map_err(|err| RootfsError::Io {
            err,
            path: dev.clone(),
        })?;
        self.syscall.mount(
            Some(Path::new("tmpfs")),
            &dev,
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
            Some("mode=755,size=65536k"),
        )?;

        create_devices(self.syscall, &dev)?;

        let shm = dev.join("shm");
        fs::create_dir_all(&shm).map_err(|err| RootfsError::Io {
            err,
            path: shm.clone(),
        })?;
        self.syscall.mount(
            Some(Path::new("tmpfs")),
            &shm,
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            Some("mode=1777,size=65536k"),
        )?;

        for (original, link) in [
            ("/proc/self/fd", "fd"),
            ("/proc/self/fd/0", "stdin"),
            ("/proc/self/fd/1", "stdout"),
            ("/proc/self/fd/2", "stderr"),
        ] {
            self.syscall
                .symlink(Path::new(original), &dev.join(link))?;
        }

        if tty {
            let pts = dev.join("pts");
            fs::create_dir_all(&pts).map_err(|err| RootfsError::Io {
                err,
                path: pts.clone(),
            })?;
            self.syscall.mount(
                Some(Path::new("devpts")),
                &pts,
                Some("devpts"),
                MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
                Some("newinstance,ptmxmode=0666,mode=0620"),
            )?;
            self.syscall
                .symlink(Path::new("pts/ptmx"), &dev.join("ptmx"))?;
        }

        Ok(())
    }

    /// Enters the prepared root.
    pub fn pivot(&self, prepared: &PreparedRootfs) -> Result<()> {
        match prepared.strategy {
            PivotStrategy::PivotRoot => self.syscall.pivot_rootfs(&prepared.root)?,
            PivotStrategy::Chroot => self.syscall.chroot(&prepared.root)?,
        }
        Ok(())
    }
}

/// Removes the per-container rootfs directories. The mounts themselves
/// lived in the container's mount namespace and died with it; anything
/// that leaked into the host namespace is detached first. Idempotent.
pub fn cleanup_rootfs(syscall: &dyn Syscall, rootfs_dir: &Path) {
    let layout = RootfsLayout::new(rootfs_dir);

    if layout.merged.exists() {
        let _ = syscall.umount2(&layout.merged, MntFlags::MNT_DETACH);
    }

    for dir in [&layout.upper, &layout.work, &layout.merged] {
        if let Err(err) = fs::remove_dir_all(dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = ?dir, %err, "failed to remove rootfs directory");
            }
        }
    }
    if fs::symlink_metadata(&layout.lower).is_ok() {
        let _ = fs::remove_file(&layout.lower);
    }
    if let Err(err) = fs::remove_dir(rootfs_dir) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = ?rootfs_dir, %err, "failed to remove rootfs root");
        }
    }
}
