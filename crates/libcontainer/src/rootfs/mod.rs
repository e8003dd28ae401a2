//! Construction of the container root filesystem: overlay or bind layout,
//! special filesystems, user volumes, and the pivot into the new root.

mod device;
#[allow(clippy::module_inception)]
mod rootfs;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use device::default_devices;
pub use rootfs::{cleanup_rootfs, PivotStrategy, PreparedRootfs, RootfsBuilder, RootfsLayout};

use crate::syscall::SyscallError;

/// How the merged root was produced.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RootfsMode {
    /// OverlayFS: read-only image lower, per-container upper+work.
    #[default]
    Overlay,
    /// Read-only bind of the image with tmpfs over writable dirs.
    Bind,
}

impl std::fmt::Display for RootfsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RootfsMode::Overlay => write!(f, "overlay"),
            RootfsMode::Bind => write!(f, "bind"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RootfsError {
    #[error(transparent)]
    Syscall(#[from] SyscallError),
    #[error("bind mount source {0} does not exist")]
    BindMissing(PathBuf),
    #[error("failed to prepare {path}: {err}")]
    Io { err: std::io::Error, path: PathBuf },
}

pub(crate) type Result<T> = std::result::Result<T, RootfsError>;
