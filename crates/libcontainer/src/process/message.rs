use serde::{Deserialize, Serialize};

use crate::rootfs::RootfsMode;

/// Everything that crosses the launch handshake channels.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Parent → child: id mappings, cgroup enrollment and veth attachment
    /// are done; the child may proceed.
    ParentReady,
    /// Child → parent: privilege is dropped, exec is next. Carries the
    /// rootfs mode actually used, which may have degraded from overlay.
    ChildReady { rootfs_mode: RootfsMode },
    /// Child → parent: setup failed before exec; one line of kind+errno.
    SetupFailed(String),
}
