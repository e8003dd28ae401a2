//! uid/gid mapping for rootless containers.
//!
//! The parent writes the maps for the child's fresh user namespace; the
//! child blocks on the handshake until this has happened, because setuid
//! inside the namespace fails until a mapping exists.

use std::fs;
use std::path::PathBuf;

use nix::unistd::{Gid, Pid, Uid};

/// Maps root inside the container onto the invoking user. Single-entry
/// maps keep the setup free of newuidmap/newgidmap helpers.
pub fn write_id_mappings(pid: Pid, uid: Uid, gid: Gid) -> std::io::Result<()> {
    let proc_dir = PathBuf::from("/proc").join(pid.to_string());

    fs::write(proc_dir.join("uid_map"), format!("0 {uid} 1"))?;
    // gid_map writes are refused until setgroups is disabled
    fs::write(proc_dir.join("setgroups"), "deny")?;
    fs::write(proc_dir.join("gid_map"), format!("0 {gid} 1"))?;

    tracing::debug!(%pid, %uid, %gid, "wrote id mappings");
    Ok(())
}
