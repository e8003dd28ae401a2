use std::any::Any;
use std::fs;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::symlink;
use std::path::Path;

use caps::{CapSet, Capability, CapsHashSet};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{setns, unshare, CloneFlags};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::{mknod, Mode, SFlag};
use nix::unistd::{self, sethostname, Gid, Pid, Uid};

use super::syscall::Syscall;
use super::{Result, SyscallError};

/// Unit struct implementing [`Syscall`] against the real kernel.
#[derive(Clone)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Makes `path` the root of the calling mount namespace.
    ///
    /// The old root is stacked under `.oldroot`, detached, and the mount
    /// point removed, so nothing of the host tree stays reachable.
    fn pivot_rootfs(&self, path: &Path) -> Result<()> {
        unistd::chdir(path).map_err(|errno| SyscallError::Nix { op: "chdir", errno })?;

        let old_root = path.join(".oldroot");
        if !old_root.exists() {
            fs::create_dir(&old_root).map_err(|err| SyscallError::Io { op: "mkdir", err })?;
        }

        unistd::pivot_root(".", ".oldroot").map_err(|errno| SyscallError::Nix {
            op: "pivot_root",
            errno,
        })?;

        // do not let the detach propagate back into the host namespace
        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_SLAVE | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|errno| SyscallError::Nix { op: "mount", errno })?;

        umount2("/.oldroot", MntFlags::MNT_DETACH).map_err(|errno| SyscallError::Nix {
            op: "umount2",
            errno,
        })?;
        fs::remove_dir("/.oldroot").map_err(|err| SyscallError::Io { op: "rmdir", err })?;
        unistd::chdir("/").map_err(|errno| SyscallError::Nix { op: "chdir", errno })?;

        Ok(())
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        unistd::chroot(path).map_err(|errno| SyscallError::Nix {
            op: "chroot",
            errno,
        })?;
        unistd::chdir("/").map_err(|errno| SyscallError::Nix { op: "chdir", errno })
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        unistd::chdir(path).map_err(|errno| SyscallError::Nix { op: "chdir", errno })
    }

    fn set_ns(&self, fd: BorrowedFd, nstype: CloneFlags) -> Result<()> {
        setns(fd, nstype).map_err(|errno| SyscallError::Nix { op: "setns", errno })
    }

    fn unshare(&self, flags: CloneFlags) -> Result<()> {
        unshare(flags).map_err(|errno| SyscallError::Nix {
            op: "unshare",
            errno,
        })
    }

    /// Switches to the requested uid/gid, keeping the permitted set alive
    /// across the transition so the remaining capability policy can still
    /// be applied afterwards.
    fn set_id(&self, uid: Uid, gid: Gid) -> Result<()> {
        prctl::set_keep_capabilities(true).map_err(|errno| SyscallError::Prctl {
            op: "PR_SET_KEEPCAPS",
            errno,
        })?;

        unistd::setresgid(gid, gid, gid).map_err(|errno| SyscallError::Nix {
            op: "setresgid",
            errno,
        })?;
        unistd::setresuid(uid, uid, uid).map_err(|errno| SyscallError::Nix {
            op: "setresuid",
            errno,
        })?;

        if !uid.is_root() {
            let permitted = caps::read(None, CapSet::Permitted)?;
            caps::set(None, CapSet::Effective, &permitted)?;
        }

        prctl::set_keep_capabilities(false).map_err(|errno| SyscallError::Prctl {
            op: "PR_SET_KEEPCAPS",
            errno,
        })?;
        Ok(())
    }

    fn set_capability(&self, cset: CapSet, value: &CapsHashSet) -> Result<()> {
        match cset {
            // the bounding set can only be shrunk cap by cap
            CapSet::Bounding => {
                for cap in caps::all().difference(value) {
                    if let Err(err) = caps::drop(None, CapSet::Bounding, *cap) {
                        match cap {
                            // not known to older kernels
                            Capability::CAP_PERFMON
                            | Capability::CAP_CHECKPOINT_RESTORE
                            | Capability::CAP_BPF => {
                                tracing::warn!("{:?} is not supported", cap);
                            }
                            _ => return Err(err.into()),
                        }
                    }
                }
                Ok(())
            }
            _ => {
                caps::set(None, cset, value)?;
                Ok(())
            }
        }
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        sethostname(hostname).map_err(|errno| SyscallError::Nix {
            op: "sethostname",
            errno,
        })
    }

    fn set_no_new_privileges(&self) -> Result<()> {
        prctl::set_no_new_privileges(true).map_err(|errno| SyscallError::Prctl {
            op: "PR_SET_NO_NEW_PRIVS",
            errno,
        })
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        mount(source, target, fstype, flags, data)
            .map_err(|errno| SyscallError::Nix { op: "mount", errno })
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()> {
        umount2(target, flags).map_err(|errno| SyscallError::Nix {
            op: "umount2",
            errno,
        })
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        symlink(original, link).map_err(|err| SyscallError::Io {
            op: "symlink",
            err,
        })
    }

    fn mknod(&self, path: &Path, kind: SFlag, perm: Mode, dev: u64) -> Result<()> {
        mknod(path, kind, perm, dev).map_err(|errno| SyscallError::Nix { op: "mknod", errno })
    }

    fn kill(&self, pid: Pid, signal: Signal) -> Result<()> {
        kill(pid, signal).map_err(|errno| SyscallError::Nix { op: "kill", errno })
    }
}
