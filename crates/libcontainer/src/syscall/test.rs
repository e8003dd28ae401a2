//! A recording [`Syscall`] double used by unit tests.

use std::any::Any;
use std::cell::RefCell;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};

use caps::{CapSet, CapsHashSet};
use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::sys::stat::{Mode, SFlag};
use nix::unistd::{Gid, Pid, Uid};

use super::syscall::Syscall;
use super::Result;

#[derive(Clone, Debug)]
pub struct MountArgs {
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    pub fstype: Option<String>,
    pub flags: MsFlags,
    pub data: Option<String>,
}

#[derive(Default)]
pub struct TestHelperSyscall {
    mounts: RefCell<Vec<MountArgs>>,
    umounts: RefCell<Vec<(PathBuf, MntFlags)>>,
    hostnames: RefCell<Vec<String>>,
    set_capability_args: RefCell<Vec<(CapSet, CapsHashSet)>>,
    set_id_args: RefCell<Vec<(Uid, Gid)>>,
    set_ns_args: RefCell<Vec<(RawFd, CloneFlags)>>,
    unshare_args: RefCell<Vec<CloneFlags>>,
    chdir_args: RefCell<Vec<PathBuf>>,
    pivot_args: RefCell<Vec<PathBuf>>,
    chroot_args: RefCell<Vec<PathBuf>>,
    mknods: RefCell<Vec<PathBuf>>,
    symlinks: RefCell<Vec<(PathBuf, PathBuf)>>,
    kills: RefCell<Vec<(Pid, Signal)>>,
    no_new_privileges: RefCell<bool>,
}

impl Syscall for TestHelperSyscall {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn pivot_rootfs(&self, path: &Path) -> Result<()> {
        self.pivot_args.borrow_mut().push(path.to_owned());
        Ok(())
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        self.chroot_args.borrow_mut().push(path.to_owned());
        Ok(())
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        self.chdir_args.borrow_mut().push(path.to_owned());
        Ok(())
    }

    fn set_ns(&self, fd: BorrowedFd, nstype: CloneFlags) -> Result<()> {
        self.set_ns_args.borrow_mut().push((fd.as_raw_fd(), nstype));
        Ok(())
    }

    fn unshare(&self, flags: CloneFlags) -> Result<()> {
        self.unshare_args.borrow_mut().push(flags);
        Ok(())
    }

    fn set_id(&self, uid: Uid, gid: Gid) -> Result<()> {
        self.set_id_args.borrow_mut().push((uid, gid));
        Ok(())
    }

    fn set_capability(&self, cset: CapSet, value: &CapsHashSet) -> Result<()> {
        self.set_capability_args
            .borrow_mut()
            .push((cset, value.clone()));
        Ok(())
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        self.hostnames.borrow_mut().push(hostname.to_owned());
        Ok(())
    }

    fn set_no_new_privileges(&self) -> Result<()> {
        *self.no_new_privileges.borrow_mut() = true;
        Ok(())
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        self.mounts.borrow_mut().push(MountArgs {
            source: source.map(Path::to_owned),
            target: target.to_owned(),
            fstype: fstype.map(str::to_owned),
            flags,
            data: data.map(str::to_owned),
        });
        Ok(())
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()> {
        self.umounts.borrow_mut().push((target.to_owned(), flags));
        Ok(())
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        self.symlinks
            .borrow_mut()
            .push((original.to_owned(), link.to_owned()));
        Ok(())
    }

    fn mknod(&self, path: &Path, _kind: SFlag, _perm: Mode, _dev: u64) -> Result<()> {
        self.mknods.borrow_mut().push(path.to_owned());
        Ok(())
    }

    fn kill(&self, pid: Pid, signal: Signal) -> Result<()> {
        self.kills.borrow_mut().push((pid, signal));
        Ok(())
    }
}

impl TestHelperSyscall {
    pub fn get_mounts(&self) -> Vec<MountArgs> {
        self.mounts.borrow().clone()
    }

    pub fn get_hostname_args(&self) -> Vec<String> {
        self.hostnames.borrow().clone()
    }

    pub fn get_set_capability_args(&self) -> Vec<(CapSet, CapsHashSet)> {
        self.set_capability_args.borrow().clone()
    }

    pub fn get_set_id_args(&self) -> Vec<(Uid, Gid)> {
        self.set_id_args.borrow().clone()
    }

    pub fn get_unshare_args(&self) -> Vec<CloneFlags> {
        self.unshare_args.borrow().clone()
    }

    pub fn get_chdir_args(&self) -> Vec<PathBuf> {
        self.chdir_args.borrow().clone()
    }

    pub fn get_pivot_args(&self) -> Vec<PathBuf> {
        self.pivot_args.borrow().clone()
    }

    pub fn get_mknod_paths(&self) -> Vec<PathBuf> {
        self.mknods.borrow().clone()
    }

    pub fn no_new_privileges_set(&self) -> bool {
        *self.no_new_privileges.borrow()
    }
}
