//! Child process creation for the launcher.
//!
//! `clone3` with `CLONE_PIDFD` is preferred: the caller gets a pidfd, so
//! later stop/exec operations cannot race against host pid reuse. Kernels
//! without `clone3` fall back to the classic `clone` with an mmap'd child
//! stack.

use std::mem;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use libc::c_int;
use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::unistd::Pid;

#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("clone3 failed: {0}")]
    Clone3(Errno),
    #[error("clone failed: {0}")]
    Clone(Errno),
    #[error("failed to allocate child stack: {0}")]
    Stack(Errno),
}

#[repr(C)]
#[derive(Default)]
struct CloneArgs {
    flags: u64,
    pidfd: u64,
    child_tid: u64,
    parent_tid: u64,
    exit_signal: u64,
    stack: u64,
    stack_size: u64,
    tls: u64,
    set_tid: u64,
    set_tid_size: u64,
    cgroup: u64,
}

const CLONE_PIDFD: u64 = 0x1000;

/// Clones a child running `cb`; the child's return value becomes its exit
/// code. Returns the child pid and, when the kernel provides `clone3`, a
/// pidfd for it.
pub fn container_clone<F>(
    clone_flags: CloneFlags,
    cb: F,
) -> Result<(Pid, Option<OwnedFd>), CloneError>
where
    F: FnOnce() -> i32,
{
    let mut pidfd: RawFd = -1;
    let mut args = CloneArgs {
        flags: clone_flags.bits() as u64 | CLONE_PIDFD,
        pidfd: &mut pidfd as *mut RawFd as u64,
        exit_signal: libc::SIGCHLD as u64,
        ..Default::default()
    };

    // clone3 without a stack behaves like fork: the child continues here
    // on a copy-on-write stack
    let ret = unsafe {
        libc::syscall(
            libc::SYS_clone3,
            &mut args as *mut CloneArgs,
            mem::size_of::<CloneArgs>(),
        )
    };

    match ret {
        0 => {
            let code = cb();
            std::process::exit(code);
        }
        -1 => {
            let errno = Errno::last();
            // older kernels miss clone3, and seccomp policies of outer
            // container runtimes commonly return EPERM for it
            if matches!(errno, Errno::ENOSYS | Errno::EPERM) {
                tracing::debug!(%errno, "clone3 unavailable, falling back to clone");
                return clone_fallback(clone_flags, cb).map(|pid| (pid, None));
            }
            Err(CloneError::Clone3(errno))
        }
        pid => {
            let pidfd = (pidfd >= 0).then(|| unsafe { OwnedFd::from_raw_fd(pidfd) });
            Ok((Pid::from_raw(pid as i32), pidfd))
        }
    }
}

/// The classic clone(2) needs a caller-supplied stack. The mapping only
/// reserves address space; pages materialise as the child touches them,
/// and exec replaces the whole thing.
fn clone_fallback<F>(clone_flags: CloneFlags, cb: F) -> Result<Pid, CloneError>
where
    F: FnOnce() -> i32,
{
    const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

    let page_size: usize = match unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } {
        -1 => 4 * 1024,
        size => size as usize,
    };

    let child_stack = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            DEFAULT_STACK_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
            -1,
            0,
        )
    };
    if child_stack == libc::MAP_FAILED {
        return Err(CloneError::Stack(Errno::last()));
    }

    // guard page at the bottom, the stack grows down towards it
    if unsafe { libc::mprotect(child_stack, page_size, libc::PROT_NONE) } != 0 {
        return Err(CloneError::Stack(Errno::last()));
    }

    // the child runs on a copy-on-write view of this frame, so a plain
    // pointer to the stack-held payload is enough
    extern "C" fn trampoline<F: FnOnce() -> i32>(data: *mut libc::c_void) -> c_int {
        let payload = unsafe { &mut *(data as *mut Option<F>) };
        match payload.take() {
            Some(cb) => cb() as c_int,
            None => -1,
        }
    }

    let mut payload = Some(cb);
    let combined = clone_flags.bits() | libc::SIGCHLD;
    let ret = unsafe {
        let stack_top = child_stack.add(DEFAULT_STACK_SIZE);
        libc::clone(
            trampoline::<F>,
            stack_top,
            combined,
            &mut payload as *mut Option<F> as *mut libc::c_void,
        )
    };

    if ret == -1 {
        return Err(CloneError::Clone(Errno::last()));
    }

    Ok(Pid::from_raw(ret))
}
