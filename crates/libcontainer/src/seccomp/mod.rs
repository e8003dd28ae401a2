//! Seccomp allow-list filter for container processes.
//!
//! One BPF program per container: syscalls on the allow list return
//! normally, everything else kills the offending process. libseccomp adds
//! the native architecture fingerprint, so a binary built for another arch
//! is killed on its first syscall.

use libseccomp::error::SeccompError as LibSeccompError;
use libseccomp::{ScmpAction, ScmpFilterContext, ScmpSyscall};

#[derive(Debug, thiserror::Error)]
pub enum SeccompError {
    #[error("failed to build seccomp filter: {0}")]
    Filter(#[from] LibSeccompError),
}

/// Syscalls a confined process may issue: file I/O, memory management,
/// time, signals, process lifecycle, futex, event polling, BSD sockets
/// and scheduling. Raw sockets are additionally blocked by the capability
/// drop (CAP_NET_RAW is gone).
const ALLOWED_SYSCALLS: &[&str] = &[
    // file I/O
    "read", "write", "readv", "writev", "pread64", "pwrite64", "open", "openat", "close",
    "stat", "fstat", "lstat", "newfstatat", "statx", "lseek", "access", "faccessat",
    "faccessat2", "getcwd", "chdir", "fchdir", "mkdir", "mkdirat", "rmdir", "unlink",
    "unlinkat", "rename", "renameat", "link", "linkat", "symlink", "symlinkat", "readlink",
    "readlinkat", "chmod", "fchmod", "fchmodat", "chown", "fchown", "fchownat", "umask",
    "getdents64", "statfs", "fstatfs", "flock", "fsync", "fdatasync", "truncate",
    "ftruncate", "sendfile", "splice", "copy_file_range", "utimensat", "fcntl", "ioctl",
    "dup", "dup2", "dup3", "pipe", "pipe2",
    // memory
    "mmap", "mprotect", "munmap", "brk", "mremap", "madvise", "membarrier",
    // time
    "nanosleep", "clock_nanosleep", "clock_gettime", "clock_getres", "gettimeofday",
    "times",
    // signals
    "rt_sigaction", "rt_sigprocmask", "rt_sigreturn", "rt_sigsuspend", "rt_sigpending",
    "rt_sigtimedwait", "sigaltstack", "kill", "tkill", "tgkill", "pause",
    // process lifecycle
    "clone", "fork", "vfork", "execve", "execveat", "exit", "exit_group", "wait4",
    "waitid", "set_tid_address", "set_robust_list", "get_robust_list", "getpid",
    "getppid", "gettid", "getuid", "geteuid", "getgid", "getegid", "setuid", "setgid",
    "setgroups", "getgroups", "setsid", "getsid", "setpgid", "getpgid", "getpgrp",
    "setresuid", "setresgid", "getresuid", "getresgid", "capget", "prctl", "arch_prctl",
    "getrlimit", "setrlimit", "prlimit64", "getrusage", "sysinfo", "uname", "getrandom",
    "rseq",
    // futex
    "futex", "futex_waitv",
    // event polling
    "epoll_create1", "epoll_ctl", "epoll_wait", "epoll_pwait", "poll", "ppoll", "select",
    "pselect6", "eventfd2", "timerfd_create", "timerfd_settime", "timerfd_gettime",
    "inotify_init1", "inotify_add_watch", "inotify_rm_watch",
    // BSD sockets (raw socket creation is stopped by the capability drop)
    "socket", "socketpair", "bind", "listen", "accept", "accept4", "connect",
    "getsockname", "getpeername", "sendto", "recvfrom", "sendmsg", "recvmsg", "sendmmsg",
    "recvmmsg", "shutdown", "setsockopt", "getsockopt",
    // scheduling
    "sched_yield", "sched_getaffinity", "sched_setaffinity", "sched_getparam",
    "sched_setscheduler", "sched_getscheduler", "sched_get_priority_max",
    "sched_get_priority_min", "nice", "ioprio_get",
];

/// Syscalls that must never be reachable from inside a container,
/// whatever else changes about the allow list.
pub const FORBIDDEN_SYSCALLS: &[&str] = &[
    "mount", "umount2", "pivot_root", "ptrace", "kexec_load", "kexec_file_load",
    "init_module", "finit_module", "delete_module", "reboot", "bpf", "perf_event_open",
    "swapon", "swapoff", "acct", "add_key", "request_key", "keyctl", "quotactl",
    "settimeofday", "clock_settime", "clock_adjtime", "mount_setattr",
    "open_by_handle_at", "setns", "unshare",
];

/// Builds and loads the allow-list filter into the calling thread. Must
/// run after `NO_NEW_PRIVS` is set so no privilege is needed.
pub fn apply_filter() -> Result<(), SeccompError> {
    let mut filter = ScmpFilterContext::new_filter(ScmpAction::KillProcess)?;

    for name in ALLOWED_SYSCALLS {
        match ScmpSyscall::from_name(name) {
            Ok(syscall) => filter.add_rule(ScmpAction::Allow, syscall)?,
            // not every syscall exists on every architecture
            Err(_) => tracing::debug!(syscall = name, "skipping unknown syscall"),
        }
    }

    filter.load()?;
    tracing::debug!(rules = ALLOWED_SYSCALLS.len(), "seccomp filter loaded");
    Ok(())
}
