//! `exec`: running an additional command inside a live container.
//!
//! A helper process joins the target's namespaces via `setns`, then forks
//! once more so the payload actually lands in the target pid namespace.
//! The helper is enrolled in the container's existing cgroup before it
//! joins anything; no new cgroup is ever created here.

use std::fs::File;
use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;

use nix::sched::CloneFlags;
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Gid, Uid};

use crate::capabilities;
use crate::container::{Container, UserSpec};
use crate::error::{Result, RuntimeError};
use crate::process::channel;
use crate::process::init::do_exec;
use crate::process::launcher::exit_code_from_status;
use crate::process::stdio::{self, ChildStdio, Forwarder, StdioMode};
use crate::runtime::Runtime;
use crate::seccomp;
use crate::store::Store;
use crate::syscall::create_syscall;

pub struct ExecOpts {
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub user: Option<UserSpec>,
    pub interactive: bool,
    pub tty: bool,
}

/// exec is always a foreground session; `-t` swaps the pipes for a PTY
/// pair and `-i` keeps stdin attached, exactly as on `run`.
fn stdio_mode(opts: &ExecOpts) -> StdioMode {
    if opts.tty {
        StdioMode::Tty {
            interactive: opts.interactive,
        }
    } else {
        StdioMode::Foreground {
            interactive: opts.interactive,
        }
    }
}

/// Namespaces joined by the helper, in order. The mount namespace comes
/// last: joining it swaps the root and cwd, cutting access to `/proc` of
/// the host.
fn namespace_join_order(rootless: bool) -> Vec<(&'static str, CloneFlags)> {
    let mut order = vec![];
    if rootless {
        order.push(("user", CloneFlags::CLONE_NEWUSER));
    }
    order.extend([
        ("pid", CloneFlags::CLONE_NEWPID),
        ("uts", CloneFlags::CLONE_NEWUTS),
        ("ipc", CloneFlags::CLONE_NEWIPC),
        ("net", CloneFlags::CLONE_NEWNET),
        ("mnt", CloneFlags::CLONE_NEWNS),
    ]);
    order
}

pub fn exec(
    runtime: &Runtime,
    store: &Store,
    container: &mut Container,
    opts: ExecOpts,
) -> Result<i32> {
    let _guard = store.lock_container(container.id())?;
    let target_pid = container.live_pid()?;

    let proc_ns = PathBuf::from("/proc").join(target_pid.to_string()).join("ns");
    let mut namespaces: Vec<(CloneFlags, OwnedFd)> = vec![];
    for (name, flag) in namespace_join_order(container.config.rootless) {
        let file = File::open(proc_ns.join(name)).map_err(|err| {
            RuntimeError::StateConflict(format!(
                "cannot open namespace {name} of container {}: {err}",
                container.id()
            ))
        })?;
        namespaces.push((flag, OwnedFd::from(file)));
    }

    let user = opts.user.unwrap_or(container.config.user);
    let mut env = container.config.env.clone();
    env.extend(opts.env.iter().cloned());
    let workdir = opts.workdir.clone().or(container.config.workdir.clone());

    let mode = stdio_mode(&opts);
    let (child_stdio, parent_stdio) = stdio::setup(mode, &container.log_path())?;

    let (ready_tx, ready_rx) = &mut channel::channel::<u8>()
        .map_err(|err| RuntimeError::Other(format!("exec channel failed: {err}")))?;

    match unsafe { unistd::fork() }
        .map_err(|errno| RuntimeError::Other(format!("failed to fork exec helper: {errno}")))?
    {
        ForkResult::Child => {
            let code = exec_helper(namespaces, child_stdio, &opts.argv, &env, workdir, user, ready_rx);
            std::process::exit(code);
        }
        ForkResult::Parent { child } => {
            // the helper holds its own copies of these fds; dropping the
            // parent's lets the forwarders see EOF once it exits
            drop(child_stdio);

            // enroll in the existing cgroup before the helper joins the
            // namespaces; membership is inherited by the payload fork
            let manager = runtime.cgroup_manager(container.id());
            if manager.exists() {
                manager.add_task(child)?;
            }
            ready_tx
                .send(1)
                .map_err(|err| RuntimeError::Other(format!("exec channel failed: {err}")))?;

            let forwarder = Forwarder::start(parent_stdio, &container.log_path(), opts.interactive)?;
            let status = waitpid(child, None)
                .map_err(|errno| RuntimeError::Other(format!("failed to wait for exec: {errno}")))?;
            forwarder.wait();
            Ok(exit_code_from_status(status))
        }
    }
}

fn exec_helper(
    namespaces: Vec<(CloneFlags, OwnedFd)>,
    child_stdio: ChildStdio,
    argv: &[String],
    env: &[String],
    workdir: Option<PathBuf>,
    user: UserSpec,
    ready_rx: &mut channel::Receiver<u8>,
) -> i32 {
    if ready_rx.recv().is_err() {
        return 1;
    }

    // wire the session's stdio first; the dup2'd fds are inherited by
    // the payload fork below
    if let Err(err) = stdio::apply_child_stdio(&child_stdio) {
        tracing::error!(%err, "exec failed to set up stdio");
        return 1;
    }

    let syscall = create_syscall();
    for (flag, fd) in &namespaces {
        if let Err(err) = syscall.set_ns(fd.as_fd(), *flag) {
            tracing::error!(%err, "exec failed to join namespace");
            return 1;
        }
    }

    // joining the pid namespace only applies to children; fork so the
    // payload gets a pid inside the container
    match unsafe { unistd::fork() } {
        Err(errno) => {
            tracing::error!(%errno, "exec helper failed to fork payload");
            1
        }
        Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
            Ok(status) => exit_code_from_status(status),
            Err(_) => 1,
        },
        Ok(ForkResult::Child) => {
            let code = (|| -> std::result::Result<i32, String> {
                if let Some(dir) = &workdir {
                    syscall.chdir(dir).map_err(|e| e.to_string())?;
                }
                // the same privilege sequence as the original launch,
                // re-dropped from the host set
                capabilities::drop_privileges(syscall.as_ref()).map_err(|e| e.to_string())?;
                syscall
                    .set_id(Uid::from_raw(user.uid), Gid::from_raw(user.gid))
                    .map_err(|e| e.to_string())?;
                syscall.set_no_new_privileges().map_err(|e| e.to_string())?;
                seccomp::apply_filter().map_err(|e| e.to_string())?;

                match do_exec(argv, env) {
                    Ok(()) => unreachable!("exec returned"),
                    Err(err) => {
                        eprintln!("exec: {err}");
                        Ok(err.exit_code())
                    }
                }
            })();
            match code {
                Ok(code) => std::process::exit(code),
                Err(message) => {
                    eprintln!("exec setup failed: {message}");
                    std::process::exit(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_order_puts_mount_last() {
        let order = namespace_join_order(false);
        assert_eq!(order.first().map(|(n, _)| *n), Some("pid"));
        assert_eq!(order.last().map(|(n, _)| *n), Some("mnt"));
        assert!(!order.iter().any(|(n, _)| *n == "user"));
    }

    #[test]
    fn test_join_order_rootless_leads_with_user() {
        let order = namespace_join_order(true);
        assert_eq!(order.first().map(|(n, _)| *n), Some("user"));
    }

    #[test]
    fn test_stdio_mode_follows_flags() {
        let mut opts = ExecOpts {
            argv: vec!["/bin/sh".into()],
            env: vec![],
            workdir: None,
            user: None,
            interactive: false,
            tty: false,
        };
        assert_eq!(
            stdio_mode(&opts),
            StdioMode::Foreground { interactive: false }
        );

        opts.interactive = true;
        assert_eq!(
            stdio_mode(&opts),
            StdioMode::Foreground { interactive: true }
        );

        opts.tty = true;
        assert_eq!(stdio_mode(&opts), StdioMode::Tty { interactive: true });
    }
}
