//! The parent half of the launch, plus the shared resource teardown used
//! by stop/rm.

use std::net::Ipv4Addr;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU32, Ordering};

use nix::sched::CloneFlags;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{getgid, getuid, Pid};

use libcgroups::v2::Manager as CgroupManager;

use crate::container::{Container, NetMode};
use crate::error::{Result, RuntimeError};
use crate::network::{self, lease};
use crate::pod;
use crate::process::channel::{self, ChannelError};
use crate::process::fork;
use crate::process::init::{container_init_process, ContainerInitArgs};
use crate::process::stdio::{self, Forwarder, StdioMode};
use crate::rootfs;
use crate::runtime::Runtime;
use crate::store::Store;
use crate::syscall::create_syscall;
use crate::user_ns;
use crate::utils;

/// Exit code base for signal deaths (`128 + signo`).
const SIGNAL_EXIT_BASE: i32 = 128;

static SIGINT_COUNT: AtomicU32 = AtomicU32::new(0);

extern "C" fn handle_sigint(_: libc::c_int) {
    SIGINT_COUNT.fetch_add(1, Ordering::SeqCst);
}

/// Launches the container described by `container.config`.
///
/// Returns `None` when detached, or the container's exit code after a
/// foreground wait. On any failure after resources were allocated the
/// partial launch is torn down before the error is returned.
#[tracing::instrument(level = "debug", skip_all, fields(id = %container.id()))]
pub fn launch(
    runtime: &Runtime,
    store: &Store,
    container: &mut Container,
    mode: StdioMode,
) -> Result<Option<i32>> {
    let cgroup = setup_cgroup(runtime, container)?;

    match allocate_and_launch(runtime, store, container, mode, &cgroup) {
        Ok(exit) => Ok(exit),
        Err(err) => {
            // cleanup covers everything a partial launch may have left:
            // cgroup leaf, veth + lease, rootfs upper/work
            remove_all(runtime, store, container);
            container.mark_dead();
            let _ = container.save();
            Err(err)
        }
    }
}

fn allocate_and_launch(
    runtime: &Runtime,
    store: &Store,
    container: &mut Container,
    mode: StdioMode,
    cgroup: &Option<CgroupManager>,
) -> Result<Option<i32>> {
    let ip = match container.config.net_mode {
        NetMode::Bridge => {
            let _lock = store.network_lock()?;
            network::ensure_bridge()?;
            Some(lease::allocate(&store.network_dir(), container.id())?)
        }
        _ => None,
    };

    launch_with_resources(runtime, store, container, mode, cgroup, ip)
}

fn launch_with_resources(
    runtime: &Runtime,
    store: &Store,
    container: &mut Container,
    mode: StdioMode,
    cgroup: &Option<CgroupManager>,
    ip: Option<Ipv4Addr>,
) -> Result<Option<i32>> {
    let config = container.config.clone();
    let id = config.id.clone();

    let pod_namespaces = open_pod_namespaces(store, container)?;
    let (child_stdio, parent_stdio) = stdio::setup(mode, &container.log_path())?;

    let (main_sender, main_receiver) = &mut channel::main_channel().map_err(channel_error)?;
    let (init_sender, init_receiver) = &mut channel::init_channel().map_err(channel_error)?;

    let syscall = create_syscall();
    let init_args = ContainerInitArgs {
        syscall: syscall.as_ref(),
        config: &config,
        rootfs_dir: container.rootfs_dir(),
        ip,
        pod_namespaces,
        stdio: child_stdio,
    };

    let flags = clone_flags(&config);
    tracing::debug!(?flags, id = %id, "cloning container process");
    let (pid, _pidfd) = fork::container_clone(flags, move || {
        match container_init_process(init_args, main_sender, init_receiver) {
            // exec happened, unreachable
            Ok(()) => 0,
            Err(err) => {
                let _ = main_sender.setup_failed(err.to_string());
                err.exit_code()
            }
        }
    })
    .map_err(|err| RuntimeError::Other(format!("failed to clone container process: {err}")))?;

    match complete_handshake(store, container, cgroup, pid, init_sender, main_receiver) {
        Ok(()) => {}
        Err(err) => {
            let _ = signal::kill(pid, Signal::SIGKILL);
            channel::reap(pid);
            return Err(err);
        }
    }

    container.mark_running(pid);
    container.save()?;
    tracing::info!(id = %id, %pid, "container running");

    let interactive = matches!(
        mode,
        StdioMode::Foreground { interactive: true } | StdioMode::Tty { interactive: true }
    );
    match mode {
        StdioMode::Detached => Ok(None),
        _ => {
            let forwarder = Forwarder::start(parent_stdio, &container.log_path(), interactive)?;
            let exit_code = wait_foreground(pid)?;
            forwarder.wait();

            if let Some(manager) = cgroup {
                if manager.oom_kill_count() > 0 {
                    tracing::warn!(id = %id, "container task was OOM-killed");
                }
            }

            container.mark_exited(exit_code);
            container.save()?;
            teardown(runtime, store, container);
            Ok(Some(exit_code))
        }
    }
}

/// Parent-side barrier work between the clone and `ParentReady`.
fn complete_handshake(
    store: &Store,
    container: &mut Container,
    cgroup: &Option<CgroupManager>,
    pid: Pid,
    init_sender: &mut channel::InitSender,
    main_receiver: &mut channel::MainReceiver,
) -> Result<()> {
    let config = &container.config;

    if config.rootless {
        user_ns::write_id_mappings(pid, getuid(), getgid())?;
    }

    if let Some(manager) = cgroup {
        if let Err(err) = manager.add_task(pid) {
            if config.rootless && !config.limits.any_set() {
                tracing::warn!(%err, "cgroup enrollment failed, continuing without limits");
            } else {
                return Err(err.into());
            }
        }
    }

    if matches!(config.net_mode, NetMode::Bridge) {
        let _lock = store.network_lock()?;
        network::setup_veth(&config.id, pid)?;
    }

    init_sender.parent_ready().map_err(channel_error)?;
    init_sender.close();

    match main_receiver.wait_for_child_ready() {
        Ok(rootfs_mode) => {
            container.state.rootfs_mode = rootfs_mode;
            container.config.rootfs_mode = rootfs_mode;
            Ok(())
        }
        Err(ChannelError::SetupFailed(reason)) => Err(RuntimeError::HandshakeBroken(reason)),
        Err(_) => {
            // the child died without a message; its stderr went to the log
            let tail = std::fs::read_to_string(container.log_path())
                .map(|content| utils::tail_lines(&content, 5).join("\n"))
                .unwrap_or_default();
            Err(RuntimeError::HandshakeBroken(format!(
                "container process exited during setup: {tail}"
            )))
        }
    }
}

fn channel_error(err: ChannelError) -> RuntimeError {
    RuntimeError::Other(format!("launch channel failed: {err}"))
}

/// Creates and configures the cgroup leaf, honouring the rootless
/// best-effort policy: without explicitly requested limits a rootless
/// launch proceeds with a warning when the subtree is unusable.
fn setup_cgroup(runtime: &Runtime, container: &Container) -> Result<Option<CgroupManager>> {
    let config = &container.config;
    let manager = runtime.cgroup_manager(&config.id);

    let result = manager.create().and_then(|()| manager.apply(&config.limits));
    match result {
        Ok(()) => Ok(Some(manager)),
        Err(err) => {
            if runtime.profile().rootless && !config.limits.any_set() {
                tracing::warn!(%err, "cgroup setup failed, continuing without limits");
                let _ = manager.remove();
                Ok(None)
            } else {
                Err(err.into())
            }
        }
    }
}

fn open_pod_namespaces(
    store: &Store,
    container: &Container,
) -> Result<Vec<(CloneFlags, OwnedFd)>> {
    let Some(pod_id) = &container.config.pod_id else {
        return Ok(vec![]);
    };
    pod::open_namespace_handles(store, pod_id)
}

/// Namespace flags for the clone. Pod members skip the namespaces they
/// will join via the pinned handles instead.
pub fn clone_flags(config: &crate::container::ContainerConfig) -> CloneFlags {
    let mut flags = CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS;
    if !matches!(config.net_mode, NetMode::Pod(_)) {
        flags |= CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWIPC | CloneFlags::CLONE_NEWNET;
    }
    if config.rootless {
        flags |= CloneFlags::CLONE_NEWUSER;
    }
    flags
}

/// Waits for the foreground child. A first SIGINT forwards SIGTERM to
/// the container, a second escalates to SIGKILL.
fn wait_foreground(pid: Pid) -> Result<i32> {
    install_sigint_handler()?;
    let mut forwarded = 0;

    let status = loop {
        match waitpid(pid, None) {
            Ok(status) => break status,
            Err(nix::Error::EINTR) => {
                let count = SIGINT_COUNT.load(Ordering::SeqCst);
                if count > forwarded {
                    forwarded = count;
                    let sig = if count == 1 {
                        Signal::SIGTERM
                    } else {
                        Signal::SIGKILL
                    };
                    tracing::debug!(%pid, ?sig, "forwarding interrupt to container");
                    let _ = signal::kill(pid, sig);
                }
            }
            Err(errno) => {
                return Err(RuntimeError::Other(format!(
                    "failed to wait for container process: {errno}"
                )))
            }
        }
    };

    Ok(exit_code_from_status(status))
}

fn install_sigint_handler() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_sigint),
        // no SA_RESTART, waitpid must come back with EINTR
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGINT, &action) }
        .map_err(|errno| RuntimeError::Other(format!("failed to install SIGINT handler: {errno}")))?;
    Ok(())
}

pub fn exit_code_from_status(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, sig, _) => SIGNAL_EXIT_BASE + sig as i32,
        _ => 1,
    }
}

/// Releases the runtime resources of a container: cgroup leaf, veth and
/// lease. The rootfs directories survive until `rm`. Idempotent.
pub fn teardown(runtime: &Runtime, store: &Store, container: &Container) {
    let id = container.id();

    let manager = runtime.cgroup_manager(id);
    if let Err(err) = manager.remove() {
        tracing::warn!(id, %err, "failed to remove cgroup");
    }

    if matches!(container.config.net_mode, NetMode::Bridge) {
        match store.network_lock() {
            Ok(_lock) => {
                let (host_veth, _) = network::veth_names(id);
                if let Err(err) = network::remove_veth(&host_veth) {
                    tracing::warn!(id, %err, "failed to remove veth");
                }
                if let Err(err) = lease::release(&store.network_dir(), id) {
                    tracing::warn!(id, %err, "failed to release lease");
                }
            }
            Err(err) => tracing::warn!(id, %err, "failed to take network lock"),
        }
    }
}

/// Full resource removal for `rm`: teardown plus rootfs directories.
pub fn remove_all(runtime: &Runtime, store: &Store, container: &Container) {
    teardown(runtime, store, container);
    let syscall = create_syscall();
    rootfs::cleanup_rootfs(syscall.as_ref(), &container.rootfs_dir());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerConfig, NetMode};
    use std::path::PathBuf;

    fn config() -> ContainerConfig {
        ContainerConfig::new(
            "0123456789ab".into(),
            PathBuf::from("/images/base"),
            vec!["/bin/sh".into()],
        )
    }

    #[test]
    fn test_clone_flags_default() {
        let flags = clone_flags(&config());
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(flags.contains(CloneFlags::CLONE_NEWUTS));
        assert!(flags.contains(CloneFlags::CLONE_NEWIPC));
        assert!(flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn test_clone_flags_rootless_adds_userns() {
        let mut config = config();
        config.rootless = true;
        assert!(clone_flags(&config).contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn test_clone_flags_pod_skips_shared_namespaces() {
        let mut config = config();
        config.net_mode = NetMode::Pod("deadbeef0000".into());
        let flags = clone_flags(&config);
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(!flags.contains(CloneFlags::CLONE_NEWUTS));
        assert!(!flags.contains(CloneFlags::CLONE_NEWIPC));
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(
            exit_code_from_status(WaitStatus::Exited(Pid::from_raw(1), 3)),
            3
        );
        assert_eq!(
            exit_code_from_status(WaitStatus::Signaled(
                Pid::from_raw(1),
                Signal::SIGKILL,
                false
            )),
            137
        );
        assert_eq!(
            exit_code_from_status(WaitStatus::Signaled(
                Pid::from_raw(1),
                Signal::SIGTERM,
                false
            )),
            143
        );
    }
}
