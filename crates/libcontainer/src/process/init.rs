//! The child half of the launch: everything between the clone and the
//! exec of the user command. Runs inside the fresh namespaces.

use std::ffi::CString;
use std::net::Ipv4Addr;
use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::unistd::{self, Gid, Uid};

use crate::capabilities;
use crate::container::{ContainerConfig, NetMode};
use crate::network::{self, NetworkError};
use crate::process::channel::{ChannelError, InitReceiver, MainSender};
use crate::process::stdio::{self, ChildStdio, StdioError};
use crate::rootfs::{PivotStrategy, RootfsBuilder, RootfsError, RootfsMode};
use crate::seccomp::{self, SeccompError};
use crate::syscall::{Syscall, SyscallError};

const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("handshake failed: {0}")]
    Channel(#[from] ChannelError),
    #[error("stdio setup failed: {0}")]
    Stdio(#[from] StdioError),
    #[error("rootfs setup failed: {0}")]
    Rootfs(#[from] RootfsError),
    #[error("syscall failed: {0}")]
    Syscall(#[from] SyscallError),
    #[error("network setup failed: {0}")]
    Network(#[from] NetworkError),
    #[error("seccomp setup failed: {0}")]
    Seccomp(#[from] SeccompError),
    #[error("bridge mode requires an allocated address")]
    MissingAddress,
    #[error("no command given")]
    EmptyArgv,
    #[error("invalid argument or environment entry: {0}")]
    InvalidArgv(String),
    #[error("exec failed: {0}")]
    Exec(Errno),
}

impl InitError {
    /// Exit code of the child when the error is not surfaced through the
    /// handshake anymore (exec failures happen after ready).
    pub fn exit_code(&self) -> i32 {
        match self {
            InitError::Exec(Errno::ENOENT) => 127,
            InitError::Exec(_) => 126,
            _ => 1,
        }
    }
}

pub struct ContainerInitArgs<'a> {
    pub syscall: &'a dyn Syscall,
    pub config: &'a ContainerConfig,
    /// `containers/<id>/rootfs` under the state store.
    pub rootfs_dir: PathBuf,
    /// Lease for bridge mode.
    pub ip: Option<Ipv4Addr>,
    /// Pinned pod namespaces to join instead of the freshly unshared ones.
    pub pod_namespaces: Vec<(CloneFlags, OwnedFd)>,
    pub stdio: ChildStdio,
}

/// Runs the ordered child-side sequence and execs the user command. On
/// success this never returns.
pub fn container_init_process(
    args: ContainerInitArgs<'_>,
    main_sender: &mut MainSender,
    init_receiver: &mut InitReceiver,
) -> Result<(), InitError> {
    let config = args.config;

    // gate on the parent: uid_map, cgroup enrollment, veth attachment
    init_receiver.wait_for_parent_ready()?;

    stdio::apply_child_stdio(&args.stdio)?;

    for (nstype, fd) in &args.pod_namespaces {
        args.syscall.set_ns(fd.as_fd(), *nstype)?;
    }

    let shares_uts = args
        .pod_namespaces
        .iter()
        .any(|(nstype, _)| nstype.contains(CloneFlags::CLONE_NEWUTS));
    if !shares_uts {
        args.syscall.set_hostname(&config.hostname)?;
    }

    let builder = RootfsBuilder::new(
        args.syscall,
        &args.rootfs_dir,
        config.image_root.clone(),
        config.rootfs_mode == RootfsMode::Bind,
    );
    let prepared = builder.prepare()?;
    builder.mount_volumes(&config.mounts)?;
    if prepared.strategy == PivotStrategy::PivotRoot {
        builder.mount_special(config.tty)?;
    }
    builder.pivot(&prepared)?;

    match &config.net_mode {
        NetMode::Bridge => {
            let ip = args.ip.ok_or(InitError::MissingAddress)?;
            network::configure_container(&config.id, ip)?;
        }
        NetMode::None => network::loopback_up()?,
        // the joined pod namespace is already wired
        NetMode::Pod(_) => {}
    }

    if let Some(workdir) = &config.workdir {
        args.syscall.chdir(workdir)?;
    }

    capabilities::drop_privileges(args.syscall)?;
    args.syscall.set_id(
        Uid::from_raw(config.user.uid),
        Gid::from_raw(config.user.gid),
    )?;
    args.syscall.set_no_new_privileges()?;
    seccomp::apply_filter()?;

    main_sender.child_ready(prepared.mode)?;
    main_sender.close();
    init_receiver.close();

    do_exec(&config.argv, &config.env)
}

pub(crate) fn do_exec(argv: &[String], env: &[String]) -> Result<(), InitError> {
    if argv.is_empty() {
        return Err(InitError::EmptyArgv);
    }

    let to_cstring = |s: &String| {
        CString::new(s.as_str()).map_err(|_| InitError::InvalidArgv(s.clone()))
    };

    let args: Vec<CString> = argv.iter().map(to_cstring).collect::<Result<_, _>>()?;

    let mut env = env.to_vec();
    if !env.iter().any(|entry| entry.starts_with("PATH=")) {
        env.push(DEFAULT_PATH.to_owned());
    }
    let env: Vec<CString> = env.iter().map(to_cstring).collect::<Result<_, _>>()?;

    let err = if argv[0].contains('/') {
        unistd::execve(&args[0], &args, &env).unwrap_err()
    } else {
        unistd::execvpe(&args[0], &args, &env).unwrap_err()
    };
    Err(InitError::Exec(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_missing_binary_is_127() {
        let err = do_exec(&["/definitely/not/here".into()], &[]).unwrap_err();
        assert!(matches!(err, InitError::Exec(Errno::ENOENT)));
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn test_exec_rejects_empty_argv() {
        let err = do_exec(&[], &[]).unwrap_err();
        assert!(matches!(err, InitError::EmptyArgv));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_exec_rejects_interior_nul() {
        let err = do_exec(&["/bin/e\0cho".into()], &[]).unwrap_err();
        assert!(matches!(err, InitError::InvalidArgv(_)));
    }
}
