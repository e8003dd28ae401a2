//! `run`: create a container and launch its command.

use std::path::{Path, PathBuf};

use clap::Parser;

use libcontainer::container::{BindMount, Container, ContainerConfig, NetMode, UserSpec};
use libcontainer::error::{Result, RuntimeError};
use libcontainer::image;
use libcontainer::pod;
use libcontainer::process::launcher;
use libcontainer::process::stdio::StdioMode;
use libcontainer::rootfs::RootfsMode;
use libcontainer::runtime::Runtime;
use libcontainer::store::Store;
use libcontainer::utils;

use super::{invalid, open_runtime, parse_memory_size};

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NetChoice {
    #[default]
    None,
    Bridge,
}

#[derive(Parser, Debug)]
pub struct Run {
    /// Human-friendly name, unique among live containers
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// UTS hostname inside the container (defaults to the id)
    #[arg(short = 'H', long)]
    pub hostname: Option<String>,

    /// Memory limit, e.g. 20M or 1G
    #[arg(short = 'm', long)]
    pub memory: Option<String>,

    /// CPU limit in percent of one core (100 = unthrottled)
    #[arg(short = 'c', long)]
    pub cpu: Option<u64>,

    /// Maximum number of tasks
    #[arg(long)]
    pub pids: Option<i64>,

    /// Network mode
    #[arg(long, value_enum, default_value_t = NetChoice::None)]
    pub net: NetChoice,

    /// Run without root privileges (user namespace)
    #[arg(long)]
    pub rootless: bool,

    /// Run in the background and print the container id
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Allocate a pseudo-terminal
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Keep stdin attached
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Remove the container once it exits
    #[arg(long = "rm")]
    pub remove: bool,

    /// Environment entries, K=V
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Bind mounts, host:container[:ro]
    #[arg(short = 'v', long = "volume")]
    pub volume: Vec<String>,

    /// Initial working directory inside the container
    #[arg(short = 'w', long)]
    pub workdir: Option<PathBuf>,

    /// Numeric uid[:gid] to run as
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Skip OverlayFS and use the read-only bind layout
    #[arg(long)]
    pub no_overlay: bool,

    /// Join the namespaces of this pod
    #[arg(long)]
    pub pod: Option<String>,

    /// Image rootfs path or registered name[:tag]
    pub image: String,

    /// Command and arguments (image default when omitted)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

pub fn run(args: Run, root: PathBuf) -> Result<i32> {
    let (runtime, store) = open_runtime(root, args.rootless)?;
    let config = build_config(&args, &runtime, &store)?;
    let id = config.id.clone();

    if let Some(name) = &config.name {
        store.ensure_name_free(name)?;
    }

    let container_root = store.create_container_dir(&id)?;
    config.save(&container_root)?;
    let mut container = Container::new(config, container_root);
    container.save()?;

    if let Some(pod_id) = container.config.pod_id.clone() {
        pod::add_member(&store, &pod_id, &id)?;
    }

    let mode = stdio_mode(&args);
    match launcher::launch(&runtime, &store, &mut container, mode) {
        Ok(None) => {
            println!("{id}");
            Ok(0)
        }
        Ok(Some(exit_code)) => {
            if args.remove {
                remove_after_exit(&runtime, &store, &container)?;
            }
            Ok(exit_code)
        }
        Err(err) => Err(err),
    }
}

fn stdio_mode(args: &Run) -> StdioMode {
    if args.detach {
        StdioMode::Detached
    } else if args.tty {
        StdioMode::Tty {
            interactive: args.interactive,
        }
    } else {
        StdioMode::Foreground {
            interactive: args.interactive,
        }
    }
}

fn build_config(args: &Run, runtime: &Runtime, store: &Store) -> Result<ContainerConfig> {
    let (image_root, default_cmd, default_env) = resolve_image(store, &args.image)?;

    let argv = if args.command.is_empty() {
        default_cmd
    } else {
        args.command.clone()
    };
    if argv.is_empty() {
        return Err(invalid(format!(
            "no command given and image {:?} has no default",
            args.image
        )));
    }

    let id = store.allocate_id();
    let mut config = ContainerConfig::new(id.clone(), image_root, argv);
    config.name = args.name.clone();
    config.hostname = args.hostname.clone().unwrap_or_else(|| id.clone());
    config.workdir = args.workdir.clone();
    config.tty = args.tty;
    config.rootless = runtime.profile().rootless;
    if args.no_overlay {
        config.rootfs_mode = RootfsMode::Bind;
    }

    config.env = default_env;
    for entry in &args.env {
        if utils::parse_env_entry(entry).is_none() {
            return Err(invalid(format!("invalid environment entry {entry:?}")));
        }
        config.env.push(entry.clone());
    }

    for volume in &args.volume {
        let mount: BindMount = volume.parse().map_err(invalid)?;
        config.mounts.push(mount);
    }

    if let Some(user) = &args.user {
        config.user = user.parse::<UserSpec>().map_err(invalid)?;
    }

    if let Some(memory) = &args.memory {
        config.limits.memory_bytes = Some(parse_memory_size(memory).map_err(invalid)?);
    }
    config.limits.cpu_percent = args.cpu;
    config.limits.pids_max = args.pids;

    config.net_mode = match (&args.pod, args.net) {
        (Some(pod_ref), _) => {
            let pod = pod::resolve_pod(store, pod_ref)?;
            config.pod_id = Some(pod.id.clone());
            NetMode::Pod(pod.id)
        }
        (None, NetChoice::Bridge) => {
            if !runtime.profile().can_create_veth {
                return Err(RuntimeError::InvalidConfig(
                    "--net bridge requires privileged mode".into(),
                ));
            }
            NetMode::Bridge
        }
        (None, NetChoice::None) => NetMode::None,
    };

    Ok(config)
}

/// An image reference is either a directory path or a registered tag.
fn resolve_image(store: &Store, reference: &str) -> Result<(PathBuf, Vec<String>, Vec<String>)> {
    let as_path = Path::new(reference);
    if as_path.is_dir() {
        let canonical = as_path
            .canonicalize()
            .map_err(|err| invalid(format!("bad image path {reference:?}: {err}")))?;
        return Ok((canonical, vec![], vec![]));
    }

    if reference.contains('/') {
        return Err(invalid(format!(
            "image path {reference:?} is not a directory"
        )));
    }

    let image = image::lookup(store, reference)?;
    if !image.rootfs.is_dir() {
        return Err(invalid(format!(
            "image {reference:?} points at missing rootfs {:?}",
            image.rootfs
        )));
    }
    Ok((image.rootfs.clone(), image.default_cmd, image.default_env))
}

fn remove_after_exit(runtime: &Runtime, store: &Store, container: &Container) -> Result<()> {
    launcher::remove_all(runtime, store, container);
    if let Some(pod_id) = &container.config.pod_id {
        pod::remove_member(store, pod_id, container.id())?;
    }
    store.remove_container_dir(container.id())?;
    Ok(())
}
