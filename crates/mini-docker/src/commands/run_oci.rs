//! `run-oci`: launch a container from an OCI bundle directory.

use std::path::PathBuf;

use clap::Parser;

use libcontainer::container::Container;
use libcontainer::error::{Result, RuntimeError};
use libcontainer::oci;
use libcontainer::process::launcher;
use libcontainer::process::stdio::StdioMode;

use super::open_runtime;

#[derive(Parser, Debug)]
pub struct RunOci {
    /// Run in the background and print the container id
    #[arg(long)]
    pub detach: bool,

    /// Run without root privileges
    #[arg(long)]
    pub rootless: bool,

    /// Bundle directory containing config.json and the rootfs
    pub bundle: PathBuf,
}

pub fn run_oci(args: RunOci, root: PathBuf) -> Result<i32> {
    let (runtime, store) = open_runtime(root, args.rootless)?;

    let bundle = args
        .bundle
        .canonicalize()
        .map_err(|err| RuntimeError::InvalidConfig(format!("bad bundle path: {err}")))?;
    let spec = oci::load_bundle(&bundle)
        .map_err(|err| RuntimeError::InvalidConfig(err.to_string()))?;

    let id = store.allocate_id();
    let mut config = oci::to_container_config(&bundle, &spec, id.clone())
        .map_err(|err| RuntimeError::InvalidConfig(err.to_string()))?;
    config.rootless = config.rootless || runtime.profile().rootless;

    let container_root = store.create_container_dir(&id)?;
    config.save(&container_root)?;
    let mut container = Container::new(config, container_root);
    container.save()?;

    let mode = if args.detach {
        StdioMode::Detached
    } else {
        StdioMode::Foreground { interactive: false }
    };

    match launcher::launch(&runtime, &store, &mut container, mode)? {
        None => {
            println!("{id}");
            Ok(0)
        }
        Some(exit_code) => Ok(exit_code),
    }
}
