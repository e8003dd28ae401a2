//! `rm`: tear a container down and delete every trace of it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use nix::sys::signal::{kill, Signal};

use libcontainer::error::{Result, RuntimeError};
use libcontainer::pod;
use libcontainer::process::launcher;
use libcontainer::runtime::Runtime;
use libcontainer::store::Store;

use super::open_runtime;

#[derive(Parser, Debug)]
pub struct Rm {
    /// Remove a running container (SIGKILL first)
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Also remove anonymous volumes (bind mounts leave no residue)
    #[arg(short = 'v', long)]
    pub volumes: bool,

    /// Container ids, names, or id prefixes
    #[arg(required = true)]
    pub containers: Vec<String>,
}

pub fn rm(args: Rm, root: PathBuf) -> Result<i32> {
    let (runtime, store) = open_runtime(root, false)?;

    for reference in &args.containers {
        remove_one(&runtime, &store, reference, args.force)?;
    }
    Ok(0)
}

fn remove_one(runtime: &Runtime, store: &Store, reference: &str, force: bool) -> Result<()> {
    let mut container = store.resolve_container(reference)?;
    let _guard = store.lock_container(container.id())?;
    container.refresh_status()?;

    if container.status().can_stop() {
        if !force {
            return Err(RuntimeError::StateConflict(format!(
                "container {} is running; stop it or use --force",
                container.id()
            )));
        }
        if let Some(pid) = container.pid() {
            let _ = kill(pid, Signal::SIGKILL);
            let deadline = Instant::now() + Duration::from_secs(2);
            while container.status().can_stop() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(50));
                container.refresh_status()?;
            }
        }
        if container.status().can_stop() {
            container.mark_exited(128 + Signal::SIGKILL as i32);
            container.save()?;
        }
    }

    launcher::remove_all(runtime, store, &container);
    if let Some(pod_id) = &container.config.pod_id {
        pod::remove_member(store, pod_id, container.id())?;
    }
    store.remove_container_dir(container.id())?;
    tracing::info!(id = %container.id(), "removed container");
    println!("{}", container.id());
    Ok(())
}
