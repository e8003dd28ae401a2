//! `cleanup`: remove stopped containers, dangling built images, and the
//! bridge once nothing references it.

use std::path::PathBuf;

use clap::Parser;

use libcontainer::error::Result;
use libcontainer::image;
use libcontainer::network::{self, lease};
use libcontainer::pod;
use libcontainer::process::launcher;

use super::open_runtime;

#[derive(Parser, Debug)]
pub struct Cleanup {
    /// Everything below
    #[arg(long)]
    pub all: bool,

    /// Remove exited and dead containers
    #[arg(long)]
    pub containers: bool,

    /// Remove built images no container references
    #[arg(long)]
    pub images: bool,

    /// Kept for CLI compatibility; bind mounts leave nothing behind
    #[arg(long)]
    pub volumes: bool,
}

pub fn cleanup(args: Cleanup, root: PathBuf) -> Result<i32> {
    let (runtime, store) = open_runtime(root, false)?;

    let no_selection = !(args.all || args.containers || args.images || args.volumes);
    let containers = args.all || args.containers || no_selection;
    let images = args.all || args.images;

    if containers {
        for mut container in store.list_containers()? {
            container.refresh_status()?;
            if !container.status().can_remove() || container.status().can_start() {
                // running, or created-but-never-launched
                continue;
            }
            launcher::remove_all(&runtime, &store, &container);
            if let Some(pod_id) = &container.config.pod_id {
                pod::remove_member(&store, pod_id, container.id())?;
            }
            store.remove_container_dir(container.id())?;
            println!("removed container {}", container.id());
        }

        // the bridge and NAT rule go once the last lease is gone
        let _lock = store.network_lock()?;
        if lease::count(&store.network_dir()) == 0 {
            if let Err(err) = network::remove_bridge() {
                tracing::warn!(%err, "failed to remove bridge");
            }
        }
    }

    if images {
        let in_use: Vec<PathBuf> = store
            .list_containers()?
            .iter()
            .map(|c| c.config.image_root.clone())
            .collect();
        for image in image::list(&store)? {
            if image.rootfs.starts_with(store.images_dir()) && !in_use.contains(&image.rootfs) {
                let reference = image.reference();
                image::remove(&store, &reference)?;
                println!("removed image {reference}");
            }
        }
    }

    if args.volumes || args.all {
        tracing::info!("volumes are bind mounts; nothing to clean");
    }

    Ok(0)
}
