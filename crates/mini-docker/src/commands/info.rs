//! `info`: runtime and host report.

use std::path::PathBuf;

use clap::Parser;

use libcontainer::error::Result;

use super::open_runtime;

#[derive(Parser, Debug)]
pub struct Info {}

pub fn info(_args: Info, root: PathBuf) -> Result<i32> {
    let (runtime, store) = open_runtime(root, false)?;
    let profile = runtime.profile();

    println!("version: {}", clap::crate_version!());
    println!("state root: {}", runtime.root().display());
    println!("rootless: {}", profile.rootless);
    println!("cgroup root: {}", runtime.cgroup_root().display());
    println!(
        "cgroup v2: {}",
        runtime.cgroup_root().join("cgroup.controllers").exists()
    );
    println!("can mount: {}", profile.can_mount);
    println!("can write cgroups: {}", profile.can_write_cgroups);
    println!("can create veth: {}", profile.can_create_veth);

    if let Ok(release) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
        println!("kernel: {}", release.trim());
    }

    let containers = store.list_containers()?;
    println!("containers: {}", containers.len());
    println!("images: {}", libcontainer::image::list(&store)?.len());
    println!("pods: {}", store.list_pod_ids()?.len());

    Ok(0)
}
