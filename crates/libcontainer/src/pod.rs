//! Pods: groups of containers sharing network, IPC and UTS namespaces.
//!
//! The shared namespaces are created by a short-lived placeholder process
//! and kept alive by bind-mounting its `/proc/<pid>/ns/*` entries under
//! the pod directory ("namespace pinning"). The placeholder then exits;
//! the namespaces live until the bind mounts are removed by `pod rm`.

use std::fs::{self, File};
use std::io::BufReader;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::mount::MntFlags;
use nix::sched::CloneFlags;
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};
use crate::network;
use crate::process::channel;
use crate::runtime::Runtime;
use crate::store::Store;
use crate::syscall::create_syscall;
use crate::utils;

/// Namespace kinds a pod pins, with the `/proc/<pid>/ns` entry name and
/// the flag used both for unsharing and joining.
pub const PINNED_NAMESPACES: [(&str, CloneFlags); 3] = [
    ("net", CloneFlags::CLONE_NEWNET),
    ("ipc", CloneFlags::CLONE_NEWIPC),
    ("uts", CloneFlags::CLONE_NEWUTS),
];

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Pod {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    pub shared_namespaces: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Pod {
    const POD_FILE: &'static str = "pod.json";

    pub fn save(&self, pod_root: &Path) -> Result<()> {
        utils::atomic_write_json(&pod_root.join(Self::POD_FILE), self)?;
        Ok(())
    }

    pub fn load(pod_root: &Path) -> Result<Self> {
        let file = File::open(pod_root.join(Self::POD_FILE))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn ns_dir(pod_root: &Path) -> PathBuf {
        pod_root.join("ns")
    }
}

/// Resolves a pod by id, name, or unique id prefix.
pub fn resolve_pod(store: &Store, query: &str) -> Result<Pod> {
    let exact = store.pod_root(query);
    if exact.join("pod.json").exists() {
        return Pod::load(&exact);
    }

    let mut pods = vec![];
    for id in store.list_pod_ids()? {
        if let Ok(pod) = Pod::load(&store.pod_root(&id)) {
            pods.push(pod);
        }
    }

    if let Some(pod) = pods.iter().find(|p| p.name == query) {
        return Ok(pod.clone());
    }

    if query.len() >= 3 {
        let matches: Vec<&Pod> = pods.iter().filter(|p| p.id.starts_with(query)).collect();
        if let [pod] = matches.as_slice() {
            return Ok((*pod).clone());
        }
    }

    Err(RuntimeError::StateConflict(format!("no such pod: {query}")))
}

/// Creates a pod: unshares the shared namespaces in a placeholder
/// process and pins them under `pods/<id>/ns/`.
pub fn create_pod(runtime: &Runtime, store: &Store, name: &str) -> Result<Pod> {
    if !runtime.profile().can_mount {
        return Err(RuntimeError::StateConflict(
            "pod create requires privileged mode (namespace pinning bind-mounts nsfs)".into(),
        ));
    }

    for id in store.list_pod_ids()? {
        if let Ok(existing) = Pod::load(&store.pod_root(&id)) {
            if existing.name == name {
                return Err(RuntimeError::StateConflict(format!(
                    "pod name {name:?} is already in use"
                )));
            }
        }
    }

    let id = utils::generate_id();
    let pod_root = store.pod_root(&id);
    let ns_dir = Pod::ns_dir(&pod_root);
    fs::create_dir_all(&ns_dir)?;

    let (ready_tx, ready_rx) = &mut channel::channel::<u8>().map_err(channel_err)?;
    let (done_tx, done_rx) = &mut channel::channel::<u8>().map_err(channel_err)?;

    let unshare_flags =
        CloneFlags::CLONE_NEWNET | CloneFlags::CLONE_NEWIPC | CloneFlags::CLONE_NEWUTS;

    match unsafe { unistd::fork() }.map_err(|errno| {
        RuntimeError::Other(format!("failed to fork pod placeholder: {errno}"))
    })? {
        ForkResult::Child => {
            let code = pod_placeholder(unshare_flags, ready_tx, done_rx);
            std::process::exit(code);
        }
        ForkResult::Parent { child } => {
            let result = (|| -> Result<()> {
                ready_rx.recv().map_err(channel_err)?;

                let proc_ns = PathBuf::from("/proc").join(child.to_string()).join("ns");
                let syscall = create_syscall();
                for (ns_name, _) in PINNED_NAMESPACES {
                    let target = ns_dir.join(ns_name);
                    File::create(&target)?;
                    syscall.mount(
                        Some(&proc_ns.join(ns_name)),
                        &target,
                        None,
                        nix::mount::MsFlags::MS_BIND,
                        None,
                    )?;
                }
                Ok(())
            })();

            let _ = done_tx.send(1);
            let _ = waitpid(child, None);

            if let Err(err) = result {
                remove_pinned_namespaces(&pod_root);
                let _ = fs::remove_dir_all(&pod_root);
                return Err(err);
            }
        }
    }

    let pod = Pod {
        id,
        name: name.to_owned(),
        members: vec![],
        shared_namespaces: PINNED_NAMESPACES
            .iter()
            .map(|(name, _)| name.to_string())
            .collect(),
        created_at: Utc::now(),
    };
    pod.save(&pod_root)?;
    tracing::info!(id = %pod.id, name, "created pod");
    Ok(pod)
}

fn pod_placeholder(
    flags: CloneFlags,
    ready_tx: &mut channel::Sender<u8>,
    done_rx: &mut channel::Receiver<u8>,
) -> i32 {
    let syscall = create_syscall();
    if let Err(err) = syscall.unshare(flags) {
        tracing::error!(%err, "pod placeholder failed to unshare");
        return 1;
    }
    // the pod's loopback comes up once, here
    if let Err(err) = network::loopback_up() {
        tracing::warn!(%err, "failed to bring up pod loopback");
    }
    if ready_tx.send(1).is_err() {
        return 1;
    }
    // stay alive until the parent has pinned /proc/<pid>/ns/*
    let _ = done_rx.recv();
    0
}

fn channel_err(err: channel::ChannelError) -> RuntimeError {
    RuntimeError::Other(format!("pod channel failed: {err}"))
}

/// Opens the pinned namespace handles for a member launch, in join
/// order. A removed pod surfaces as a clean error.
pub fn open_namespace_handles(
    store: &Store,
    pod_id: &str,
) -> Result<Vec<(CloneFlags, OwnedFd)>> {
    let ns_dir = Pod::ns_dir(&store.pod_root(pod_id));
    let mut handles = vec![];
    for (ns_name, flag) in PINNED_NAMESPACES {
        let path = ns_dir.join(ns_name);
        let file = File::open(&path).map_err(|_| {
            RuntimeError::StateConflict(format!(
                "pod {pod_id} namespace handle {ns_name} is gone (pod removed?)"
            ))
        })?;
        handles.push((flag, OwnedFd::from(file)));
    }
    Ok(handles)
}

pub fn add_member(store: &Store, pod_id: &str, container_id: &str) -> Result<()> {
    let pod_root = store.pod_root(pod_id);
    let mut pod = Pod::load(&pod_root)?;
    if !pod.members.iter().any(|m| m == container_id) {
        pod.members.push(container_id.to_owned());
        pod.save(&pod_root)?;
    }
    Ok(())
}

pub fn remove_member(store: &Store, pod_id: &str, container_id: &str) -> Result<()> {
    let pod_root = store.pod_root(pod_id);
    let Ok(mut pod) = Pod::load(&pod_root) else {
        // weak reference: the pod may already be gone
        return Ok(());
    };
    pod.members.retain(|m| m != container_id);
    pod.save(&pod_root)?;
    Ok(())
}

fn remove_pinned_namespaces(pod_root: &Path) {
    let syscall = create_syscall();
    for (ns_name, _) in PINNED_NAMESPACES {
        let handle = Pod::ns_dir(pod_root).join(ns_name);
        if handle.exists() {
            // dropping the bind mount releases the namespace once the
            // last member dies
            let _ = syscall.umount2(&handle, MntFlags::MNT_DETACH);
        }
    }
}

/// Removes a pod. Refuses while members are running unless forced.
pub fn remove_pod(store: &Store, pod: &Pod, force: bool) -> Result<()> {
    let mut running = vec![];
    for member in &pod.members {
        if let Ok(mut container) = store.resolve_container(member) {
            container.refresh_status()?;
            if container.status().can_stop() {
                running.push(member.clone());
            }
        }
    }

    if !running.is_empty() && !force {
        return Err(RuntimeError::StateConflict(format!(
            "pod {} has running members ({}); use --force",
            pod.id,
            running.join(", ")
        )));
    }

    let pod_root = store.pod_root(&pod.id);
    remove_pinned_namespaces(&pod_root);
    fs::remove_dir_all(&pod_root)?;
    tracing::info!(id = %pod.id, "removed pod");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let pod = Pod {
            id: "deadbeef0000".into(),
            name: "web".into(),
            members: vec!["aaa".into()],
            shared_namespaces: vec!["net".into(), "ipc".into(), "uts".into()],
            created_at: Utc::now(),
        };
        pod.save(tmp.path()).unwrap();

        let loaded = Pod::load(tmp.path()).unwrap();
        assert_eq!(loaded.id, "deadbeef0000");
        assert_eq!(loaded.members, vec!["aaa"]);
        assert_eq!(loaded.shared_namespaces.len(), 3);
    }

    #[test]
    fn test_resolve_pod_by_name_and_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();

        let pod = Pod {
            id: "deadbeef0000".into(),
            name: "web".into(),
            members: vec![],
            shared_namespaces: vec![],
            created_at: Utc::now(),
        };
        let root = store.pod_root(&pod.id);
        fs::create_dir_all(&root).unwrap();
        pod.save(&root).unwrap();

        assert_eq!(resolve_pod(&store, "web").unwrap().id, "deadbeef0000");
        assert_eq!(resolve_pod(&store, "dead").unwrap().id, "deadbeef0000");
        assert!(resolve_pod(&store, "nope").is_err());
    }

    #[test]
    fn test_member_bookkeeping() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();

        let pod = Pod {
            id: "deadbeef0000".into(),
            name: "web".into(),
            members: vec![],
            shared_namespaces: vec![],
            created_at: Utc::now(),
        };
        let root = store.pod_root(&pod.id);
        fs::create_dir_all(&root).unwrap();
        pod.save(&root).unwrap();

        add_member(&store, "deadbeef0000", "c1").unwrap();
        add_member(&store, "deadbeef0000", "c1").unwrap();
        assert_eq!(Pod::load(&root).unwrap().members, vec!["c1"]);

        remove_member(&store, "deadbeef0000", "c1").unwrap();
        assert!(Pod::load(&root).unwrap().members.is_empty());

        // removing from a vanished pod is not an error
        remove_member(&store, "missing00000", "c1").unwrap();
    }

    #[test]
    fn test_open_handles_of_removed_pod_fails_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();
        let err = open_namespace_handles(&store, "missing00000").unwrap_err();
        assert!(matches!(err, RuntimeError::StateConflict(_)));
    }
}
