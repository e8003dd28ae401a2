//! The on-disk state store, source of truth across invocations.
//!
//! ```text
//! <root>/containers/<id>/{config.json,state.json,container.log,rootfs/}
//! <root>/pods/<id>/{pod.json,ns/}
//! <root>/images/<name_tag>.json
//! <root>/network/{leases.json,.lock}
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::container::Container;
use crate::utils;

pub const CONTAINERS_DIR: &str = "containers";
pub const PODS_DIR: &str = "pods";
pub const IMAGES_DIR: &str = "images";
pub const NETWORK_DIR: &str = "network";

/// Shortest accepted id prefix for lookup.
const MIN_PREFIX: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access state store: {0}")]
    Io(#[from] std::io::Error),
    #[error("no such container: {0}")]
    NotFound(String),
    #[error("container reference {0:?} is ambiguous")]
    Ambiguous(String),
    #[error("container name {0:?} is already in use")]
    NameTaken(String),
    #[error("failed to lock {path}: {errno}")]
    Lock { errno: nix::Error, path: PathBuf },
}

type Result<T> = std::result::Result<T, StoreError>;

/// Advisory exclusive lock, released on drop.
pub struct FlockGuard {
    _lock: Flock<File>,
}

fn flock_exclusive(path: &Path) -> Result<FlockGuard> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    let lock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
        StoreError::Lock {
            errno,
            path: path.to_owned(),
        }
    })?;
    Ok(FlockGuard { _lock: lock })
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: PathBuf) -> Result<Self> {
        let store = Self { root };
        for dir in [
            store.containers_dir(),
            store.pods_dir(),
            store.images_dir(),
            store.network_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.root.join(CONTAINERS_DIR)
    }

    pub fn pods_dir(&self) -> PathBuf {
        self.root.join(PODS_DIR)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn network_dir(&self) -> PathBuf {
        self.root.join(NETWORK_DIR)
    }

    pub fn container_root(&self, id: &str) -> PathBuf {
        self.containers_dir().join(id)
    }

    pub fn pod_root(&self, id: &str) -> PathBuf {
        self.pods_dir().join(id)
    }

    /// Allocates an id that does not collide with an existing container.
    pub fn allocate_id(&self) -> String {
        loop {
            let id = utils::generate_id();
            if !self.container_root(&id).exists() {
                return id;
            }
        }
    }

    pub fn create_container_dir(&self, id: &str) -> Result<PathBuf> {
        let root = self.container_root(id);
        fs::create_dir_all(&root)?;
        Ok(root)
    }

    pub fn remove_container_dir(&self, id: &str) -> Result<()> {
        let root = self.container_root(id);
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        Ok(())
    }

    pub fn list_container_ids(&self) -> Result<Vec<String>> {
        let mut ids = vec![];
        for entry in fs::read_dir(self.containers_dir())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// All loadable containers; directories with broken metadata are
    /// skipped with a warning rather than failing the listing.
    pub fn list_containers(&self) -> Result<Vec<Container>> {
        let mut containers = vec![];
        for id in self.list_container_ids()? {
            match Container::load(self.container_root(&id)) {
                Ok(container) => containers.push(container),
                Err(err) => tracing::warn!(id, %err, "skipping unreadable container"),
            }
        }
        Ok(containers)
    }

    /// Resolves a full id, a name (live containers only), or a unique id
    /// prefix of at least three characters.
    pub fn resolve_container(&self, query: &str) -> Result<Container> {
        if self.container_root(query).join("config.json").exists() {
            return Container::load(self.container_root(query))
                .map_err(|_| StoreError::NotFound(query.to_owned()));
        }

        let containers = self.list_containers()?;

        if let Some(by_name) = containers
            .iter()
            .find(|c| c.status().is_live() && c.name() == Some(query))
        {
            return Ok(by_name.clone());
        }

        if query.len() >= MIN_PREFIX {
            let matches: Vec<&Container> = containers
                .iter()
                .filter(|c| c.id().starts_with(query))
                .collect();
            match matches.as_slice() {
                [one] => return Ok((*one).clone()),
                [] => {}
                _ => return Err(StoreError::Ambiguous(query.to_owned())),
            }
        }

        Err(StoreError::NotFound(query.to_owned()))
    }

    /// Enforces name uniqueness among live containers.
    pub fn ensure_name_free(&self, name: &str) -> Result<()> {
        for container in self.list_containers()? {
            if container.status().is_live() && container.name() == Some(name) {
                return Err(StoreError::NameTaken(name.to_owned()));
            }
        }
        Ok(())
    }

    /// Serialises stop/rm/exec on one container.
    pub fn lock_container(&self, id: &str) -> Result<FlockGuard> {
        flock_exclusive(&self.container_root(id).join(".lock"))
    }

    /// Serialises bridge setup and lease mutation.
    pub fn network_lock(&self) -> Result<FlockGuard> {
        flock_exclusive(&self.network_dir().join(".lock"))
    }

    pub fn list_pod_ids(&self) -> Result<Vec<String>> {
        let mut ids = vec![];
        for entry in fs::read_dir(self.pods_dir())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerConfig, ContainerStatus};

    fn seed(store: &Store, id: &str, name: Option<&str>, status: ContainerStatus) {
        let root = store.create_container_dir(id).unwrap();
        let mut config = ContainerConfig::new(
            id.to_owned(),
            PathBuf::from("/images/base"),
            vec!["/bin/sh".into()],
        );
        config.name = name.map(str::to_owned);
        config.save(&root).unwrap();

        let mut container = Container::new(config, root);
        match status {
            ContainerStatus::Exited => container.mark_exited(0),
            ContainerStatus::Dead => container.mark_dead(),
            _ => {}
        }
        container.save().unwrap();
    }

    #[test]
    fn test_layout_created() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();
        assert!(store.containers_dir().is_dir());
        assert!(store.pods_dir().is_dir());
        assert!(store.images_dir().is_dir());
        assert!(store.network_dir().is_dir());
    }

    #[test]
    fn test_resolve_by_full_id_name_and_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();
        seed(&store, "aabbcc112233", Some("web"), ContainerStatus::Created);
        seed(&store, "ddeeff445566", None, ContainerStatus::Created);

        assert_eq!(store.resolve_container("aabbcc112233").unwrap().id(), "aabbcc112233");
        assert_eq!(store.resolve_container("web").unwrap().id(), "aabbcc112233");
        assert_eq!(store.resolve_container("ddee").unwrap().id(), "ddeeff445566");
        assert!(matches!(
            store.resolve_container("nosuch"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_prefix_rules() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();
        seed(&store, "abc111111111", None, ContainerStatus::Created);
        seed(&store, "abc222222222", None, ContainerStatus::Created);

        // ambiguous prefix
        assert!(matches!(
            store.resolve_container("abc"),
            Err(StoreError::Ambiguous(_))
        ));
        // too-short prefix never matches
        assert!(matches!(
            store.resolve_container("ab"),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.resolve_container("abc1").unwrap().id(), "abc111111111");
    }

    #[test]
    fn test_name_uniqueness_among_live_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();
        seed(&store, "aaa111111111", Some("web"), ContainerStatus::Dead);
        // the name of a dead container is reusable
        store.ensure_name_free("web").unwrap();

        seed(&store, "bbb222222222", Some("web"), ContainerStatus::Exited);
        assert!(matches!(
            store.ensure_name_free("web"),
            Err(StoreError::NameTaken(_))
        ));
    }

    #[test]
    fn test_allocate_id_avoids_collisions() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();
        let id = store.allocate_id();
        assert_eq!(id.len(), 12);
        assert!(!store.container_root(&id).exists());
    }

    #[test]
    fn test_container_lock_guard() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();
        store.create_container_dir("aaa111111111").unwrap();

        let guard = store.lock_container("aaa111111111").unwrap();
        drop(guard);
        // relockable after release
        let _guard = store.lock_container("aaa111111111").unwrap();
    }
}
