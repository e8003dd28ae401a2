use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::common::{self, WrappedIoError, CGROUP_PROCS, CGROUP_SUBTREE};

use super::controller::Controller;
use super::cpu::Cpu;
use super::memory::Memory;
use super::pids::Pids;
use super::util::{self, CGROUP_SUBTREE_CONTROL, REQUIRED_CONTROLLERS};
use crate::common::Resources;

pub const CGROUP_KILL: &str = "cgroup.kill";
pub const MEMORY_EVENTS: &str = "memory.events";

#[derive(thiserror::Error, Debug)]
pub enum V2ManagerError {
    #[error(transparent)]
    WrappedIo(#[from] WrappedIoError),
    #[error("failed to create cgroup {path}: {err}")]
    Create { err: std::io::Error, path: PathBuf },
    #[error("controller {0} is not available in the parent cgroup")]
    ControllerMissing(String),
    #[error("failed to signal cgroup member {pid}: {errno}")]
    Kill { errno: nix::Error, pid: Pid },
}

pub struct Manager {
    root_path: PathBuf,
    full_path: PathBuf,
}

impl Manager {
    /// `root_path` is the delegated cgroup v2 root for the current mode;
    /// the container leaf becomes `<root>/mini-docker/<id>`.
    pub fn new(root_path: PathBuf, id: &str) -> Self {
        let full_path = root_path.join(CGROUP_SUBTREE).join(id);
        Self {
            root_path,
            full_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.full_path
    }

    pub fn exists(&self) -> bool {
        self.full_path.exists()
    }

    /// Creates the leaf, enabling the required controllers on every
    /// ancestor up to (but not including) the leaf itself. The leaf must
    /// stay free of enabled controllers until processes are enrolled.
    pub fn create(&self) -> Result<(), V2ManagerError> {
        let available = util::get_available_controllers(&self.root_path)?;
        for required in REQUIRED_CONTROLLERS {
            if !available.iter().any(|c| c == required) {
                return Err(V2ManagerError::ControllerMissing(required.to_string()));
            }
        }

        let controllers: Vec<String> = REQUIRED_CONTROLLERS
            .iter()
            .map(|c| format!("+{c}"))
            .collect();

        // subtree_control is enabled on every ancestor but never on the
        // leaf itself, or enrolling processes fails with EBUSY
        let mut current = self.root_path.clone();
        let relative = self.full_path.strip_prefix(&self.root_path).unwrap();
        for component in relative.components() {
            Self::write_controllers(&current, &controllers)?;
            current = current.join(component);
            if !current.exists() {
                fs::create_dir(&current).map_err(|err| V2ManagerError::Create {
                    err,
                    path: current.clone(),
                })?;
            }
        }

        Ok(())
    }

    fn write_controllers(path: &Path, controllers: &[String]) -> Result<(), WrappedIoError> {
        for controller in controllers {
            common::write_cgroup_file_str(path.join(CGROUP_SUBTREE_CONTROL), controller)?;
        }
        Ok(())
    }

    pub fn apply(&self, resources: &Resources) -> Result<(), V2ManagerError> {
        Cpu::apply(resources, &self.full_path)?;
        Memory::apply(resources, &self.full_path)?;
        Pids::apply(resources, &self.full_path)?;
        Ok(())
    }

    /// Enrolls a process into the leaf.
    pub fn add_task(&self, pid: Pid) -> Result<(), V2ManagerError> {
        common::write_cgroup_file(self.full_path.join(CGROUP_PROCS), pid)?;
        Ok(())
    }

    pub fn get_all_pids(&self) -> Result<Vec<Pid>, V2ManagerError> {
        Ok(common::get_all_pids(&self.full_path)?)
    }

    pub fn memory_events_path(&self) -> PathBuf {
        self.full_path.join(MEMORY_EVENTS)
    }

    /// Number of tasks the kernel OOM killer has reaped in this leaf.
    pub fn oom_kill_count(&self) -> u64 {
        let Ok(content) = common::read_cgroup_file(self.memory_events_path()) else {
            return 0;
        };
        content
            .lines()
            .find_map(|line| line.strip_prefix("oom_kill "))
            .and_then(|count| count.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Kills every member of the leaf. Uses `cgroup.kill` when the kernel
    /// provides it, otherwise SIGKILLs each enrolled pid.
    pub fn kill_all(&self) -> Result<(), V2ManagerError> {
        if !self.exists() {
            return Ok(());
        }

        let kill_file = self.full_path.join(CGROUP_KILL);
        if kill_file.exists() {
            common::write_cgroup_file_str(kill_file, "1")?;
            return Ok(());
        }

        for pid in self.get_all_pids()? {
            match signal::kill(pid, Signal::SIGKILL) {
                Ok(()) | Err(nix::Error::ESRCH) => {}
                Err(errno) => return Err(V2ManagerError::Kill { errno, pid }),
            }
        }
        Ok(())
    }

    /// Kills all members and removes the leaf directory.
    pub fn remove(&self) -> Result<(), V2ManagerError> {
        if !self.exists() {
            return Ok(());
        }

        tracing::debug!(path = ?self.full_path, "removing cgroup");
        self.kill_all()?;
        common::delete_with_retry(&self.full_path, 4, Duration::from_millis(100))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_leaf_path_layout() {
        let manager = Manager::new(PathBuf::from("/sys/fs/cgroup"), "0123456789ab");
        assert_eq!(
            manager.path(),
            Path::new("/sys/fs/cgroup/mini-docker/0123456789ab")
        );
    }

    #[test]
    fn test_create_rejects_missing_controller() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), "cgroup.controllers", "cpu memory\n").unwrap();
        set_fixture(tmp.path(), CGROUP_SUBTREE_CONTROL, "").unwrap();

        let manager = Manager::new(tmp.path().to_owned(), "deadbeef0000");
        let err = manager.create().unwrap_err();
        assert!(matches!(err, V2ManagerError::ControllerMissing(c) if c == "pids"));
    }

    #[test]
    fn test_oom_kill_count() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = Manager::new(tmp.path().to_owned(), "deadbeef0000");
        assert_eq!(manager.oom_kill_count(), 0);

        fs::create_dir_all(manager.path()).unwrap();
        set_fixture(manager.path(), MEMORY_EVENTS, "low 0\nhigh 3\nmax 7\noom 2\noom_kill 2\n")
            .unwrap();
        assert_eq!(manager.oom_kill_count(), 2);
    }

    #[test]
    fn test_remove_missing_leaf_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = Manager::new(tmp.path().to_owned(), "deadbeef0000");
        manager.remove().unwrap();
    }
}
