use std::path::{Path, PathBuf};

use chrono::Utc;
use nix::unistd::Pid;
use procfs::process::Process;

use crate::container::{ContainerConfig, ContainerStatus, State, StateError};
use crate::error::{Result, RuntimeError};

/// A container as materialised from its state-store directory.
#[derive(Debug, Clone)]
pub struct Container {
    pub config: ContainerConfig,
    pub state: State,
    root: PathBuf,
}

impl Container {
    pub const LOG_FILE: &'static str = "container.log";

    pub fn new(config: ContainerConfig, root: PathBuf) -> Self {
        let mut state = State::new(&config.id, config.name.clone());
        state.rootfs_mode = config.rootfs_mode;
        Self {
            config,
            state,
            root,
        }
    }

    pub fn load(root: PathBuf) -> Result<Self> {
        let config = ContainerConfig::load(&root)?;
        let state = State::load(&root)?;
        Ok(Self {
            config,
            state,
            root,
        })
    }

    pub fn save(&self) -> std::result::Result<(), StateError> {
        self.state.save(&self.root)
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn name(&self) -> Option<&str> {
        self.state.name.as_deref()
    }

    pub fn status(&self) -> ContainerStatus {
        self.state.status
    }

    pub fn pid(&self) -> Option<Pid> {
        self.state.pid.map(Pid::from_raw)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(Self::LOG_FILE)
    }

    pub fn rootfs_dir(&self) -> PathBuf {
        self.root.join("rootfs")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn can_start(&self) -> bool {
        self.state.status.can_start()
    }

    pub fn can_exec(&self) -> bool {
        self.state.status.can_exec()
    }

    pub fn can_stop(&self) -> bool {
        self.state.status.can_stop()
    }

    pub fn can_remove(&self) -> bool {
        self.state.status.can_remove()
    }

    /// Records the transition to running, snapshotting the kernel start
    /// time of the host pid so later invocations can detect pid reuse.
    pub fn mark_running(&mut self, pid: Pid) {
        self.state.status = ContainerStatus::Running;
        self.state.pid = Some(pid.as_raw());
        self.state.started_at = Some(Utc::now());
        self.state.start_time_ticks = Process::new(pid.as_raw())
            .and_then(|p| p.stat())
            .map(|stat| stat.starttime)
            .ok();
    }

    pub fn mark_exited(&mut self, exit_code: i32) {
        self.state.status = ContainerStatus::Exited;
        self.state.exit_code = Some(exit_code);
        self.state.finished_at = Some(Utc::now());
        self.state.pid = None;
        self.state.start_time_ticks = None;
    }

    pub fn mark_dead(&mut self) {
        self.state.status = ContainerStatus::Dead;
        self.state.finished_at = Some(Utc::now());
        self.state.pid = None;
        self.state.start_time_ticks = None;
    }

    /// Reconciles a possibly stale `running` state against `/proc`. The
    /// stored pid counts only if a process with the same kernel start
    /// time still exists; otherwise the container is rewritten as dead.
    pub fn refresh_status(&mut self) -> Result<()> {
        if self.state.status != ContainerStatus::Running {
            return Ok(());
        }

        let alive = match (self.state.pid, self.state.start_time_ticks) {
            (Some(pid), expected) => match Process::new(pid).and_then(|p| p.stat()) {
                Ok(stat) => expected.is_none() || expected == Some(stat.starttime),
                Err(_) => false,
            },
            (None, _) => false,
        };

        if !alive {
            tracing::debug!(id = %self.state.id, "running container has no live process, marking dead");
            self.mark_dead();
            self.save()?;
        }

        Ok(())
    }

    /// Validated pid of the running container, refusing reused pids.
    pub fn live_pid(&mut self) -> Result<Pid> {
        self.refresh_status()?;
        match (self.state.status, self.pid()) {
            (ContainerStatus::Running, Some(pid)) => Ok(pid),
            _ => Err(RuntimeError::StateConflict(format!(
                "container {} is not running",
                self.state.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::NetMode;

    fn sample(root: &Path) -> Container {
        let config = ContainerConfig::new(
            "0123456789ab".into(),
            PathBuf::from("/images/base"),
            vec!["/bin/sh".into()],
        );
        Container::new(config, root.to_owned())
    }

    #[test]
    fn test_new_container_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let container = sample(tmp.path());
        assert_eq!(container.status(), ContainerStatus::Created);
        assert!(container.can_start());
        assert!(container.pid().is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut container = sample(tmp.path());
        container.config.net_mode = NetMode::Bridge;
        container.config.save(tmp.path()).unwrap();
        container.mark_exited(143);
        container.save().unwrap();

        let loaded = Container::load(tmp.path().to_owned()).unwrap();
        assert_eq!(loaded.status(), ContainerStatus::Exited);
        assert_eq!(loaded.state.exit_code, Some(143));
        assert_eq!(loaded.config.net_mode, NetMode::Bridge);
    }

    #[test]
    fn test_refresh_marks_vanished_pid_dead() {
        let tmp = tempfile::tempdir().unwrap();
        let mut container = sample(tmp.path());
        container.state.status = ContainerStatus::Running;
        // pids cannot reach this value on Linux
        container.state.pid = Some(i32::MAX - 1);
        container.state.start_time_ticks = Some(1);

        container.refresh_status().unwrap();
        assert_eq!(container.status(), ContainerStatus::Dead);
        assert!(container.state.finished_at.is_some());
    }

    #[test]
    fn test_refresh_detects_pid_reuse() {
        let tmp = tempfile::tempdir().unwrap();
        let mut container = sample(tmp.path());
        container.state.status = ContainerStatus::Running;
        // our own pid is alive, but the recorded start time cannot match
        container.state.pid = Some(std::process::id() as i32);
        container.state.start_time_ticks = Some(u64::MAX);

        container.refresh_status().unwrap();
        assert_eq!(container.status(), ContainerStatus::Dead);
    }

    #[test]
    fn test_live_pid_refuses_exited() {
        let tmp = tempfile::tempdir().unwrap();
        let mut container = sample(tmp.path());
        container.mark_exited(0);
        assert!(container.live_pid().is_err());
    }
}
