use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

pub const CGROUP_PROCS: &str = "cgroup.procs";
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Name of the runtime subtree all container leaves live under.
pub const CGROUP_SUBTREE: &str = "mini-docker";

#[derive(thiserror::Error, Debug)]
pub enum WrappedIoError {
    #[error("failed to open {path}: {err}")]
    Open { err: std::io::Error, path: PathBuf },
    #[error("failed to write {data} to {path}: {err}")]
    Write {
        err: std::io::Error,
        data: String,
        path: PathBuf,
    },
    #[error("failed to read {path}: {err}")]
    Read { err: std::io::Error, path: PathBuf },
    #[error("failed to create directory {path}: {err}")]
    CreateDir { err: std::io::Error, path: PathBuf },
    #[error("failed to remove {path}: {err}")]
    Remove { err: std::io::Error, path: PathBuf },
}

/// Resource limits applied to a container leaf. Unset fields leave the
/// kernel default (`max`) in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub memory_bytes: Option<u64>,
    pub cpu_percent: Option<u64>,
    pub pids_max: Option<i64>,
}

impl Resources {
    pub fn any_set(&self) -> bool {
        self.memory_bytes.is_some() || self.cpu_percent.is_some() || self.pids_max.is_some()
    }
}

/// Mount point of the unified hierarchy for the current mode. In rootless
/// mode limits can only be written inside the systemd user-delegated
/// subtree.
pub fn default_root(rootless: bool, uid: u32) -> PathBuf {
    if !rootless {
        return PathBuf::from(DEFAULT_CGROUP_ROOT);
    }

    PathBuf::from(format!(
        "{DEFAULT_CGROUP_ROOT}/user.slice/user-{uid}.slice/user@{uid}.service/app.slice"
    ))
}

pub fn write_cgroup_file_str<P: AsRef<Path>>(path: P, data: &str) -> Result<(), WrappedIoError> {
    let path = path.as_ref();

    OpenOptions::new()
        .create(false)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|err| WrappedIoError::Open {
            err,
            path: path.to_owned(),
        })?
        .write_all(data.as_bytes())
        .map_err(|err| WrappedIoError::Write {
            err,
            data: data.into(),
            path: path.to_owned(),
        })?;

    Ok(())
}

pub fn write_cgroup_file<P: AsRef<Path>, T: Display>(
    path: P,
    data: T,
) -> Result<(), WrappedIoError> {
    write_cgroup_file_str(path, &data.to_string())
}

pub fn read_cgroup_file<P: AsRef<Path>>(path: P) -> Result<String, WrappedIoError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|err| WrappedIoError::Read {
        err,
        path: path.to_owned(),
    })
}

/// Pids currently enrolled in the leaf.
pub fn get_all_pids<P: AsRef<Path>>(path: P) -> Result<Vec<Pid>, WrappedIoError> {
    let procs = path.as_ref().join(CGROUP_PROCS);
    if !procs.exists() {
        return Ok(vec![]);
    }

    let content = read_cgroup_file(&procs)?;
    Ok(content
        .lines()
        .filter_map(|line| line.trim().parse::<i32>().ok())
        .map(Pid::from_raw)
        .collect())
}

/// A populated cgroup directory cannot be removed until the kernel has
/// reaped all members, so removal is retried with a small backoff.
pub fn delete_with_retry<P: AsRef<Path>>(
    path: P,
    retries: u32,
    delay: Duration,
) -> Result<(), WrappedIoError> {
    let path = path.as_ref();
    let mut attempts = 0;

    while attempts < retries {
        if fs::remove_dir(path).is_ok() {
            return Ok(());
        }
        thread::sleep(delay);
        attempts += 1;
    }

    fs::remove_dir(path).map_err(|err| WrappedIoError::Remove {
        err,
        path: path.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_write_cgroup_file_requires_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        // cgroupfs interface files always exist; creation is an error
        assert!(write_cgroup_file(tmp.path().join("memory.max"), 42).is_err());

        set_fixture(tmp.path(), "memory.max", "max").unwrap();
        write_cgroup_file(tmp.path().join("memory.max"), 42).unwrap();
        let content = read_cgroup_file(tmp.path().join("memory.max")).unwrap();
        assert_eq!(content, "42");
    }

    #[test]
    fn test_get_all_pids() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_PROCS, "100\n200\n").unwrap();

        let pids = get_all_pids(tmp.path()).unwrap();
        assert_eq!(pids, vec![Pid::from_raw(100), Pid::from_raw(200)]);
    }

    #[test]
    fn test_get_all_pids_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(get_all_pids(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_default_root() {
        assert_eq!(default_root(false, 1000), PathBuf::from("/sys/fs/cgroup"));
        let rootless = default_root(true, 1000);
        assert!(rootless
            .to_string_lossy()
            .contains("user-1000.slice/user@1000.service"));
    }

    #[test]
    fn test_resources_any_set() {
        assert!(!Resources::default().any_set());
        assert!(Resources {
            memory_bytes: Some(1),
            ..Default::default()
        }
        .any_set());
    }
}
