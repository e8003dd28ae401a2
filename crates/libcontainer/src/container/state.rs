//! Status and state of a container as persisted in `state.json`.

use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rootfs::RootfsMode;
use crate::utils;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    // allocated but never launched
    #[default]
    Created,
    // the user command is executing
    Running,
    // the user command exited and the code was recorded
    Exited,
    // the host process disappeared without a recorded exit
    Dead,
}

impl ContainerStatus {
    pub fn can_start(&self) -> bool {
        matches!(self, ContainerStatus::Created)
    }

    pub fn can_exec(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    pub fn can_remove(&self) -> bool {
        use ContainerStatus::*;
        match self {
            Running => false,
            Created | Exited | Dead => true,
        }
    }

    /// Live containers hold the name-uniqueness invariant.
    pub fn is_live(&self) -> bool {
        !matches!(self, ContainerStatus::Dead)
    }
}

impl Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Dead => "dead",
        };
        write!(f, "{print}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to open state file {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse state file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write state file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, StateError>;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct State {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    /// Kernel start time of `pid` in clock ticks, read from
    /// `/proc/<pid>/stat`. Guards against host pid reuse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time_ticks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub rootfs_mode: RootfsMode,
}

impl State {
    const STATE_FILE_PATH: &'static str = "state.json";

    pub fn new(id: &str, name: Option<String>) -> Self {
        Self {
            id: id.to_owned(),
            name,
            status: ContainerStatus::Created,
            pid: None,
            start_time_ticks: None,
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            rootfs_mode: RootfsMode::Overlay,
        }
    }

    pub fn save(&self, container_root: &Path) -> Result<()> {
        let path = Self::file_path(container_root);
        utils::atomic_write_json(&path, self).map_err(|source| StateError::Write {
            path: path.clone(),
            source,
        })
    }

    pub fn load(container_root: &Path) -> Result<Self> {
        let path = Self::file_path(container_root);
        let file = File::open(&path).map_err(|source| StateError::Open {
            path: path.clone(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| StateError::Parse {
            path: path.clone(),
            source,
        })
    }

    pub fn file_path(container_root: &Path) -> PathBuf {
        container_root.join(Self::STATE_FILE_PATH)
    }
}
