//! Persistent container configuration (`config.json`).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use libcgroups::common::Resources;

use crate::rootfs::RootfsMode;
use crate::utils;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase", tag = "type", content = "pod_id")]
pub enum NetMode {
    #[default]
    None,
    Bridge,
    Pod(String),
}

/// Numeric identity the container process assumes, parsed from
/// `uid[:gid]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSpec {
    pub uid: u32,
    pub gid: u32,
}

impl Default for UserSpec {
    fn default() -> Self {
        Self { uid: 0, gid: 0 }
    }
}

impl FromStr for UserSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uid, gid) = match s.split_once(':') {
            Some((uid, gid)) => (uid, Some(gid)),
            None => (s, None),
        };
        let uid: u32 = uid
            .parse()
            .map_err(|_| format!("invalid uid in user spec {s:?}"))?;
        let gid = match gid {
            Some(gid) => gid
                .parse()
                .map_err(|_| format!("invalid gid in user spec {s:?}"))?,
            None => uid,
        };
        Ok(Self { uid, gid })
    }
}

/// A user-requested bind mount, parsed from `host:container[:ro]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

impl FromStr for BindMount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [host, container] => Ok(Self {
                host_path: PathBuf::from(host),
                container_path: PathBuf::from(container),
                read_only: false,
            }),
            [host, container, "ro"] => Ok(Self {
                host_path: PathBuf::from(host),
                container_path: PathBuf::from(container),
                read_only: true,
            }),
            [host, container, "rw"] => Ok(Self {
                host_path: PathBuf::from(host),
                container_path: PathBuf::from(container),
                read_only: false,
            }),
            _ => Err(format!("invalid volume spec {s:?}, expected host:container[:ro]")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContainerConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Absolute path of the read-only lower rootfs.
    pub image_root: PathBuf,
    pub argv: Vec<String>,
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    pub user: UserSpec,
    pub hostname: String,
    pub limits: Resources,
    pub mounts: Vec<BindMount>,
    pub net_mode: NetMode,
    pub rootfs_mode: RootfsMode,
    pub rootless: bool,
    pub tty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<String>,
}

impl ContainerConfig {
    const CONFIG_FILE_PATH: &'static str = "config.json";

    pub fn new(id: String, image_root: PathBuf, argv: Vec<String>) -> Self {
        let hostname = id.clone();
        Self {
            id,
            name: None,
            image_root,
            argv,
            env: vec![],
            workdir: None,
            user: UserSpec::default(),
            hostname,
            limits: Resources::default(),
            mounts: vec![],
            net_mode: NetMode::default(),
            rootfs_mode: RootfsMode::Overlay,
            rootless: false,
            tty: false,
            pod_id: None,
        }
    }

    pub fn save(&self, container_root: &Path) -> std::io::Result<()> {
        utils::atomic_write_json(&Self::file_path(container_root), self)
    }

    pub fn load(container_root: &Path) -> std::io::Result<Self> {
        let file = File::open(Self::file_path(container_root))?;
        serde_json::from_reader(BufReader::new(file)).map_err(std::io::Error::from)
    }

    pub fn file_path(container_root: &Path) -> PathBuf {
        container_root.join(Self::CONFIG_FILE_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_spec_parsing() {
        assert_eq!("0".parse::<UserSpec>().unwrap(), UserSpec { uid: 0, gid: 0 });
        assert_eq!(
            "1000:100".parse::<UserSpec>().unwrap(),
            UserSpec {
                uid: 1000,
                gid: 100
            }
        );
        assert!("nobody".parse::<UserSpec>().is_err());
        assert!("1:2:3".parse::<UserSpec>().is_err());
    }

    #[test]
    fn test_bind_mount_parsing() {
        let mount: BindMount = "/data:/mnt".parse().unwrap();
        assert_eq!(mount.host_path, PathBuf::from("/data"));
        assert_eq!(mount.container_path, PathBuf::from("/mnt"));
        assert!(!mount.read_only);

        let mount: BindMount = "/data:/mnt:ro".parse().unwrap();
        assert!(mount.read_only);

        assert!("".parse::<BindMount>().is_err());
        assert!("/only-host".parse::<BindMount>().is_err());
        assert!("/a:/b:rx".parse::<BindMount>().is_err());
    }

    #[test]
    fn test_net_mode_serialization() {
        let json = serde_json::to_string(&NetMode::Pod("abc123".into())).unwrap();
        assert_eq!(json, r#"{"type":"pod","pod_id":"abc123"}"#);

        let mode: NetMode = serde_json::from_str(r#"{"type":"bridge"}"#).unwrap();
        assert_eq!(mode, NetMode::Bridge);
    }

    #[test]
    fn test_config_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ContainerConfig::new(
            "0123456789ab".into(),
            PathBuf::from("/images/base"),
            vec!["/bin/sh".into()],
        );
        config.env.push("PATH=/usr/bin:/bin".into());
        config.net_mode = NetMode::Bridge;
        config.save(tmp.path()).unwrap();

        let loaded = ContainerConfig::load(tmp.path()).unwrap();
        assert_eq!(loaded.id, "0123456789ab");
        assert_eq!(loaded.hostname, "0123456789ab");
        assert_eq!(loaded.net_mode, NetMode::Bridge);
        assert_eq!(loaded.argv, vec!["/bin/sh"]);
    }
}
