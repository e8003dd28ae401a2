//! The subset of an OCI runtime bundle the launcher consumes: a directory
//! with `config.json` and a rootfs. Unknown fields are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use libcgroups::common::Resources;

use crate::container::{BindMount, ContainerConfig, NetMode, UserSpec};

#[derive(Debug, thiserror::Error)]
pub enum OciError {
    #[error("failed to read bundle config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse bundle config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid bundle: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, OciError>;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BundleSpec {
    pub process: OciProcess,
    pub root: OciRoot,
    pub hostname: Option<String>,
    pub linux: OciLinux,
    pub mounts: Vec<OciMount>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OciProcess {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub user: OciUser,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct OciUser {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OciRoot {
    pub path: PathBuf,
    pub readonly: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OciLinux {
    pub namespaces: Vec<OciNamespace>,
    pub resources: OciResources,
}

#[derive(Deserialize, Debug)]
pub struct OciNamespace {
    #[serde(rename = "type")]
    pub ns_type: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OciResources {
    pub memory: OciMemory,
    pub cpu: OciCpu,
    pub pids: OciPids,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct OciMemory {
    pub limit: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct OciCpu {
    pub quota: Option<u64>,
    pub period: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct OciPids {
    pub limit: Option<i64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OciMount {
    pub destination: PathBuf,
    pub source: Option<PathBuf>,
    #[serde(rename = "type")]
    pub mount_type: Option<String>,
    pub options: Vec<String>,
}

pub fn load_bundle(bundle_dir: &Path) -> Result<BundleSpec> {
    let config = fs::read_to_string(bundle_dir.join("config.json"))?;
    Ok(serde_json::from_str(&config)?)
}

/// Maps the bundle onto a container configuration. The rootfs path
/// resolves relative to the bundle directory; only bind mounts with a
/// host source survive the translation (proc/sys/dev are always built by
/// the filesystem builder).
pub fn to_container_config(
    bundle_dir: &Path,
    spec: &BundleSpec,
    id: String,
) -> Result<ContainerConfig> {
    if spec.process.args.is_empty() {
        return Err(OciError::Invalid("process.args is empty".into()));
    }

    let image_root = if spec.root.path.is_absolute() {
        spec.root.path.clone()
    } else {
        bundle_dir.join(&spec.root.path)
    };
    if !image_root.is_dir() {
        return Err(OciError::Invalid(format!(
            "root.path {image_root:?} is not a directory"
        )));
    }

    let mut config = ContainerConfig::new(id, image_root, spec.process.args.clone());
    config.env = spec.process.env.clone();
    config.workdir = spec.process.cwd.clone();
    config.user = UserSpec {
        uid: spec.process.user.uid,
        gid: spec.process.user.gid,
    };
    if let Some(hostname) = &spec.hostname {
        config.hostname = hostname.clone();
    }

    config.limits = Resources {
        memory_bytes: spec.linux.resources.memory.limit,
        cpu_percent: match (spec.linux.resources.cpu.quota, spec.linux.resources.cpu.period) {
            (Some(quota), period) => {
                let period = period.unwrap_or(100_000).max(1);
                Some(quota * 100 / period)
            }
            _ => None,
        },
        pids_max: spec.linux.resources.pids.limit,
    };

    for mount in &spec.mounts {
        let is_bind = mount.mount_type.as_deref() == Some("bind")
            || mount.options.iter().any(|o| o == "bind" || o == "rbind");
        let Some(source) = &mount.source else {
            continue;
        };
        if !is_bind || !source.is_absolute() {
            continue;
        }
        config.mounts.push(BindMount {
            host_path: source.clone(),
            container_path: mount.destination.clone(),
            read_only: mount.options.iter().any(|o| o == "ro"),
        });
    }

    let has_ns = |name: &str| spec.linux.namespaces.iter().any(|ns| ns.ns_type == name);
    config.rootless = has_ns("user");
    // a bundle gets its own network namespace with loopback only;
    // bridge wiring stays a native-CLI concern
    config.net_mode = NetMode::None;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "ociVersion": "1.0.2",
        "process": {
            "args": ["/bin/sh", "-c", "echo hi"],
            "env": ["PATH=/usr/bin:/bin"],
            "cwd": "/srv",
            "user": {"uid": 1000, "gid": 1000}
        },
        "root": {"path": "rootfs", "readonly": true},
        "hostname": "bundled",
        "linux": {
            "namespaces": [
                {"type": "pid"}, {"type": "mount"}, {"type": "uts"},
                {"type": "ipc"}, {"type": "network"}
            ],
            "resources": {
                "memory": {"limit": 20971520},
                "cpu": {"quota": 50000, "period": 100000},
                "pids": {"limit": 64}
            }
        },
        "mounts": [
            {"destination": "/data", "source": "/srv/data", "type": "bind", "options": ["rbind", "ro"]},
            {"destination": "/proc", "type": "proc", "source": "proc"}
        ],
        "unknownField": {"ignored": true}
    }"#;

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let spec: BundleSpec = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(spec.process.args.len(), 3);
        assert_eq!(spec.hostname.as_deref(), Some("bundled"));
        assert_eq!(spec.linux.resources.memory.limit, Some(20971520));
    }

    #[test]
    fn test_to_container_config() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("rootfs")).unwrap();

        let spec: BundleSpec = serde_json::from_str(SAMPLE).unwrap();
        let config = to_container_config(tmp.path(), &spec, "0123456789ab".into()).unwrap();

        assert_eq!(config.image_root, tmp.path().join("rootfs"));
        assert_eq!(config.user.uid, 1000);
        assert_eq!(config.hostname, "bundled");
        assert_eq!(config.workdir.as_deref(), Some(Path::new("/srv")));
        assert_eq!(config.limits.memory_bytes, Some(20971520));
        assert_eq!(config.limits.cpu_percent, Some(50));
        assert_eq!(config.limits.pids_max, Some(64));

        // only the bind mount survives; proc is built by the launcher
        assert_eq!(config.mounts.len(), 1);
        assert!(config.mounts[0].read_only);
    }

    #[test]
    fn test_empty_args_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("rootfs")).unwrap();

        let mut spec: BundleSpec = serde_json::from_str(SAMPLE).unwrap();
        spec.process.args.clear();
        assert!(matches!(
            to_container_config(tmp.path(), &spec, "x".into()),
            Err(OciError::Invalid(_))
        ));
    }
}
