use std::path::{Path, PathBuf};

use nix::unistd::{geteuid, Uid};

/// What the current process is allowed to do, computed once at startup.
/// Builders query this instead of re-deriving mode from scattered flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityProfile {
    pub rootless: bool,
    /// Host-level mount operations (namespace pinning, nsfs binds).
    pub can_mount: bool,
    /// Resource limits can be enforced through the cgroup subtree.
    pub can_write_cgroups: bool,
    /// Bridge + veth construction in the host network namespace.
    pub can_create_veth: bool,
}

impl CapabilityProfile {
    pub fn detect(rootless_requested: bool) -> Self {
        let euid = geteuid();
        let rootless = rootless_requested || !euid.is_root();

        if !rootless {
            return Self {
                rootless: false,
                can_mount: true,
                can_write_cgroups: true,
                can_create_veth: true,
            };
        }

        Self {
            rootless: true,
            can_mount: false,
            // best effort through the systemd user-delegated subtree
            can_write_cgroups: libcgroups::common::default_root(true, euid.as_raw()).exists(),
            can_create_veth: false,
        }
    }
}

/// Per-invocation runtime context. There is intentionally no process-wide
/// state; everything that needs the state root or the mode gets a
/// reference to this.
#[derive(Debug, Clone)]
pub struct Runtime {
    root: PathBuf,
    profile: CapabilityProfile,
    cgroup_root: PathBuf,
}

impl Runtime {
    pub fn new(root: PathBuf, rootless_requested: bool) -> Self {
        let profile = CapabilityProfile::detect(rootless_requested);
        let cgroup_root =
            libcgroups::common::default_root(profile.rootless, Uid::current().as_raw());
        Self {
            root,
            profile,
            cgroup_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile(&self) -> &CapabilityProfile {
        &self.profile
    }

    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }

    pub fn cgroup_manager(&self, id: &str) -> libcgroups::v2::Manager {
        libcgroups::v2::Manager::new(self.cgroup_root.clone(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rootless_requested_forces_rootless() {
        let profile = CapabilityProfile::detect(true);
        assert!(profile.rootless);
        assert!(!profile.can_create_veth);
        assert!(!profile.can_mount);
    }

    #[test]
    fn test_runtime_carries_root() {
        let runtime = Runtime::new(PathBuf::from("/tmp/md-test"), true);
        assert_eq!(runtime.root(), Path::new("/tmp/md-test"));
        assert!(runtime.profile().rootless);
    }
}
