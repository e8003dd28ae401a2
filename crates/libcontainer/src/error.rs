use std::path::PathBuf;

use crate::syscall::SyscallError;

/// The error kinds the runtime distinguishes. Each kind carries the exit
/// code surfaced at the CLI boundary.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Malformed user input: bad flag value, unknown image, bad bundle.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lifecycle conflicts: duplicate name, missing container, removing a
    /// running container without force.
    #[error("{0}")]
    StateConflict(String),

    /// The kernel rejected a syscall during launch.
    #[error(transparent)]
    Kernel(#[from] SyscallError),

    /// Cgroup subtree missing or a controller write failed.
    #[error("cgroup setup failed: {0}")]
    Cgroup(#[from] libcgroups::v2::manager::V2ManagerError),

    /// A requested bind-mount host path does not exist.
    #[error("bind mount source {0} does not exist")]
    BindMissing(PathBuf),

    /// Bridge or veth setup failed.
    #[error("bridge network unavailable: {0}")]
    BridgeUnavailable(#[from] crate::network::NetworkError),

    /// The child died before signalling readiness.
    #[error("container process failed before exec: {0}")]
    HandshakeBroken(String),

    #[error(transparent)]
    Rootfs(#[from] crate::rootfs::RootfsError),

    #[error(transparent)]
    Stdio(#[from] crate::process::stdio::StdioError),

    #[error(transparent)]
    State(#[from] crate::container::StateError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Seccomp(#[from] crate::seccomp::SeccompError),

    #[error("failed to serialize: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Exit codes of the CLI surface.
pub const EXIT_GENERAL: i32 = 1;
pub const EXIT_INVALID_ARGS: i32 = 2;
pub const EXIT_RUNTIME: i32 = 125;
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
pub const EXIT_NOT_FOUND: i32 = 127;

impl RuntimeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::InvalidConfig(_) => EXIT_INVALID_ARGS,
            RuntimeError::StateConflict(_) => EXIT_GENERAL,
            RuntimeError::Kernel(_)
            | RuntimeError::Cgroup(_)
            | RuntimeError::BindMissing(_)
            | RuntimeError::BridgeUnavailable(_)
            | RuntimeError::HandshakeBroken(_)
            | RuntimeError::Rootfs(_)
            | RuntimeError::Stdio(_)
            | RuntimeError::Seccomp(_) => EXIT_RUNTIME,
            RuntimeError::State(_)
            | RuntimeError::Store(_)
            | RuntimeError::Serde(_)
            | RuntimeError::Io(_)
            | RuntimeError::Other(_) => EXIT_GENERAL,
        }
    }
}

impl From<crate::image::ImageError> for RuntimeError {
    fn from(err: crate::image::ImageError) -> Self {
        use crate::image::ImageError;
        match err {
            // an unknown image is malformed user input
            ImageError::NotFound(_) => RuntimeError::InvalidConfig(err.to_string()),
            ImageError::InUse(_, _) => RuntimeError::StateConflict(err.to_string()),
            ImageError::Io(_) | ImageError::Parse(_) => RuntimeError::Other(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            RuntimeError::InvalidConfig("bad".into()).exit_code(),
            EXIT_INVALID_ARGS
        );
        assert_eq!(
            RuntimeError::StateConflict("dup".into()).exit_code(),
            EXIT_GENERAL
        );
        assert_eq!(
            RuntimeError::HandshakeBroken("gone".into()).exit_code(),
            EXIT_RUNTIME
        );
        assert_eq!(
            RuntimeError::BindMissing(PathBuf::from("/nope")).exit_code(),
            EXIT_RUNTIME
        );
    }
}
