//! A trait seam over the Linux syscalls the launcher needs, so the rest of
//! the crate can be exercised against a recording test double.

pub mod linux;
pub mod syscall;
pub mod test;

pub use syscall::{create_syscall, Syscall};

#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    #[error("{op} failed: {errno}")]
    Nix { op: &'static str, errno: nix::Error },
    #[error("{op} failed: {err}")]
    Io { op: &'static str, err: std::io::Error },
    #[error("failed to manipulate capabilities: {0}")]
    Caps(#[from] caps::errors::CapsError),
    #[error("prctl({op}) failed: {errno}")]
    Prctl { op: &'static str, errno: i32 },
}

impl SyscallError {
    pub fn errno(&self) -> Option<nix::Error> {
        match self {
            SyscallError::Nix { errno, .. } => Some(*errno),
            SyscallError::Io { err, .. } => err.raw_os_error().map(nix::Error::from_raw),
            SyscallError::Prctl { errno, .. } => Some(nix::Error::from_raw(*errno)),
            SyscallError::Caps(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyscallError>;
