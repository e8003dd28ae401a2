//! Stdio plumbing between the host terminal, the container process, and
//! the container log.
//!
//! Detached containers write straight into the log file. Foreground
//! containers go through pipes (or a PTY pair with `--tty`) with the
//! parent tee-ing everything it forwards into the log.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;
use std::thread::JoinHandle;

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::{dup2, isatty, setsid};

#[derive(Debug, thiserror::Error)]
pub enum StdioError {
    #[error("failed to open {path}: {err}")]
    Open { err: std::io::Error, path: String },
    #[error("stdio syscall failed: {0}")]
    Nix(#[from] nix::Error),
}

type Result<T> = std::result::Result<T, StdioError>;

/// How the container's stdio is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// Output to the log file only, stdin from /dev/null.
    Detached,
    /// Pipes back to the invoking terminal, tee'd into the log.
    Foreground { interactive: bool },
    /// A PTY pair; the slave becomes the child's controlling terminal.
    Tty { interactive: bool },
}

/// Fds handed to the child across the clone.
pub enum ChildStdio {
    Log { log: OwnedFd },
    Pipes {
        stdout: OwnedFd,
        stderr: OwnedFd,
        interactive: bool,
    },
    Tty { slave: OwnedFd },
}

/// Fds the parent keeps for forwarding.
pub enum ParentStdio {
    Detached,
    Pipes { stdout: OwnedFd, stderr: OwnedFd },
    Tty { master: OwnedFd },
}

fn open_log(log_path: &Path) -> Result<OwnedFd> {
    let fd = open(
        log_path,
        OFlag::O_CREAT | OFlag::O_WRONLY | OFlag::O_APPEND | OFlag::O_CLOEXEC,
        Mode::from_bits_truncate(0o640),
    )
    .map_err(|errno| StdioError::Open {
        err: std::io::Error::from_raw_os_error(errno as i32),
        path: log_path.display().to_string(),
    })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Builds both halves of the stdio wiring before the clone.
pub fn setup(mode: StdioMode, log_path: &Path) -> Result<(ChildStdio, ParentStdio)> {
    match mode {
        StdioMode::Detached => {
            let log = open_log(log_path)?;
            Ok((ChildStdio::Log { log }, ParentStdio::Detached))
        }
        StdioMode::Foreground { interactive } => {
            let (stdout_read, stdout_write) = nix::unistd::pipe()?;
            let (stderr_read, stderr_write) = nix::unistd::pipe()?;
            Ok((
                ChildStdio::Pipes {
                    stdout: stdout_write,
                    stderr: stderr_write,
                    interactive,
                },
                ParentStdio::Pipes {
                    stdout: stdout_read,
                    stderr: stderr_read,
                },
            ))
        }
        StdioMode::Tty { interactive: _ } => {
            let pty = nix::pty::openpty(None, None)?;
            Ok((
                ChildStdio::Tty { slave: pty.slave },
                ParentStdio::Tty { master: pty.master },
            ))
        }
    }
}

/// Applied in the child before the rootfs is built, so every later
/// failure already lands in the log.
pub fn apply_child_stdio(stdio: &ChildStdio) -> Result<()> {
    match stdio {
        ChildStdio::Log { log } => {
            let devnull = open("/dev/null", OFlag::O_RDONLY, Mode::empty())?;
            dup2(devnull, 0)?;
            dup2(log.as_raw_fd(), 1)?;
            dup2(log.as_raw_fd(), 2)?;
        }
        ChildStdio::Pipes {
            stdout,
            stderr,
            interactive,
        } => {
            if !interactive {
                let devnull = open("/dev/null", OFlag::O_RDONLY, Mode::empty())?;
                dup2(devnull, 0)?;
            }
            dup2(stdout.as_raw_fd(), 1)?;
            dup2(stderr.as_raw_fd(), 2)?;
        }
        ChildStdio::Tty { slave } => {
            setsid()?;
            // make the slave the controlling terminal
            let ret = unsafe { libc::ioctl(slave.as_raw_fd(), libc::TIOCSCTTY as _, 0) };
            if ret == -1 {
                return Err(nix::Error::last().into());
            }
            dup2(slave.as_raw_fd(), 0)?;
            dup2(slave.as_raw_fd(), 1)?;
            dup2(slave.as_raw_fd(), 2)?;
        }
    }
    Ok(())
}

/// Puts the host terminal into raw mode for a `--tty` session; the
/// original settings come back on drop.
pub struct RawModeGuard {
    original: Option<Termios>,
}

impl RawModeGuard {
    pub fn new() -> Self {
        let stdin = std::io::stdin();
        if isatty(stdin.as_raw_fd()) != Ok(true) {
            return Self { original: None };
        }
        let Ok(original) = termios::tcgetattr(&stdin) else {
            return Self { original: None };
        };
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        if termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw).is_err() {
            return Self { original: None };
        }
        Self {
            original: Some(original),
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            let _ = termios::tcsetattr(&std::io::stdin(), SetArg::TCSANOW, &original);
        }
    }
}

/// The parent-side I/O forwarders: copy container output to the invoking
/// terminal while tee-ing it into the log.
pub struct Forwarder {
    handles: Vec<JoinHandle<()>>,
    _raw_mode: Option<RawModeGuard>,
}

impl Forwarder {
    pub fn start(parent: ParentStdio, log_path: &Path, interactive: bool) -> Result<Self> {
        match parent {
            ParentStdio::Detached => Ok(Self {
                handles: vec![],
                _raw_mode: None,
            }),
            ParentStdio::Pipes { stdout, stderr } => {
                let out_log = open_log(log_path)?;
                let err_log = open_log(log_path)?;
                let handles = vec![
                    tee(File::from(stdout), Box::new(std::io::stdout()), out_log),
                    tee(File::from(stderr), Box::new(std::io::stderr()), err_log),
                ];
                Ok(Self {
                    handles,
                    _raw_mode: None,
                })
            }
            ParentStdio::Tty { master } => {
                let raw_mode = RawModeGuard::new();
                let log = open_log(log_path)?;
                let master_file = File::from(master);
                let handles = vec![tee(
                    master_file.try_clone().map_err(|err| StdioError::Open {
                        err,
                        path: "pty master".into(),
                    })?,
                    Box::new(std::io::stdout()),
                    log,
                )];

                if interactive {
                    // terminal → master; this thread dies with the process
                    // once the master goes away
                    std::thread::spawn(move || {
                        let mut stdin = std::io::stdin();
                        let mut master = master_file;
                        let mut buf = [0u8; 4096];
                        while let Ok(len) = stdin.read(&mut buf) {
                            if len == 0 || master.write_all(&buf[..len]).is_err() {
                                break;
                            }
                        }
                    });
                }

                Ok(Self {
                    handles,
                    _raw_mode: Some(raw_mode),
                })
            }
        }
    }

    /// Drains the output forwarders; returns once the container closed
    /// its side of every stream.
    pub fn wait(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn tee(
    mut source: File,
    mut sink: Box<dyn Write + Send>,
    log: OwnedFd,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut log = File::from(log);
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(len) => {
                    let _ = sink.write_all(&buf[..len]);
                    let _ = sink.flush();
                    let _ = log.write_all(&buf[..len]);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_setup_creates_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("container.log");

        let (child, parent) = setup(StdioMode::Detached, &log_path).unwrap();
        assert!(matches!(child, ChildStdio::Log { .. }));
        assert!(matches!(parent, ParentStdio::Detached));
        assert!(log_path.exists());
    }

    #[test]
    fn test_foreground_setup_builds_pipes() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("container.log");

        let (child, parent) = setup(StdioMode::Foreground { interactive: false }, &log_path).unwrap();
        assert!(matches!(child, ChildStdio::Pipes { .. }));
        assert!(matches!(parent, ParentStdio::Pipes { .. }));
    }

    #[test]
    fn test_forwarder_tees_into_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("container.log");

        let (child, parent) = setup(StdioMode::Foreground { interactive: false }, &log_path).unwrap();
        let forwarder = Forwarder::start(parent, &log_path, false).unwrap();

        if let ChildStdio::Pipes { stdout, stderr, .. } = child {
            let mut writer = File::from(stdout);
            writer.write_all(b"hello from the container\n").unwrap();
            drop(writer);
            drop(stderr);
        }

        forwarder.wait();
        let logged = std::fs::read_to_string(&log_path).unwrap();
        assert!(logged.contains("hello from the container"));
    }
}
