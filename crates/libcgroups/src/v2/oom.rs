//! OOM event notification for a container leaf.
//!
//! `memory.events` signals modification through `POLLPRI`; a watcher holds
//! the file open and reports how many tasks the kernel OOM killer reaped.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::fd::AsFd;
use std::path::Path;

use nix::poll::{poll, PollFd, PollFlags};

#[derive(thiserror::Error, Debug)]
pub enum OomWatchError {
    #[error("failed to open memory.events: {0}")]
    Open(std::io::Error),
    #[error("failed to read memory.events: {0}")]
    Read(std::io::Error),
    #[error("failed to poll memory.events: {0}")]
    Poll(nix::Error),
}

pub struct OomWatcher {
    events: File,
}

impl OomWatcher {
    pub fn new(memory_events: &Path) -> Result<Self, OomWatchError> {
        let events = File::open(memory_events).map_err(OomWatchError::Open)?;
        Ok(Self { events })
    }

    /// Blocks up to `timeout_ms` for a membership change of
    /// `memory.events`. Returns true when an event fired.
    pub fn wait(&mut self, timeout_ms: u16) -> Result<bool, OomWatchError> {
        let mut fds = [PollFd::new(self.events.as_fd(), PollFlags::POLLPRI)];
        let ready = poll(&mut fds, timeout_ms).map_err(OomWatchError::Poll)?;
        Ok(ready > 0)
    }

    pub fn oom_kill_count(&mut self) -> Result<u64, OomWatchError> {
        self.events
            .seek(SeekFrom::Start(0))
            .map_err(OomWatchError::Read)?;
        let mut content = String::new();
        self.events
            .read_to_string(&mut content)
            .map_err(OomWatchError::Read)?;

        Ok(content
            .lines()
            .find_map(|line| line.strip_prefix("oom_kill "))
            .and_then(|count| count.trim().parse().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_oom_kill_count_parses_events() {
        let tmp = tempfile::tempdir().unwrap();
        let path =
            set_fixture(tmp.path(), "memory.events", "low 0\noom 4\noom_kill 3\n").unwrap();

        let mut watcher = OomWatcher::new(&path).unwrap();
        assert_eq!(watcher.oom_kill_count().unwrap(), 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(OomWatcher::new(&tmp.path().join("memory.events")).is_err());
    }
}
