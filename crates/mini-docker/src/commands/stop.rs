//! `stop`: SIGTERM with a bounded wait, then SIGKILL.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use procfs::process::Process;

use libcontainer::error::{Result, RuntimeError};
use libcontainer::process::launcher;

use super::open_runtime;

#[derive(Parser, Debug)]
pub struct Stop {
    /// Seconds to wait for the container to exit before killing it
    #[arg(short = 't', long, default_value_t = 10)]
    pub time: u64,

    /// Skip SIGTERM and kill immediately
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Container id, name, or id prefix
    pub container: String,
}

pub fn stop(args: Stop, root: PathBuf) -> Result<i32> {
    let (runtime, store) = open_runtime(root, false)?;
    let mut container = store.resolve_container(&args.container)?;
    let _guard = store.lock_container(container.id())?;

    let pid = container.live_pid()?;

    let signal = if args.force {
        Signal::SIGKILL
    } else {
        Signal::SIGTERM
    };
    tracing::info!(id = %container.id(), %pid, ?signal, "stopping container");
    send_signal(pid, signal)?;

    // a monotonic deadline, immune to wall-clock jumps
    let deadline = Instant::now() + Duration::from_secs(args.time);
    let mut exit_code = 128 + signal as i32;

    while process_alive(pid, container.state.start_time_ticks) {
        if Instant::now() >= deadline {
            tracing::warn!(id = %container.id(), "stop timed out, escalating to SIGKILL");
            send_signal(pid, Signal::SIGKILL)?;
            exit_code = 128 + Signal::SIGKILL as i32;
            // grace period for the kill to land
            let kill_deadline = Instant::now() + Duration::from_secs(2);
            while process_alive(pid, container.state.start_time_ticks)
                && Instant::now() < kill_deadline
            {
                std::thread::sleep(Duration::from_millis(50));
            }
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    container.mark_exited(exit_code);
    container.save()?;
    launcher::teardown(&runtime, &store, &container);

    println!("{}", container.id());
    Ok(0)
}

fn send_signal(pid: Pid, signal: Signal) -> Result<()> {
    match kill(pid, signal) {
        Ok(()) | Err(nix::Error::ESRCH) => Ok(()),
        Err(errno) => Err(RuntimeError::Other(format!(
            "failed to signal {pid}: {errno}"
        ))),
    }
}

/// The stored pid counts as alive only while the kernel start time still
/// matches; a recycled pid never does.
fn process_alive(pid: Pid, expected_start: Option<u64>) -> bool {
    match Process::new(pid.as_raw()).and_then(|p| p.stat()) {
        Ok(stat) => expected_start.is_none() || expected_start == Some(stat.starttime),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vanished_pid_is_not_alive() {
        assert!(!process_alive(Pid::from_raw(i32::MAX - 1), Some(1)));
    }

    #[test]
    fn test_start_time_mismatch_is_not_alive() {
        let own = Pid::from_raw(std::process::id() as i32);
        assert!(!process_alive(own, Some(u64::MAX)));
        assert!(process_alive(own, None));
    }
}
