//! One-way message channels over `SOCK_SEQPACKET` socketpairs.
//!
//! Each launch uses two: `init` (parent → child) and `main` (child →
//! parent). Both processes inherit both ends across the clone; each side
//! closes the ends it does not use so a dead peer turns into an error
//! instead of a hang.

use std::marker::PhantomData;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::sys::socket::{self, SockFlag, SockType};
use nix::unistd::Pid;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::message::Message;
use crate::rootfs::RootfsMode;

const MAX_MESSAGE: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel connection broken")]
    Broken,
    #[error("channel i/o failed: {0}")]
    Nix(#[from] nix::Error),
    #[error("failed to encode message: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("received unexpected message {0:?}")]
    UnexpectedMessage(Message),
    #[error("child setup failed: {0}")]
    SetupFailed(String),
}

type Result<T> = std::result::Result<T, ChannelError>;

pub struct Sender<T> {
    fd: Option<OwnedFd>,
    phantom: PhantomData<T>,
}

pub struct Receiver<T> {
    fd: Option<OwnedFd>,
    phantom: PhantomData<T>,
}

impl<T: Serialize> Sender<T> {
    pub fn send(&mut self, object: T) -> Result<()> {
        let fd = self.fd.as_ref().ok_or(ChannelError::Broken)?;
        let payload = serde_json::to_vec(&object)?;
        nix::unistd::write(fd.as_fd(), &payload)?;
        Ok(())
    }

    pub fn close(&mut self) {
        self.fd.take();
    }
}

impl<T: DeserializeOwned> Receiver<T> {
    pub fn recv(&mut self) -> Result<T> {
        let fd = self.fd.as_ref().ok_or(ChannelError::Broken)?;
        let mut buf = [0u8; MAX_MESSAGE];
        // seqpacket preserves message boundaries, one read is one message
        let len = nix::unistd::read(fd.as_raw_fd(), &mut buf)?;
        if len == 0 {
            return Err(ChannelError::Broken);
        }
        Ok(serde_json::from_slice(&buf[..len])?)
    }

    pub fn close(&mut self) {
        self.fd.take();
    }
}

pub fn channel<T>() -> Result<(Sender<T>, Receiver<T>)> {
    let (sender_fd, receiver_fd) = socket::socketpair(
        socket::AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::SOCK_CLOEXEC,
    )?;
    Ok((
        Sender {
            fd: Some(sender_fd),
            phantom: PhantomData,
        },
        Receiver {
            fd: Some(receiver_fd),
            phantom: PhantomData,
        },
    ))
}

/// Child → parent channel.
pub fn main_channel() -> Result<(MainSender, MainReceiver)> {
    let (sender, receiver) = channel::<Message>()?;
    Ok((MainSender { sender }, MainReceiver { receiver }))
}

pub struct MainSender {
    sender: Sender<Message>,
}

impl MainSender {
    pub fn child_ready(&mut self, rootfs_mode: RootfsMode) -> Result<()> {
        self.sender.send(Message::ChildReady { rootfs_mode })
    }

    pub fn setup_failed(&mut self, reason: String) -> Result<()> {
        self.sender.send(Message::SetupFailed(reason))
    }

    pub fn close(&mut self) {
        self.sender.close();
    }
}

pub struct MainReceiver {
    receiver: Receiver<Message>,
}

impl MainReceiver {
    /// Blocks until the child reports readiness (returning the rootfs
    /// mode it ended up with) or reports a setup failure.
    pub fn wait_for_child_ready(&mut self) -> Result<RootfsMode> {
        match self.receiver.recv()? {
            Message::ChildReady { rootfs_mode } => Ok(rootfs_mode),
            Message::SetupFailed(reason) => Err(ChannelError::SetupFailed(reason)),
            msg => Err(ChannelError::UnexpectedMessage(msg)),
        }
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Parent → child channel.
pub fn init_channel() -> Result<(InitSender, InitReceiver)> {
    let (sender, receiver) = channel::<Message>()?;
    Ok((InitSender { sender }, InitReceiver { receiver }))
}

pub struct InitSender {
    sender: Sender<Message>,
}

impl InitSender {
    pub fn parent_ready(&mut self) -> Result<()> {
        tracing::debug!("signalling parent ready");
        self.sender.send(Message::ParentReady)
    }

    pub fn close(&mut self) {
        self.sender.close();
    }
}

pub struct InitReceiver {
    receiver: Receiver<Message>,
}

impl InitReceiver {
    pub fn wait_for_parent_ready(&mut self) -> Result<()> {
        match self.receiver.recv()? {
            Message::ParentReady => Ok(()),
            msg => Err(ChannelError::UnexpectedMessage(msg)),
        }
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Reaps `pid`, tolerating a peer that was already collected.
pub fn reap(pid: Pid) {
    use nix::sys::wait::waitpid;
    match waitpid(pid, None) {
        Ok(_) | Err(nix::Error::ECHILD) => {}
        Err(err) => tracing::warn!(%pid, %err, "failed to reap process"),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use nix::sys::wait;
    use nix::unistd;
    use serial_test::serial;

    use super::*;

    // These tests fork; running them in parallel with the rest of the
    // suite confuses the shared process state, hence serial.

    #[test]
    #[serial]
    fn test_channel_child_ready() -> Result<()> {
        let (sender, receiver) = &mut main_channel()?;
        match unsafe { unistd::fork()? } {
            unistd::ForkResult::Parent { child } => {
                wait::waitpid(child, None)?;
                let mode = receiver.wait_for_child_ready()?;
                assert_eq!(mode, RootfsMode::Bind);
                receiver.close();
            }
            unistd::ForkResult::Child => {
                sender.child_ready(RootfsMode::Bind).unwrap();
                sender.close();
                std::process::exit(0);
            }
        }
        Ok(())
    }

    #[test]
    #[serial]
    fn test_channel_setup_failure_surfaces() -> Result<()> {
        let (sender, receiver) = &mut main_channel()?;
        match unsafe { unistd::fork()? } {
            unistd::ForkResult::Parent { child } => {
                wait::waitpid(child, None)?;
                let err = receiver.wait_for_child_ready().unwrap_err();
                assert!(matches!(err, ChannelError::SetupFailed(reason) if reason == "mount: EPERM"));
            }
            unistd::ForkResult::Child => {
                sender.setup_failed("mount: EPERM".into()).unwrap();
                sender.close();
                std::process::exit(1);
            }
        }
        Ok(())
    }

    #[test]
    #[serial]
    fn test_channel_peer_death_breaks_wait() -> Result<()> {
        let (sender, receiver) = &mut main_channel()?;
        match unsafe { unistd::fork()? } {
            unistd::ForkResult::Parent { child } => {
                sender.close();
                // the child exits without sending anything; the wait must
                // error out instead of blocking forever
                let ret = receiver.wait_for_child_ready();
                assert!(ret.is_err());
                wait::waitpid(child, None)?;
            }
            unistd::ForkResult::Child => {
                receiver.close();
                std::process::exit(0);
            }
        }
        Ok(())
    }

    #[test]
    #[serial]
    fn test_parent_ready_round_trip() -> Result<()> {
        let (sender, receiver) = &mut init_channel()?;
        match unsafe { unistd::fork()? } {
            unistd::ForkResult::Parent { child } => {
                sender.parent_ready()?;
                wait::waitpid(child, None)?;
            }
            unistd::ForkResult::Child => {
                receiver.wait_for_parent_ready().unwrap();
                std::process::exit(0);
            }
        }
        Ok(())
    }
}
