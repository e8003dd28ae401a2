//! The container launch pipeline: a parent/child process pair connected
//! by a pair of one-way channels.
//!
//! Handshake protocol, in order:
//!
//! 1. parent clones the child with the namespace flags for the mode
//! 2. child blocks until the parent has written the id mappings
//!    (rootless), enrolled it in the cgroup, and attached the veth peer
//! 3. parent sends [`message::Message::ParentReady`]
//! 4. child builds the rootfs, configures the network, drops privilege,
//!    answers [`message::Message::ChildReady`] and execs
//! 5. a child failing anywhere instead answers `SetupFailed` and exits;
//!    the parent surfaces this as `launch.handshake-broken`
//!
//! The step order is load-bearing; do not reorder.

pub mod channel;
pub mod exec;
pub mod fork;
pub mod init;
pub mod launcher;
pub mod message;
pub mod stdio;
