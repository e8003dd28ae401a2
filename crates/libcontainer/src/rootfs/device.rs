use std::path::{Path, PathBuf};

use nix::sys::stat::{makedev, Mode, SFlag};

use crate::syscall::Syscall;

use super::Result;

/// The minimal device set every container gets under `/dev`.
pub struct DeviceSpec {
    pub name: &'static str,
    pub major: u64,
    pub minor: u64,
}

pub fn default_devices() -> Vec<DeviceSpec> {
    vec![
        DeviceSpec {
            name: "null",
            major: 1,
            minor: 3,
        },
        DeviceSpec {
            name: "zero",
            major: 1,
            minor: 5,
        },
        DeviceSpec {
            name: "random",
            major: 1,
            minor: 8,
        },
        DeviceSpec {
            name: "urandom",
            major: 1,
            minor: 9,
        },
        DeviceSpec {
            name: "tty",
            major: 5,
            minor: 0,
        },
    ]
}

/// Creates the default devices under `dev_dir`. mknod needs CAP_MKNOD in
/// the initial user namespace; when that fails the host nodes are bind
/// mounted instead (the rootless path).
pub fn create_devices(syscall: &dyn Syscall, dev_dir: &Path) -> Result<()> {
    for device in default_devices() {
        let target = dev_dir.join(device.name);
        let mode = Mode::from_bits_truncate(0o666);

        match syscall.mknod(
            &target,
            SFlag::S_IFCHR,
            mode,
            makedev(device.major, device.minor),
        ) {
            Ok(()) => {}
            Err(err) => {
                tracing::debug!(device = device.name, %err, "mknod failed, bind mounting host device");
                bind_host_device(syscall, &target, device.name)?;
            }
        }
    }
    Ok(())
}

fn bind_host_device(syscall: &dyn Syscall, target: &Path, name: &str) -> Result<()> {
    use nix::mount::MsFlags;

    std::fs::File::create(target).map_err(|err| super::RootfsError::Io {
        err,
        path: target.to_owned(),
    })?;
    syscall.mount(
        Some(&PathBuf::from("/dev").join(name)),
        target,
        None,
        MsFlags::MS_BIND,
        None,
    )?;
    Ok(())
}
