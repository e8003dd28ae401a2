use std::path::Path;

use crate::common::{self, WrappedIoError};

pub const CGROUP_SUBTREE_CONTROL: &str = "cgroup.subtree_control";
pub const CGROUP_CONTROLLERS: &str = "cgroup.controllers";

/// Controllers the runtime needs delegated to the container leaves.
pub const REQUIRED_CONTROLLERS: &[&str] = &["cpu", "memory", "pids"];

/// Controllers available at `path`, as listed by the kernel.
pub fn get_available_controllers<P: AsRef<Path>>(path: P) -> Result<Vec<String>, WrappedIoError> {
    let content = common::read_cgroup_file(path.as_ref().join(CGROUP_CONTROLLERS))?;
    Ok(content.split_whitespace().map(str::to_owned).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_get_available_controllers() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_CONTROLLERS, "cpuset cpu io memory pids\n").unwrap();

        let controllers = get_available_controllers(tmp.path()).unwrap();
        assert_eq!(controllers, vec!["cpuset", "cpu", "io", "memory", "pids"]);
    }
}
