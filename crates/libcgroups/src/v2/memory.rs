use std::path::Path;

use crate::common::{self, Resources, WrappedIoError};

use super::controller::Controller;

const CGROUP_MEMORY_MAX: &str = "memory.max";

pub struct Memory {}

impl Controller for Memory {
    type Error = WrappedIoError;

    fn apply(resources: &Resources, cgroup_path: &Path) -> Result<(), Self::Error> {
        if let Some(bytes) = resources.memory_bytes {
            tracing::debug!("apply memory limit of {} bytes", bytes);
            Self::set_max(cgroup_path, Some(bytes))?;
        }
        Ok(())
    }
}

impl Memory {
    fn set_max(root_path: &Path, bytes: Option<u64>) -> Result<(), WrappedIoError> {
        let limit = match bytes {
            Some(bytes) => bytes.to_string(),
            None => "max".to_string(),
        };
        common::write_cgroup_file(root_path.join(CGROUP_MEMORY_MAX), limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_set_memory_max() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_MEMORY_MAX, "max").unwrap();

        let resources = Resources {
            memory_bytes: Some(20 * 1024 * 1024),
            ..Default::default()
        };
        Memory::apply(&resources, tmp.path()).expect("apply memory");

        let content = std::fs::read_to_string(tmp.path().join(CGROUP_MEMORY_MAX)).unwrap();
        assert_eq!(content, (20 * 1024 * 1024).to_string());
    }

    #[test]
    fn test_memory_unset_leaves_default() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_MEMORY_MAX, "max").unwrap();

        Memory::apply(&Resources::default(), tmp.path()).expect("apply memory");

        let content = std::fs::read_to_string(tmp.path().join(CGROUP_MEMORY_MAX)).unwrap();
        assert_eq!(content, "max");
    }
}
