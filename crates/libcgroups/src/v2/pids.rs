use std::path::Path;

use crate::common::{self, Resources, WrappedIoError};

use super::controller::Controller;

const CGROUP_PIDS_MAX: &str = "pids.max";

pub struct Pids {}

impl Controller for Pids {
    type Error = WrappedIoError;

    fn apply(resources: &Resources, cgroup_path: &Path) -> Result<(), Self::Error> {
        if let Some(max) = resources.pids_max {
            tracing::debug!("apply pids limit of {}", max);
            Self::set_max(cgroup_path, max)?;
        }
        Ok(())
    }
}

impl Pids {
    fn set_max(root_path: &Path, max: i64) -> Result<(), WrappedIoError> {
        let limit = if max > 0 {
            max.to_string()
        } else {
            "max".to_string()
        };
        common::write_cgroup_file(root_path.join(CGROUP_PIDS_MAX), limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_set_pids() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_PIDS_MAX, "1000").unwrap();

        let resources = Resources {
            pids_max: Some(5),
            ..Default::default()
        };
        Pids::apply(&resources, tmp.path()).expect("apply pids");

        let content = std::fs::read_to_string(tmp.path().join(CGROUP_PIDS_MAX)).unwrap();
        assert_eq!(content, "5");
    }

    #[test]
    fn test_set_pids_max() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_PIDS_MAX, "0").unwrap();

        let resources = Resources {
            pids_max: Some(0),
            ..Default::default()
        };
        Pids::apply(&resources, tmp.path()).expect("apply pids");

        let content = std::fs::read_to_string(tmp.path().join(CGROUP_PIDS_MAX)).unwrap();
        assert_eq!(content, "max");
    }
}
