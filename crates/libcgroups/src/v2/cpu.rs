use std::path::Path;

use crate::common::{self, Resources, WrappedIoError};

use super::controller::Controller;

const CGROUP_CPU_MAX: &str = "cpu.max";
const DEFAULT_PERIOD: u64 = 100_000;

pub struct Cpu {}

impl Controller for Cpu {
    type Error = WrappedIoError;

    fn apply(resources: &Resources, cgroup_path: &Path) -> Result<(), Self::Error> {
        if let Some(percent) = resources.cpu_percent {
            tracing::debug!("apply cpu limit of {}%", percent);
            Self::set_max(cgroup_path, percent)?;
        }
        Ok(())
    }
}

impl Cpu {
    // percent maps onto a quota over the default 100ms period; 100%
    // and above means unthrottled
    fn set_max(root_path: &Path, percent: u64) -> Result<(), WrappedIoError> {
        let value = if percent >= 100 {
            format!("max {DEFAULT_PERIOD}")
        } else {
            format!("{} {DEFAULT_PERIOD}", percent * 1000)
        };
        common::write_cgroup_file_str(root_path.join(CGROUP_CPU_MAX), &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_set_cpu_quota() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_CPU_MAX, "max 100000").unwrap();

        let resources = Resources {
            cpu_percent: Some(50),
            ..Default::default()
        };
        Cpu::apply(&resources, tmp.path()).expect("apply cpu");

        let content = std::fs::read_to_string(tmp.path().join(CGROUP_CPU_MAX)).unwrap();
        assert_eq!(content, "50000 100000");
    }

    #[test]
    fn test_full_percent_is_unthrottled() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_CPU_MAX, "50000 100000").unwrap();

        let resources = Resources {
            cpu_percent: Some(100),
            ..Default::default()
        };
        Cpu::apply(&resources, tmp.path()).expect("apply cpu");

        let content = std::fs::read_to_string(tmp.path().join(CGROUP_CPU_MAX)).unwrap();
        assert_eq!(content, "max 100000");
    }
}
