use std::path::Path;

use crate::common::Resources;

pub trait Controller {
    type Error;

    /// Applies the relevant slice of `resources` to the leaf at
    /// `cgroup_path`. A controller with nothing to do must succeed.
    fn apply(resources: &Resources, cgroup_path: &Path) -> Result<(), Self::Error>;
}
