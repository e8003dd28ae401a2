//! Capability policy applied to every container process.
//!
//! Whatever the starting set, a container keeps only the minimal file and
//! process management caps; the bounding set is cleared so no execve can
//! bring anything back.

use caps::{CapSet, Capability, CapsHashSet};

use crate::syscall::{Syscall, SyscallError};

/// Capabilities a container process retains.
pub const KEPT_CAPABILITIES: [Capability; 4] = [
    Capability::CAP_CHOWN,
    Capability::CAP_SETUID,
    Capability::CAP_SETGID,
    Capability::CAP_KILL,
];

pub fn kept_set() -> CapsHashSet {
    KEPT_CAPABILITIES.iter().copied().collect()
}

/// Reduces all capability sets to the policy. The bounding set is shrunk
/// first (it needs CAP_SETPCAP, which the later capset drops), the ambient
/// set is emptied last.
pub fn drop_privileges<S: Syscall + ?Sized>(syscall: &S) -> Result<(), SyscallError> {
    let kept = kept_set();
    tracing::debug!(?kept, "dropping capabilities");

    syscall.set_capability(CapSet::Bounding, &kept)?;
    syscall.set_capability(CapSet::Inheritable, &kept)?;
    syscall.set_capability(CapSet::Permitted, &kept)?;
    syscall.set_capability(CapSet::Effective, &kept)?;
    syscall.set_capability(CapSet::Ambient, &CapsHashSet::new())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestHelperSyscall;

    #[test]
    fn test_kept_set_contents() {
        let kept = kept_set();
        assert_eq!(kept.len(), 4);
        assert!(kept.contains(&Capability::CAP_KILL));
        assert!(!kept.contains(&Capability::CAP_SYS_ADMIN));
        assert!(!kept.contains(&Capability::CAP_NET_RAW));
    }

    #[test]
    fn test_drop_privileges_order() {
        let syscall = TestHelperSyscall::default();
        drop_privileges(&syscall).unwrap();

        let calls = syscall.get_set_capability_args();
        assert_eq!(calls.len(), 5);

        let sets: Vec<String> = calls.iter().map(|(set, _)| format!("{set:?}")).collect();
        assert_eq!(
            sets,
            vec!["Bounding", "Inheritable", "Permitted", "Effective", "Ambient"]
        );

        // ambient ends up empty, everything else is the kept set
        assert!(calls[4].1.is_empty());
        assert_eq!(calls[2].1, kept_set());
    }
}
