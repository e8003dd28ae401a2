//! The IP lease map, `network/leases.json`: ip → container id.
//!
//! All mutation happens under the network flock held by the caller;
//! readers tolerate momentary inconsistency.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::utils;

use super::NetworkError;

pub const LEASES_FILE: &str = "leases.json";

/// Host addresses handed to containers: 10.0.0.2 ..= 10.0.0.254.
const FIRST_HOST: u8 = 2;
const LAST_HOST: u8 = 254;

fn leases_path(network_dir: &Path) -> PathBuf {
    network_dir.join(LEASES_FILE)
}

fn load(network_dir: &Path) -> BTreeMap<String, String> {
    std::fs::read_to_string(leases_path(network_dir))
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

fn store(network_dir: &Path, leases: &BTreeMap<String, String>) -> Result<(), NetworkError> {
    utils::atomic_write_json(&leases_path(network_dir), leases)?;
    Ok(())
}

/// First free address in the pool, recorded against `container_id`.
pub fn allocate(network_dir: &Path, container_id: &str) -> Result<Ipv4Addr, NetworkError> {
    let mut leases = load(network_dir);

    for host in FIRST_HOST..=LAST_HOST {
        let ip = Ipv4Addr::new(10, 0, 0, host);
        let key = ip.to_string();
        if !leases.contains_key(&key) {
            leases.insert(key, container_id.to_owned());
            store(network_dir, &leases)?;
            tracing::debug!(%ip, container_id, "allocated lease");
            return Ok(ip);
        }
    }

    Err(NetworkError::PoolExhausted)
}

/// Drops every lease held by `container_id`.
pub fn release(network_dir: &Path, container_id: &str) -> Result<(), NetworkError> {
    let mut leases = load(network_dir);
    let before = leases.len();
    leases.retain(|_, holder| holder != container_id);
    if leases.len() != before {
        store(network_dir, &leases)?;
    }
    Ok(())
}

pub fn lookup(network_dir: &Path, container_id: &str) -> Option<Ipv4Addr> {
    load(network_dir)
        .iter()
        .find(|(_, holder)| holder.as_str() == container_id)
        .and_then(|(ip, _)| ip.parse().ok())
}

/// Number of active leases; the bridge stays up while this is non-zero.
pub fn count(network_dir: &Path) -> usize {
    load(network_dir).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_first_free() {
        let tmp = tempfile::tempdir().unwrap();
        let ip = allocate(tmp.path(), "aaa111").unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));

        let ip = allocate(tmp.path(), "bbb222").unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_release_frees_address() {
        let tmp = tempfile::tempdir().unwrap();
        allocate(tmp.path(), "aaa111").unwrap();
        allocate(tmp.path(), "bbb222").unwrap();

        release(tmp.path(), "aaa111").unwrap();
        assert_eq!(count(tmp.path()), 1);

        // the freed address is handed out again
        let ip = allocate(tmp.path(), "ccc333").unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let ip = allocate(tmp.path(), "aaa111").unwrap();
        assert_eq!(lookup(tmp.path(), "aaa111"), Some(ip));
        assert_eq!(lookup(tmp.path(), "zzz999"), None);
    }

    #[test]
    fn test_pool_exhaustion() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..253 {
            allocate(tmp.path(), &format!("c{i}")).unwrap();
        }
        let err = allocate(tmp.path(), "overflow").unwrap_err();
        assert!(matches!(err, NetworkError::PoolExhausted));
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        release(tmp.path(), "missing").unwrap();
        assert_eq!(count(tmp.path()), 0);
    }
}
