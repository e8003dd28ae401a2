//! Bridge networking: a host bridge, one veth pair per container, NAT for
//! egress. Everything speaks rtnetlink over a small current-thread
//! runtime; the MASQUERADE rule goes through the iptables binary.

pub mod lease;

use std::net::{IpAddr, Ipv4Addr};
use std::process::Command;

use futures::TryStreamExt;
use nix::unistd::Pid;
use rtnetlink::Handle;

pub const BRIDGE_NAME: &str = "mini-docker0";
pub const BRIDGE_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const SUBNET: &str = "10.0.0.0/24";
pub const SUBNET_PREFIX: u8 = 24;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("netlink request failed: {0}")]
    Netlink(#[from] rtnetlink::Error),
    #[error("netlink connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("interface {0} not found")]
    LinkNotFound(String),
    #[error("address pool {SUBNET} exhausted")]
    PoolExhausted,
    #[error("iptables failed: {0}")]
    Iptables(String),
}

type Result<T> = std::result::Result<T, NetworkError>;

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?)
}

fn is_netlink_errno(err: &rtnetlink::Error, errno: i32) -> bool {
    matches!(err, rtnetlink::Error::NetlinkError(msg)
        if msg.code.map(|code| code.get()) == Some(-errno))
}

async fn link_index(handle: &Handle, name: &str) -> Result<Option<u32>> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(Some(link)) => Ok(Some(link.header.index)),
        Ok(None) => Ok(None),
        Err(err) if is_netlink_errno(&err, libc::ENODEV) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Ensures the host bridge exists, carries the gateway address, is up,
/// and that egress NAT is installed. Callers serialise through the
/// network lock.
pub fn ensure_bridge() -> Result<()> {
    let rt = runtime()?;
    let result: Result<()> = rt.block_on(async {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);

        let index = match link_index(&handle, BRIDGE_NAME).await? {
            Some(index) => index,
            None => {
                tracing::info!(bridge = BRIDGE_NAME, "creating host bridge");
                handle
                    .link()
                    .add()
                    .bridge(BRIDGE_NAME.to_string())
                    .execute()
                    .await?;
                link_index(&handle, BRIDGE_NAME)
                    .await?
                    .ok_or_else(|| NetworkError::LinkNotFound(BRIDGE_NAME.into()))?
            }
        };

        match handle
            .address()
            .add(index, IpAddr::V4(BRIDGE_ADDR), SUBNET_PREFIX)
            .execute()
            .await
        {
            Ok(()) => {}
            Err(err) if is_netlink_errno(&err, libc::EEXIST) => {}
            Err(err) => return Err(err.into()),
        }

        handle.link().set(index).up().execute().await?;
        Ok(())
    });
    result?;

    ensure_masquerade()
}

fn masquerade_args(action: &str) -> Vec<String> {
    [
        "-t",
        "nat",
        action,
        "POSTROUTING",
        "-s",
        SUBNET,
        "!",
        "-o",
        BRIDGE_NAME,
        "-j",
        "MASQUERADE",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn ensure_masquerade() -> Result<()> {
    let check = Command::new("iptables")
        .args(masquerade_args("-C"))
        .output()
        .map_err(|err| NetworkError::Iptables(format!("failed to run iptables: {err}")))?;
    if check.status.success() {
        return Ok(());
    }

    let add = Command::new("iptables")
        .args(masquerade_args("-A"))
        .output()
        .map_err(|err| NetworkError::Iptables(format!("failed to run iptables: {err}")))?;
    if !add.status.success() {
        return Err(NetworkError::Iptables(
            String::from_utf8_lossy(&add.stderr).trim().to_string(),
        ));
    }
    Ok(())
}

fn remove_masquerade() {
    let _ = Command::new("iptables").args(masquerade_args("-D")).output();
}

/// Interface names of a container's veth pair. The peer keeps a unique
/// temporary name until it is renamed to `eth0` inside the namespace.
pub fn veth_names(container_id: &str) -> (String, String) {
    let suffix: String = container_id.chars().take(6).collect();
    (format!("veth{suffix}"), format!("vp{suffix}"))
}

/// Creates the veth pair, attaches the host end to the bridge, and moves
/// the peer into the network namespace of `pid`.
pub fn setup_veth(container_id: &str, pid: Pid) -> Result<String> {
    let (host_name, peer_name) = veth_names(container_id);
    let rt = runtime()?;
    rt.block_on(async {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);

        handle
            .link()
            .add()
            .veth(host_name.clone(), peer_name.clone())
            .execute()
            .await?;

        let bridge_index = link_index(&handle, BRIDGE_NAME)
            .await?
            .ok_or_else(|| NetworkError::LinkNotFound(BRIDGE_NAME.into()))?;
        let host_index = link_index(&handle, &host_name)
            .await?
            .ok_or_else(|| NetworkError::LinkNotFound(host_name.clone()))?;
        let peer_index = link_index(&handle, &peer_name)
            .await?
            .ok_or_else(|| NetworkError::LinkNotFound(peer_name.clone()))?;

        handle
            .link()
            .set(host_index)
            .controller(bridge_index)
            .execute()
            .await?;
        handle.link().set(host_index).up().execute().await?;

        handle
            .link()
            .set(peer_index)
            .setns_by_pid(pid.as_raw() as u32)
            .execute()
            .await?;

        Ok(host_name)
    })
}

/// Runs inside the container's network namespace: renames the moved veth
/// peer to `eth0`, assigns the lease, and routes everything through the
/// bridge gateway.
pub fn configure_container(container_id: &str, ip: Ipv4Addr) -> Result<()> {
    let (_, peer_name) = veth_names(container_id);
    let rt = runtime()?;
    rt.block_on(async {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);

        let lo_index = link_index(&handle, "lo")
            .await?
            .ok_or_else(|| NetworkError::LinkNotFound("lo".into()))?;
        handle.link().set(lo_index).up().execute().await?;

        let peer_index = link_index(&handle, &peer_name)
            .await?
            .ok_or_else(|| NetworkError::LinkNotFound(peer_name.clone()))?;
        handle
            .link()
            .set(peer_index)
            .name("eth0".to_string())
            .execute()
            .await?;
        handle
            .address()
            .add(peer_index, IpAddr::V4(ip), SUBNET_PREFIX)
            .execute()
            .await?;
        handle.link().set(peer_index).up().execute().await?;

        handle
            .route()
            .add()
            .v4()
            .destination_prefix(Ipv4Addr::UNSPECIFIED, 0)
            .gateway(BRIDGE_ADDR)
            .execute()
            .await?;

        Ok(())
    })
}

/// Runs inside a fresh network namespace with no bridge wiring: only the
/// loopback device comes up.
pub fn loopback_up() -> Result<()> {
    let rt = runtime()?;
    rt.block_on(async {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);

        let lo_index = link_index(&handle, "lo")
            .await?
            .ok_or_else(|| NetworkError::LinkNotFound("lo".into()))?;
        handle.link().set(lo_index).up().execute().await?;
        Ok(())
    })
}

/// Removes the host end of a container's veth pair; the kernel removes
/// the peer when its namespace dies.
pub fn remove_veth(host_name: &str) -> Result<()> {
    let rt = runtime()?;
    rt.block_on(async {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);

        if let Some(index) = link_index(&handle, host_name).await? {
            handle.link().del(index).execute().await?;
        }
        Ok(())
    })
}

/// Removes the bridge and the NAT rule. Only called by `cleanup` once no
/// container holds a lease.
pub fn remove_bridge() -> Result<()> {
    let rt = runtime()?;
    let result: Result<()> = rt.block_on(async {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);

        if let Some(index) = link_index(&handle, BRIDGE_NAME).await? {
            tracing::info!(bridge = BRIDGE_NAME, "removing host bridge");
            handle.link().del(index).execute().await?;
        }
        Ok(())
    });
    result?;

    remove_masquerade();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_veth_names_derive_from_id() {
        let (host, peer) = veth_names("0123456789ab");
        assert_eq!(host, "veth012345");
        assert_eq!(peer, "vp012345");
        // interface names must stay under IFNAMSIZ (15 chars + NUL)
        assert!(host.len() <= 15);
        assert!(peer.len() <= 15);
    }

    #[test]
    fn test_masquerade_args() {
        let args = masquerade_args("-A");
        assert_eq!(
            args,
            vec![
                "-t",
                "nat",
                "-A",
                "POSTROUTING",
                "-s",
                "10.0.0.0/24",
                "!",
                "-o",
                "mini-docker0",
                "-j",
                "MASQUERADE"
            ]
        );
    }
}
