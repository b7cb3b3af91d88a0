//! DHCP lease lookup on the LXD bridge.

use std::net::Ipv4Addr;
use std::time::Duration;

use hyper::Method;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::BackendError;
use crate::unix_client::LxdClient;

/// Delay between two lease table reads while waiting for an address.
pub const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct Lease {
    #[serde(default)]
    hwaddr: String,
    #[serde(default)]
    address: String,
}

/// Scan a lease reply for the IPv4 address leased to `mac_addr`.
///
/// Hardware addresses compare case-insensitively. Entries whose address is
/// not an IPv4 address (IPv6 leases share the MAC) are skipped.
#[must_use]
pub fn find_ipv4(leases: &Value, mac_addr: &str) -> Option<Ipv4Addr> {
    leases
        .get("metadata")?
        .as_array()?
        .iter()
        .filter_map(|entry| Lease::deserialize(entry).ok())
        .filter(|lease| lease.hwaddr.eq_ignore_ascii_case(mac_addr))
        .find_map(|lease| lease.address.parse().ok())
}

/// Read the lease table once.
///
/// # Errors
/// Propagates transport errors; a missing network is [`BackendError::NotFound`].
pub async fn get_ip_for(
    client: &LxdClient,
    mac_addr: &str,
    leases_path: &str,
) -> Result<Option<Ipv4Addr>, BackendError> {
    let leases = client
        .request(Method::GET, leases_path, None)
        .await?
        .require(leases_path)?;
    Ok(find_ipv4(&leases, mac_addr))
}

/// Read the lease table until `mac_addr` shows up or `timeout` elapses.
///
/// # Errors
/// Returns [`BackendError::IpAddressTimeout`] when no lease appears in time,
/// and propagates transport errors.
pub async fn wait_for_ip(
    client: &LxdClient,
    vm_name: &str,
    mac_addr: &str,
    leases_path: &str,
    timeout: Duration,
) -> Result<Ipv4Addr, BackendError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(ip) = get_ip_for(client, mac_addr, leases_path).await? {
            return Ok(ip);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(BackendError::IpAddressTimeout {
                name: vm_name.to_owned(),
                timeout,
            });
        }
        tracing::trace!(vm = %vm_name, "no lease yet");
        tokio::time::sleep(LEASE_POLL_INTERVAL.min(deadline - now)).await;
    }
}
