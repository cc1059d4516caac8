//! Multiaddress resolution: replace `dns`, `dns4` and `dns6` host segments
//! with the addresses they resolve to.

use std::borrow::Cow;
use std::net::IpAddr;

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use peernet_core::CancelToken;

use crate::error::NetworkError;

/// Which address families a DNS segment accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Any,
    V4,
    V6,
}

impl Family {
    fn accepts(&self, ip: &IpAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => ip.is_ipv4(),
            Family::V6 => ip.is_ipv6(),
        }
    }
}

fn dns_segment<'a>(address: &'a Multiaddr) -> Option<(usize, Cow<'a, str>, Family)> {
    address.iter().enumerate().find_map(|(i, segment)| match segment {
        Protocol::Dns(host) => Some((i, host, Family::Any)),
        Protocol::Dns4(host) => Some((i, host, Family::V4)),
        Protocol::Dns6(host) => Some((i, host, Family::V6)),
        _ => None,
    })
}

/// Whether `address` needs resolving before it can be dialed.
pub fn is_dns(address: &Multiaddr) -> bool {
    dns_segment(address).is_some()
}

/// Insert the default TCP port before an `http`/`https` segment when the
/// address names no port of its own.
pub fn with_default_port(address: &Multiaddr) -> Multiaddr {
    let has_port = address
        .iter()
        .any(|p| matches!(p, Protocol::Tcp(_) | Protocol::Udp(_)));
    if has_port {
        return address.clone();
    }
    let mut out = Multiaddr::empty();
    for segment in address.iter() {
        match segment {
            Protocol::Http => out.push(Protocol::Tcp(80)),
            Protocol::Https => out.push(Protocol::Tcp(443)),
            _ => {}
        }
        out.push(segment);
    }
    out
}

/// Resolve `address` into dialable addresses.
///
/// Addresses without a DNS segment come back unchanged. `dns4` keeps only
/// IPv4 results, `dns6` only IPv6 ones and `dns` keeps both.
pub async fn resolve(
    address: &Multiaddr,
    cancel: &CancelToken,
) -> Result<Vec<Multiaddr>, NetworkError> {
    let address = with_default_port(address);
    let Some((index, host, family)) = dns_segment(&address) else {
        return Ok(vec![address]);
    };

    let lookup = tokio::net::lookup_host((host.as_ref(), 0u16));
    let ips: Vec<IpAddr> = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
        result = lookup => result
            .map_err(|e| NetworkError::Resolve(format!("lookup of '{}' failed: {}", host, e)))?
            .map(|sock| sock.ip())
            .filter(|ip| family.accepts(ip))
            .collect(),
    };

    let mut resolved: Vec<Multiaddr> = Vec::new();
    for ip in ips {
        let candidate: Multiaddr = address
            .iter()
            .enumerate()
            .map(|(i, segment)| if i == index { Protocol::from(ip) } else { segment })
            .collect();
        if !resolved.contains(&candidate) {
            resolved.push(candidate);
        }
    }
    if resolved.is_empty() {
        return Err(NetworkError::Resolve(format!(
            "'{}' has no {:?} addresses",
            host, family
        )));
    }
    tracing::debug!(%address, count = resolved.len(), "address resolved");
    Ok(resolved)
}
