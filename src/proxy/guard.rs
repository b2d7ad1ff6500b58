//! Outbound address validation.
//!
//! Every address a target host resolves to must be publicly routable. The
//! validated addresses are handed back so the caller can pin its connection
//! to them; a second DNS answer then cannot point the request somewhere else.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use reqwest::Url;

use super::ExecutorError;

/// Whether `ip` lies in a range outbound requests may not reach.
pub fn is_disallowed(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_disallowed_v4(v4),
        IpAddr::V6(v6) => is_disallowed_v6(v6),
    }
}

fn is_disallowed_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        // shared address space (carrier-grade NAT)
        || (a == 100 && (64..128).contains(&b))
        // IETF protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // 6to4 relay anycast
        || (a == 192 && b == 88 && c == 99)
        // benchmarking
        || (a == 198 && (18..20).contains(&b))
        // reserved for future use
        || a >= 240
}

fn is_disallowed_v6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_disallowed_v4(mapped);
    }
    let first = ip.segments()[0];
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local fe80::/10
        || (first & 0xffc0) == 0xfe80
        // site local (deprecated) fec0::/10
        || (first & 0xffc0) == 0xfec0
        // documentation 2001:db8::/32
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

/// A target host that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedTarget {
    /// The URL names an address directly; nothing to pin.
    Literal(IpAddr),
    /// Domain name and every address it resolved to.
    Resolved { domain: String, addrs: Vec<SocketAddr> },
}

/// Parse `url`, resolve its host and reject it if any resolved address is disallowed.
pub async fn validate(url: &str) -> Result<ValidatedTarget, ExecutorError> {
    let parsed = Url::parse(url).map_err(|_| ExecutorError::InvalidRequest("Invalid or disallowed URL".into()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ExecutorError::InvalidRequest("Invalid or disallowed URL".into()))?;
    let port = parsed.port_or_known_default().unwrap_or(80);

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        reject_if_disallowed(ip)?;
        return Ok(ValidatedTarget::Literal(ip));
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ExecutorError::InvalidRequest(format!("Invalid or disallowed URL: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(ExecutorError::InvalidRequest("Invalid or disallowed URL".into()));
    }
    for addr in &addrs {
        reject_if_disallowed(addr.ip())?;
    }

    Ok(ValidatedTarget::Resolved {
        domain: host.to_string(),
        addrs,
    })
}

fn reject_if_disallowed(ip: IpAddr) -> Result<(), ExecutorError> {
    if is_disallowed(ip) {
        tracing::warn!(%ip, "blocked request to internal address");
        return Err(ExecutorError::Rejected(format!(
            "Access to internal IP addresses is not allowed: {ip}"
        )));
    }
    Ok(())
}
