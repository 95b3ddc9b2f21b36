//! Caller identity extraction and the network bypass list.

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

use crate::ratelimit::constants::{IPV6_PREFIX_SEGMENTS, UNKNOWN_IDENTITY};

/// Extract client IP from request headers or connection info.
///
/// When `trust_proxy` is true, the first non-empty `X-Forwarded-For` entry wins,
/// then `X-Real-IP`. Falls back to the direct connection address. Returns `None`
/// when nothing usable is available.
pub fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').map(str::trim).find(|hop| !hop.is_empty()))
            .and_then(|hop| hop.parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }
        let real_ip = headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        if real_ip.is_some() {
            return real_ip;
        }
    }
    connect_info.map(|c| c.0.ip())
}

/// Normalize IP address for rate limiting.
///
/// IPv4 addresses are kept as-is.
/// IPv6 addresses are normalized to /64 prefix to prevent circumvention
/// by using multiple addresses within the same allocation.
pub fn normalize_ip(ip: IpAddr) -> String {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            let prefix: Vec<String> = (0..IPV6_PREFIX_SEGMENTS)
                .map(|i| format!("{:x}", seg[i]))
                .collect();
            format!("{}::/64", prefix.join(":"))
        }
    }
}

/// Rate-limit identity for an optional address; `"unknown"` when absent.
pub fn client_identity(ip: Option<IpAddr>) -> String {
    ip.map_or_else(|| UNKNOWN_IDENTITY.to_string(), normalize_ip)
}

/// Loopback and private-network addresses bypass admission control.
pub fn is_internal_ip(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Same check against an already normalized identity string.
///
/// IPv6 identities carry a `/64` suffix; only the prefix is inspected.
pub fn is_internal_identity(identity: &str) -> bool {
    let addr = identity.strip_suffix("/64").unwrap_or(identity);
    addr.parse().is_ok_and(is_internal_ip)
}
